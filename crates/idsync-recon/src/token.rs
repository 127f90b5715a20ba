//! Sync-token lifecycle.
//!
//! One token per object class, accumulated in a [`TokenMap`] during the
//! run and persisted through the [`TokenStore`] port at the end. Only
//! tokens that actually changed are written back, and never in dry-run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use idsync_connector::SyncToken;

use crate::error::ReconResult;

/// When the dispatcher advances the per-class token for a unit of work.
///
/// `Optimistic` advances as soon as the unit is admitted to the pool,
/// which maximizes throughput but can persist a token past a unit that
/// later fails. `Serial` advances only after the unit completes with a
/// non-failure disposition, trading throughput for exactness. Units the
/// pool rejects advance the token in neither mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenAdvance {
    /// Advance after completion, skipping failed units.
    Serial,
    /// Advance on admission, before the unit completes.
    Optimistic,
}

impl Default for TokenAdvance {
    fn default() -> Self {
        TokenAdvance::Serial
    }
}

/// Thread-safe per-object-class token accumulator for one run.
///
/// Tracks which classes changed so the run persists only real advances.
#[derive(Debug, Default)]
pub struct TokenMap {
    inner: Mutex<TokenMapInner>,
}

#[derive(Debug, Default)]
struct TokenMapInner {
    tokens: HashMap<String, SyncToken>,
    changed: HashSet<String>,
}

impl TokenMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a class with its last persisted token, unmarked as changed.
    pub fn seed(&self, object_class: impl Into<String>, token: SyncToken) {
        self.inner
            .lock()
            .expect("token lock poisoned")
            .tokens
            .insert(object_class.into(), token);
    }

    /// Advance the token for a class, marking it changed.
    pub fn advance(&self, object_class: impl Into<String>, token: SyncToken) {
        let object_class = object_class.into();
        let mut inner = self.inner.lock().expect("token lock poisoned");
        inner.tokens.insert(object_class.clone(), token);
        inner.changed.insert(object_class);
    }

    /// The current token for a class, if any.
    pub fn get(&self, object_class: &str) -> Option<SyncToken> {
        self.inner
            .lock()
            .expect("token lock poisoned")
            .tokens
            .get(object_class)
            .cloned()
    }

    /// Tokens that changed during this run.
    pub fn changed(&self) -> HashMap<String, SyncToken> {
        let inner = self.inner.lock().expect("token lock poisoned");
        inner
            .changed
            .iter()
            .filter_map(|class| {
                inner
                    .tokens
                    .get(class)
                    .map(|token| (class.clone(), token.clone()))
            })
            .collect()
    }

    /// All current tokens, changed or not.
    pub fn snapshot(&self) -> HashMap<String, SyncToken> {
        self.inner
            .lock()
            .expect("token lock poisoned")
            .tokens
            .clone()
    }
}

/// Port for durable token storage across runs.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Load the last persisted token for an object class.
    async fn load(&self, resource: &str, object_class: &str) -> ReconResult<Option<SyncToken>>;

    /// Persist a token for an object class.
    async fn save(&self, resource: &str, object_class: &str, token: &SyncToken)
        -> ReconResult<()>;
}

/// In-memory token store, for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    tokens: Mutex<HashMap<(String, String), SyncToken>>,
}

impl InMemoryTokenStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn load(&self, resource: &str, object_class: &str) -> ReconResult<Option<SyncToken>> {
        Ok(self
            .tokens
            .lock()
            .expect("token lock poisoned")
            .get(&(resource.to_string(), object_class.to_string()))
            .cloned())
    }

    async fn save(
        &self,
        resource: &str,
        object_class: &str,
        token: &SyncToken,
    ) -> ReconResult<()> {
        self.tokens
            .lock()
            .expect("token lock poisoned")
            .insert(
                (resource.to_string(), object_class.to_string()),
                token.clone(),
            );
        Ok(())
    }
}
