//! Run orchestration.
//!
//! A [`PullRunner`] drives one full run for one external system: hooks,
//! object-class sequencing, connector interaction mode selection, token
//! lifecycle, deferred cross-object fixups, and report aggregation. The
//! loop itself is single-threaded; concurrency lives entirely in the
//! dispatcher's worker pool.

use async_trait::async_trait;
use chrono::Utc;
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use idsync_connector::{
    ChangeEvent, DeltaHandler, ExternalObject, Filter, ObjectHandler, OperationOptions, SyncOp,
};

use crate::actions::ReconActions;
use crate::dispatch::{Dispatcher, UnitHandler, WorkUnit};
use crate::error::{ReconError, ReconResult};
use crate::policy::EntityKind;
use crate::report::{ReportSink, RunReport};
use crate::token::{TokenMap, TokenStore};

/// How the connector is driven for one object class.
#[derive(Debug, Clone)]
pub enum InteractionMode {
    /// Token-based change stream; advances tokens.
    Incremental,
    /// Enumerate everything.
    Full,
    /// Enumerate with an externally supplied predicate.
    Filtered(Filter),
    /// Long-lived subscription loop with an inter-iteration delay,
    /// stopped cooperatively via the dispatcher's stop flag.
    Live {
        /// Delay between subscription iterations.
        delay: Duration,
    },
}

/// Deferred cross-object work applied once after every object class has
/// been processed, when full-pass information is available.
#[async_trait]
pub trait Fixup: Send + Sync {
    /// Name for logs.
    fn name(&self) -> &str;

    /// Apply the accumulated work.
    async fn apply(&self) -> ReconResult<()>;
}

/// Synchronized accumulator for group-ownership pairs discovered while
/// group units are dispatched, possibly from multiple worker threads.
/// Resolution happens in a [`Fixup`] once the full pass is complete.
#[derive(Debug, Default)]
pub struct GroupOwnerAccumulator {
    pending: Mutex<Vec<(Uuid, String)>>,
}

impl GroupOwnerAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a group's owner was observed as an external UID that
    /// may not be resolvable to an internal entity yet.
    pub fn record(&self, group: Uuid, owner_uid: impl Into<String>) {
        self.pending
            .lock()
            .expect("accumulator lock poisoned")
            .push((group, owner_uid.into()));
    }

    /// Take every accumulated pair.
    pub fn drain(&self) -> Vec<(Uuid, String)> {
        std::mem::take(&mut *self.pending.lock().expect("accumulator lock poisoned"))
    }
}

/// One object class bound to its handler for the run.
struct Binding {
    object_class: String,
    handler: Arc<dyn UnitHandler>,
}

/// Drives one run for one external system.
pub struct PullRunner<C: SyncOp + ?Sized> {
    run_id: Uuid,
    connector: Arc<C>,
    resource: String,
    mode: InteractionMode,
    dispatcher: Arc<Dispatcher>,
    tokens: Arc<TokenMap>,
    reports: Arc<ReportSink>,
    bindings: Vec<Binding>,
    realm_binding: Option<Binding>,
    actions: Vec<Arc<dyn ReconActions>>,
    token_store: Option<Arc<dyn TokenStore>>,
    fixups: Vec<Arc<dyn Fixup>>,
    options: OperationOptions,
    dry_run: bool,
    ordering: Option<Arc<dyn Fn(EntityKind, EntityKind) -> CmpOrdering + Send + Sync>>,
}

impl<C: SyncOp + ?Sized> PullRunner<C> {
    /// Create a runner for one external system.
    pub fn new(
        connector: Arc<C>,
        resource: impl Into<String>,
        dispatcher: Arc<Dispatcher>,
        tokens: Arc<TokenMap>,
        reports: Arc<ReportSink>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            connector,
            resource: resource.into(),
            mode: InteractionMode::Incremental,
            dispatcher,
            tokens,
            reports,
            bindings: Vec::new(),
            realm_binding: None,
            actions: Vec::new(),
            token_store: None,
            fixups: Vec::new(),
            options: OperationOptions::new(),
            dry_run: false,
            ordering: None,
        }
    }

    /// The run identifier, shared with the per-provision handlers.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Fix the run identifier (handlers must be built with the same one).
    #[must_use]
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    /// Select the connector interaction mode.
    #[must_use]
    pub fn with_mode(mut self, mode: InteractionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Bind a provision's handler to its object class.
    #[must_use]
    pub fn with_provision(
        mut self,
        object_class: impl Into<String>,
        handler: Arc<dyn UnitHandler>,
    ) -> Self {
        self.bindings.push(Binding {
            object_class: object_class.into(),
            handler,
        });
        self
    }

    /// Bind the organizational-unit handler, processed before all other
    /// object classes.
    #[must_use]
    pub fn with_realm_provision(
        mut self,
        object_class: impl Into<String>,
        handler: Arc<dyn UnitHandler>,
    ) -> Self {
        self.realm_binding = Some(Binding {
            object_class: object_class.into(),
            handler,
        });
        self
    }

    /// Attach run-scoped action hooks.
    #[must_use]
    pub fn with_actions(mut self, actions: Vec<Arc<dyn ReconActions>>) -> Self {
        self.actions = actions;
        self
    }

    /// Attach durable token storage.
    #[must_use]
    pub fn with_token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    /// Append a deferred fixup.
    #[must_use]
    pub fn with_fixup(mut self, fixup: Arc<dyn Fixup>) -> Self {
        self.fixups.push(fixup);
        self
    }

    /// Set connector operation options.
    #[must_use]
    pub fn with_options(mut self, options: OperationOptions) -> Self {
        self.options = options;
        self
    }

    /// Classify only; skip side effects and token persistence.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Replace the default object-class ordering (users, then groups,
    /// then everything else).
    #[must_use]
    pub fn with_ordering(
        mut self,
        ordering: Arc<dyn Fn(EntityKind, EntityKind) -> CmpOrdering + Send + Sync>,
    ) -> Self {
        self.ordering = Some(ordering);
        self
    }

    /// Execute the run and return the aggregated report.
    #[instrument(skip(self), fields(run_id = %self.run_id, resource = %self.resource))]
    pub async fn run(&self) -> ReconResult<RunReport> {
        if self.bindings.is_empty() && self.realm_binding.is_none() {
            return Err(ReconError::misconfiguration(
                "no provisions configured for this run",
            ));
        }
        let started_at = Utc::now();

        for action in &self.actions {
            action.before_all().await?;
        }

        let mut ordered: Vec<&Binding> = self.bindings.iter().collect();
        match &self.ordering {
            Some(ordering) => {
                ordered.sort_by(|a, b| ordering(a.handler.kind(), b.handler.kind()));
            }
            None => ordered.sort_by_key(|b| default_rank(b.handler.kind())),
        }

        let sequence: Vec<&Binding> = self
            .realm_binding
            .iter()
            .chain(ordered.into_iter())
            .collect();

        for binding in sequence {
            self.dispatcher
                .register(binding.object_class.clone(), binding.handler.clone());
            info!(object_class = %binding.object_class, "Processing object class");
            if let Err(e) = self.process_class(&binding.object_class).await {
                // A whole-class connector failure aborts only this class.
                warn!(
                    object_class = %binding.object_class,
                    error = %e,
                    "Object class processing aborted, continuing run"
                );
            }
        }
        self.dispatcher.drain().await;

        for fixup in &self.fixups {
            if let Err(e) = fixup.apply().await {
                warn!(fixup = fixup.name(), error = %e, "Deferred fixup failed");
            }
        }

        let changed = self.tokens.changed();
        if !self.dry_run && !changed.is_empty() {
            if let Some(store) = &self.token_store {
                for (object_class, token) in &changed {
                    if let Err(e) = store.save(&self.resource, object_class, token).await {
                        warn!(
                            object_class = %object_class,
                            error = %e,
                            "Failed to persist sync token"
                        );
                    }
                }
            }
        }

        let mut report = self.reports.run_report(self.run_id, &self.resource);
        report.started_at = Some(started_at);
        report.tokens = changed;

        for action in &self.actions {
            if let Err(e) = action.after_all(&report).await {
                warn!(error = %e, "After-all hook failed");
            }
        }

        info!(
            processed = report.statistics.processed,
            failed = report.statistics.failed,
            "Run complete"
        );
        Ok(report)
    }

    async fn process_class(&self, object_class: &str) -> ReconResult<()> {
        match &self.mode {
            InteractionMode::Incremental => {
                let token = self.load_token(object_class).await?;
                if let Some(token) = &token {
                    self.tokens.seed(object_class, token.clone());
                }
                let bridge = DeltaBridge {
                    dispatcher: self.dispatcher.clone(),
                };
                self.connector
                    .sync(object_class, token.as_ref(), &bridge, &self.options)
                    .await?;
            }
            InteractionMode::Full => {
                let bridge = ObjectBridge {
                    dispatcher: self.dispatcher.clone(),
                };
                self.connector
                    .full_reconciliation(object_class, &bridge, &self.options)
                    .await?;
            }
            InteractionMode::Filtered(filter) => {
                let bridge = ObjectBridge {
                    dispatcher: self.dispatcher.clone(),
                };
                self.connector
                    .filtered_reconciliation(object_class, filter, &bridge, &self.options)
                    .await?;
            }
            InteractionMode::Live { delay } => {
                let stop = self.dispatcher.stop_flag();
                let mut token = self.load_token(object_class).await?;
                if let Some(token) = &token {
                    self.tokens.seed(object_class, token.clone());
                }
                let bridge = DeltaBridge {
                    dispatcher: self.dispatcher.clone(),
                };
                while !stop.load(Ordering::SeqCst) {
                    let next = self
                        .connector
                        .livesync(object_class, token.as_ref(), &bridge, &self.options)
                        .await?;
                    if let Some(next) = next {
                        token = Some(next);
                    }
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    tokio::time::sleep(*delay).await;
                }
            }
        }
        Ok(())
    }

    async fn load_token(
        &self,
        object_class: &str,
    ) -> ReconResult<Option<idsync_connector::SyncToken>> {
        match &self.token_store {
            Some(store) => store.load(&self.resource, object_class).await,
            None => Ok(None),
        }
    }
}

fn default_rank(kind: EntityKind) -> u8 {
    match kind {
        EntityKind::User => 0,
        EntityKind::Group => 1,
        EntityKind::AnyObject | EntityKind::Realm => 2,
    }
}

struct ObjectBridge {
    dispatcher: Arc<Dispatcher>,
}

#[async_trait]
impl ObjectHandler for ObjectBridge {
    async fn handle(&self, object: ExternalObject) -> bool {
        if self.dispatcher.stop_flag().load(Ordering::SeqCst) {
            return false;
        }
        match self.dispatcher.dispatch(WorkUnit::Object(object)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Dispatch failed, stopping enumeration");
                false
            }
        }
    }
}

struct DeltaBridge {
    dispatcher: Arc<Dispatcher>,
}

#[async_trait]
impl DeltaHandler for DeltaBridge {
    async fn handle(&self, event: ChangeEvent) -> bool {
        if self.dispatcher.stop_flag().load(Ordering::SeqCst) {
            return false;
        }
        match self.dispatcher.dispatch(WorkUnit::Delta(event)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Dispatch failed, stopping delivery");
                false
            }
        }
    }
}
