//! Work dispatcher.
//!
//! Routes each unit of work to the handler registered for its object
//! class, either inline or on a bounded worker pool. Saturation of the
//! pool is reported as a dispatch failure for that unit; the run
//! continues.
//!
//! Token advancement is mode-dependent: inline execution advances the
//! per-class token strictly serially after each unit completes, skipping
//! failed units; pooled execution defaults to optimistic advancement on
//! admission to the pool, trading strict ordering for throughput. The
//! serial discipline can be forced for pooled runs via
//! [`Dispatcher::with_serial_tokens`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use idsync_connector::{ChangeEvent, ExternalObject, SyncToken};

use crate::error::{ReconError, ReconResult};
use crate::handler::Disposition;
use crate::policy::EntityKind;
use crate::report::{Operation, ProvisioningReport, ReportSink, ReportStatus};
use crate::token::{TokenAdvance, TokenMap};

/// One unit of work routed by the dispatcher.
#[derive(Debug, Clone)]
pub enum WorkUnit {
    /// An enumerated object (full or filtered reconciliation).
    Object(ExternalObject),
    /// A change event (incremental or live sync).
    Delta(ChangeEvent),
}

impl WorkUnit {
    /// The object class this unit belongs to.
    pub fn object_class(&self) -> &str {
        match self {
            WorkUnit::Object(object) => &object.object_class,
            WorkUnit::Delta(event) => &event.object_class,
        }
    }

    /// The external identifier, for progress reporting.
    pub fn identifier(&self) -> &str {
        match self {
            WorkUnit::Object(object) => &object.uid,
            WorkUnit::Delta(event) => &event.uid,
        }
    }

    /// The sync token carried by the unit, for incremental runs.
    pub fn token(&self) -> Option<&SyncToken> {
        match self {
            WorkUnit::Object(_) => None,
            WorkUnit::Delta(event) => Some(&event.token),
        }
    }
}

/// Handler bound to one object class.
#[async_trait::async_trait]
pub trait UnitHandler: Send + Sync {
    /// Entity kind the handler reconciles.
    fn kind(&self) -> EntityKind;

    /// Process one unit to a terminal disposition.
    async fn handle(&self, unit: WorkUnit) -> Disposition;
}

/// Progress callback exposed to external observers.
pub trait ProgressSink: Send + Sync {
    /// One unit of the given class finished processing.
    fn report_handled(&self, object_class: &str, identifier: &str);
}

/// Bounded worker pool configuration.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Concurrent workers.
    pub workers: usize,
    /// Units that may wait for a worker before submission is rejected.
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Default)]
struct ClassProgress {
    handled: u64,
    last_identifier: String,
}

/// Routes units of work to per-object-class handlers.
pub struct Dispatcher {
    handlers: RwLock<HashMap<String, Arc<dyn UnitHandler>>>,
    tokens: Arc<TokenMap>,
    reports: Arc<ReportSink>,
    token_advance: TokenAdvance,
    pool: Option<Arc<Semaphore>>,
    progress: Arc<Mutex<HashMap<String, ClassProgress>>>,
    observer: Option<Arc<dyn ProgressSink>>,
    stopped: Arc<AtomicBool>,
    inflight: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Create an inline (single-threaded) dispatcher.
    pub fn new(tokens: Arc<TokenMap>, reports: Arc<ReportSink>) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            tokens,
            reports,
            token_advance: TokenAdvance::Serial,
            pool: None,
            progress: Arc::new(Mutex::new(HashMap::new())),
            observer: None,
            stopped: Arc::new(AtomicBool::new(false)),
            inflight: Mutex::new(Vec::new()),
        }
    }

    /// Enable the bounded worker pool. Switches token advancement to
    /// optimistic unless [`with_serial_tokens`](Self::with_serial_tokens)
    /// is applied afterwards.
    #[must_use]
    pub fn with_pool(mut self, config: PoolConfig) -> Self {
        self.pool = Some(Arc::new(Semaphore::new(
            config.workers + config.queue_capacity,
        )));
        self.token_advance = TokenAdvance::Optimistic;
        self
    }

    /// Force strictly serial token advancement even under concurrency.
    #[must_use]
    pub fn with_serial_tokens(mut self) -> Self {
        self.token_advance = TokenAdvance::Serial;
        self
    }

    /// Attach an external progress observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ProgressSink>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Cooperative stop flag, checked before each submission.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stopped.clone()
    }

    /// The effective token advancement mode.
    pub fn token_advance(&self) -> TokenAdvance {
        self.token_advance
    }

    /// Bind a handler to an object class.
    pub fn register(&self, object_class: impl Into<String>, handler: Arc<dyn UnitHandler>) {
        self.handlers
            .write()
            .expect("handler lock poisoned")
            .insert(object_class.into(), handler);
    }

    /// Route one unit to its handler.
    ///
    /// Returns an error only for units with no registered handler; every
    /// per-unit outcome, including pool rejection, becomes a report.
    pub async fn dispatch(&self, unit: WorkUnit) -> ReconResult<()> {
        if self.stopped.load(Ordering::SeqCst) {
            debug!(object_class = unit.object_class(), "Dispatcher stopped, unit skipped");
            return Ok(());
        }

        let handler = self
            .handlers
            .read()
            .expect("handler lock poisoned")
            .get(unit.object_class())
            .cloned()
            .ok_or_else(|| ReconError::misconfiguration(format!(
                "no handler registered for object class '{}'",
                unit.object_class()
            )))?;

        match &self.pool {
            None => {
                let token = unit.token().cloned();
                let class = unit.object_class().to_string();
                let identifier = unit.identifier().to_string();
                let disposition = handler.handle(unit).await;
                self.complete(&class, &identifier, token, &disposition);
                Ok(())
            }
            Some(pool) => {
                let Ok(permit) = pool.clone().try_acquire_owned() else {
                    return self.reject(&handler, &unit);
                };

                // Optimistic advance happens on admission only: a rejected
                // unit is a failure and must not move the token past an
                // event that never executed.
                if self.token_advance == TokenAdvance::Optimistic {
                    if let Some(token) = unit.token() {
                        self.tokens.advance(unit.object_class(), token.clone());
                    }
                }

                let class = unit.object_class().to_string();
                let identifier = unit.identifier().to_string();
                let token = unit.token().cloned();
                let serial = self.token_advance == TokenAdvance::Serial;
                let tokens = self.tokens.clone();
                let observer = self.observer.clone();
                let progress = self.progress.clone();

                let handle = tokio::spawn(async move {
                    let disposition = handler.handle(unit).await;
                    if serial && disposition.advances_token() {
                        if let Some(token) = token {
                            tokens.advance(&class, token);
                        }
                    }
                    {
                        let mut progress = progress.lock().expect("progress lock poisoned");
                        let entry = progress.entry(class.clone()).or_default();
                        entry.handled += 1;
                        entry.last_identifier = identifier.clone();
                    }
                    if let Some(observer) = observer {
                        observer.report_handled(&class, &identifier);
                    }
                    // The permit must live until here or the pool is unbounded.
                    drop(permit);
                });
                self.inflight
                    .lock()
                    .expect("inflight lock poisoned")
                    .push(handle);
                Ok(())
            }
        }
    }

    /// Await every in-flight pooled unit.
    pub async fn drain(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut inflight = self.inflight.lock().expect("inflight lock poisoned");
            inflight.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Pooled unit panicked");
            }
        }
    }

    /// Per-class handled counts and last processed identifiers.
    pub fn progress(&self) -> HashMap<String, (u64, String)> {
        self.progress
            .lock()
            .expect("progress lock poisoned")
            .iter()
            .map(|(class, p)| (class.clone(), (p.handled, p.last_identifier.clone())))
            .collect()
    }

    fn reject(&self, handler: &Arc<dyn UnitHandler>, unit: &WorkUnit) -> ReconResult<()> {
        let error = ReconError::DispatchRejected {
            object_class: unit.object_class().to_string(),
        };
        warn!(
            object_class = unit.object_class(),
            identifier = unit.identifier(),
            "Worker pool saturated, unit rejected"
        );
        self.reports.append(
            ProvisioningReport::new(
                handler.kind(),
                Operation::None,
                ReportStatus::Failure,
                unit.identifier(),
                unit.identifier(),
            )
            .with_message(error.to_string()),
        );
        Ok(())
    }

    fn complete(
        &self,
        object_class: &str,
        identifier: &str,
        token: Option<SyncToken>,
        disposition: &Disposition,
    ) {
        if disposition.advances_token() {
            if let Some(token) = token {
                self.tokens.advance(object_class, token);
            }
        }
        let mut progress = self.progress.lock().expect("progress lock poisoned");
        let entry = progress.entry(object_class.to_string()).or_default();
        entry.handled += 1;
        entry.last_identifier = identifier.to_string();
        drop(progress);
        if let Some(observer) = &self.observer {
            observer.report_handled(object_class, identifier);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use tokio::sync::Notify;

    use crate::report::TraceLevel;

    struct ScriptedHandler {
        disposition: Disposition,
        block_on: Option<Arc<Notify>>,
        handled: AtomicU64,
    }

    impl ScriptedHandler {
        fn applied() -> Self {
            Self {
                disposition: Disposition::Applied(Operation::Update),
                block_on: None,
                handled: AtomicU64::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                disposition: Disposition::Failed("boom".to_string()),
                block_on: None,
                handled: AtomicU64::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl UnitHandler for ScriptedHandler {
        fn kind(&self) -> EntityKind {
            EntityKind::User
        }

        async fn handle(&self, _unit: WorkUnit) -> Disposition {
            if let Some(gate) = &self.block_on {
                gate.notified().await;
            }
            self.handled.fetch_add(1, Ordering::SeqCst);
            self.disposition.clone()
        }
    }

    fn delta(uid: &str, token: &str) -> WorkUnit {
        WorkUnit::Delta(ChangeEvent::created_or_updated(
            ExternalObject::new("account", uid, uid),
            SyncToken::new(token),
        ))
    }

    fn sink() -> Arc<ReportSink> {
        Arc::new(ReportSink::new(TraceLevel::All))
    }

    #[tokio::test]
    async fn test_inline_advances_token_serially() {
        let tokens = Arc::new(TokenMap::new());
        let dispatcher = Dispatcher::new(tokens.clone(), sink());
        dispatcher.register("account", Arc::new(ScriptedHandler::applied()));

        dispatcher.dispatch(delta("u1", "1")).await.unwrap();
        dispatcher.dispatch(delta("u2", "2")).await.unwrap();
        assert_eq!(tokens.get("account"), Some(SyncToken::new("2")));

        let progress = dispatcher.progress();
        assert_eq!(progress.get("account"), Some(&(2, "u2".to_string())));
    }

    #[tokio::test]
    async fn test_inline_skips_token_for_failed_unit() {
        let tokens = Arc::new(TokenMap::new());
        let dispatcher = Dispatcher::new(tokens.clone(), sink());
        dispatcher.register("account", Arc::new(ScriptedHandler::failing()));

        dispatcher.dispatch(delta("u1", "1")).await.unwrap();
        assert_eq!(tokens.get("account"), None);
        assert!(tokens.changed().is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_class_is_misconfiguration() {
        let dispatcher = Dispatcher::new(Arc::new(TokenMap::new()), sink());
        let err = dispatcher.dispatch(delta("u1", "1")).await.unwrap_err();
        assert!(matches!(err, ReconError::Misconfiguration { .. }));
    }

    #[tokio::test]
    async fn test_pool_saturation_reports_failure() {
        let gate = Arc::new(Notify::new());
        let handler = Arc::new(ScriptedHandler {
            disposition: Disposition::Applied(Operation::Update),
            block_on: Some(gate.clone()),
            handled: AtomicU64::new(0),
        });
        let reports = sink();
        let dispatcher = Dispatcher::new(Arc::new(TokenMap::new()), reports.clone())
            .with_pool(PoolConfig {
                workers: 1,
                queue_capacity: 0,
            });
        dispatcher.register("account", handler.clone());

        dispatcher.dispatch(delta("u1", "1")).await.unwrap();
        // Pool is saturated by the blocked unit; the second is rejected.
        dispatcher.dispatch(delta("u2", "2")).await.unwrap();

        let stats = reports.statistics();
        assert_eq!(stats.failed, 1);

        gate.notify_one();
        dispatcher.drain().await;
        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pooled_optimistic_advances_before_completion() {
        let tokens = Arc::new(TokenMap::new());
        let dispatcher = Dispatcher::new(tokens.clone(), sink()).with_pool(PoolConfig {
            workers: 2,
            queue_capacity: 2,
        });
        assert_eq!(dispatcher.token_advance(), TokenAdvance::Optimistic);
        dispatcher.register("account", Arc::new(ScriptedHandler::failing()));

        dispatcher.dispatch(delta("u1", "1")).await.unwrap();
        // Advanced at submission, even though the handler will fail.
        assert_eq!(tokens.get("account"), Some(SyncToken::new("1")));
        dispatcher.drain().await;
    }

    #[tokio::test]
    async fn test_rejected_unit_does_not_advance_token() {
        let gate = Arc::new(Notify::new());
        let tokens = Arc::new(TokenMap::new());
        let dispatcher = Dispatcher::new(tokens.clone(), sink()).with_pool(PoolConfig {
            workers: 1,
            queue_capacity: 0,
        });
        dispatcher.register(
            "account",
            Arc::new(ScriptedHandler {
                disposition: Disposition::Applied(Operation::Update),
                block_on: Some(gate.clone()),
                handled: AtomicU64::new(0),
            }),
        );

        dispatcher.dispatch(delta("u1", "1")).await.unwrap();
        // u1 holds the only permit; u2 is rejected and must not move
        // the token past an event that never executed.
        dispatcher.dispatch(delta("u2", "2")).await.unwrap();
        assert_eq!(tokens.get("account"), Some(SyncToken::new("1")));

        gate.notify_one();
        dispatcher.drain().await;
        assert_eq!(tokens.get("account"), Some(SyncToken::new("1")));
    }

    #[tokio::test]
    async fn test_pooled_serial_skips_failed_units() {
        let tokens = Arc::new(TokenMap::new());
        let dispatcher = Dispatcher::new(tokens.clone(), sink())
            .with_pool(PoolConfig {
                workers: 2,
                queue_capacity: 2,
            })
            .with_serial_tokens();
        dispatcher.register("account", Arc::new(ScriptedHandler::failing()));

        dispatcher.dispatch(delta("u1", "1")).await.unwrap();
        dispatcher.drain().await;
        assert_eq!(tokens.get("account"), None);
    }

    #[tokio::test]
    async fn test_stop_flag_prevents_submission() {
        let handler = Arc::new(ScriptedHandler::applied());
        let dispatcher = Dispatcher::new(Arc::new(TokenMap::new()), sink());
        dispatcher.register("account", handler.clone());

        dispatcher.stop_flag().store(true, Ordering::SeqCst);
        dispatcher.dispatch(delta("u1", "1")).await.unwrap();
        assert_eq!(handler.handled.load(Ordering::SeqCst), 0);
    }

    struct RecordingObserver {
        seen: Mutex<Vec<(String, String)>>,
    }

    impl ProgressSink for RecordingObserver {
        fn report_handled(&self, object_class: &str, identifier: &str) {
            self.seen
                .lock()
                .unwrap()
                .push((object_class.to_string(), identifier.to_string()));
        }
    }

    #[tokio::test]
    async fn test_observer_sees_completions() {
        let observer = Arc::new(RecordingObserver {
            seen: Mutex::new(Vec::new()),
        });
        let dispatcher = Dispatcher::new(Arc::new(TokenMap::new()), sink())
            .with_observer(observer.clone());
        dispatcher.register("account", Arc::new(ScriptedHandler::applied()));

        dispatcher.dispatch(delta("u7", "1")).await.unwrap();
        let seen = observer.seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[("account".to_string(), "u7".to_string())]);
    }
}
