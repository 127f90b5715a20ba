//! # Reconciliation Engine
//!
//! Identity reconciliation between external systems and an authoritative
//! entity store.
//!
//! This crate provides the infrastructure for:
//! - Correlation and matching (declared rules or default key lookup)
//! - Per-kind reconciliation state machines driven by policy rule tables
//! - Inline or pooled dispatch with per-class sync-token lifecycle
//! - Run orchestration across object classes and interaction modes
//! - Remediation records for failed operations
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────────┐
//! │  Connector   │────►│  Dispatcher  │────►│  ReconHandler   │
//! │ (sync/search)│     │ (pool/tokens)│     │ (state machine) │
//! └─────────────┘     └──────────────┘     └────────┬────────┘
//!        ▲                                          │
//!        │            ┌──────────────┐      ┌──────┴───────┐
//!   ┌────┴───────┐    │   Matching   │◄─────│    Policy    │
//!   │ PullRunner │    │    Engine    │      │ (rule tables)│
//!   └────────────┘    └──────┬───────┘      └──────────────┘
//!                            ▼
//!                     ┌──────────────┐      ┌──────────────┐
//!                     │ EntityStore  │      │ EntityAdapter│
//!                     │   (port)     │      │  (workflow)  │
//!                     └──────────────┘      └──────────────┘
//! ```
//!
//! Every per-object outcome is a [`Disposition`]; a run's only
//! user-facing artifact is the [`RunReport`].

pub mod actions;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod matching;
pub mod orchestrator;
pub mod policy;
pub mod realm;
pub mod remediation;
pub mod report;
pub mod token;
pub mod workflow;

pub use actions::{Flow, ReconActions};
pub use dispatch::{Dispatcher, PoolConfig, ProgressSink, UnitHandler, WorkUnit};
pub use error::{ReconError, ReconResult};
pub use handler::{Disposition, EntityAdapter, ReconHandler};
pub use matching::{
    CorrelationRule, EntityQuery, EntityStore, InternalEntity, Match, MatchTarget, MatchingEngine,
};
pub use orchestrator::{Fixup, GroupOwnerAccumulator, InteractionMode, PullRunner};
pub use policy::{
    ConflictResolutionAction, EntityKind, KeyField, MatchingRule, Provision, RealmKeying,
    ReconciliationPolicy, UnmatchingRule,
};
pub use realm::{GuardedRealmAdapter, RealmDependents, RealmInventory, ReferentialIntegrityError};
pub use remediation::{InMemoryRemediationStore, Remediation, RemediationStore};
pub use report::{
    Operation, ProvisioningReport, ReportSink, ReportStatus, RunReport, RunStatistics, TraceLevel,
};
pub use token::{InMemoryTokenStore, TokenAdvance, TokenMap, TokenStore};
pub use workflow::{EntityRequest, PropagationOutcome, PropagationStatus, WorkflowOutcome};
