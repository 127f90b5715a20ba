//! Provisioning reports and run statistics.
//!
//! One [`ProvisioningReport`] per processed object, accumulated for the
//! whole run in a [`ReportSink`]. Records are append-only; a record is
//! finalized before it is appended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use uuid::Uuid;

use idsync_connector::SyncToken;

use crate::policy::EntityKind;

/// Lifecycle operation attempted for one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Create the internal entity and link it.
    Create,
    /// Create the internal entity without linking.
    Provision,
    /// Apply an attribute delta.
    Update,
    /// Delete the internal entity.
    Delete,
    /// Remove the external object, keep the link.
    Deprovision,
    /// Remove the external object and the link.
    Unassign,
    /// Create or update only the link.
    Link,
    /// Remove only the link.
    Unlink,
    /// No operation.
    None,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Operation::Create => "create",
            Operation::Provision => "provision",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Deprovision => "deprovision",
            Operation::Unassign => "unassign",
            Operation::Link => "link",
            Operation::Unlink => "unlink",
            Operation::None => "none",
        };
        write!(f, "{s}")
    }
}

/// Outcome status of one processed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// The operation's own side effects completed.
    Success,
    /// The operation failed.
    Failure,
    /// Processing was skipped deliberately (policy, veto, conflict).
    Ignore,
    /// Nothing to report (e.g. dry run classification).
    None,
}

/// One record per processed object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningReport {
    /// Entity kind.
    pub kind: EntityKind,
    /// Operation attempted.
    pub operation: Operation,
    /// Outcome status.
    pub status: ReportStatus,
    /// Internal entity key, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_key: Option<Uuid>,
    /// External UID.
    pub uid: String,
    /// Display name.
    pub name: String,
    /// Optional message (failure reason, veto reason, propagation note).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Downstream propagation failures. Non-empty only when the
    /// operation itself succeeded but a propagation it triggered did not.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub propagation_failures: Vec<String>,
}

impl ProvisioningReport {
    /// Create a report record.
    pub fn new(
        kind: EntityKind,
        operation: Operation,
        status: ReportStatus,
        uid: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            operation,
            status,
            entity_key: None,
            uid: uid.into(),
            name: name.into(),
            message: None,
            propagation_failures: Vec::new(),
        }
    }

    /// Attach the internal entity key.
    #[must_use]
    pub fn with_entity_key(mut self, key: Uuid) -> Self {
        self.entity_key = Some(key);
        self
    }

    /// Attach a message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach downstream propagation failure descriptions.
    #[must_use]
    pub fn with_propagation_failures(mut self, failures: Vec<String>) -> Self {
        self.propagation_failures = failures;
        self
    }
}

/// How much per-object detail the run retains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceLevel {
    /// Statistics only, no per-object records.
    Summary,
    /// Retain failure and ignore records only.
    Failures,
    /// Retain every record.
    All,
}

impl Default for TraceLevel {
    fn default() -> Self {
        TraceLevel::All
    }
}

/// Aggregated statistics for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStatistics {
    /// Objects processed.
    #[serde(default)]
    pub processed: u64,
    /// Objects with `Success` status.
    #[serde(default)]
    pub succeeded: u64,
    /// Objects with `Failure` status.
    #[serde(default)]
    pub failed: u64,
    /// Objects with `Ignore` status.
    #[serde(default)]
    pub ignored: u64,
    /// Breakdown by operation.
    #[serde(default)]
    pub by_operation: HashMap<String, u64>,
}

/// Thread-safe, append-only accumulator for one run's reports.
///
/// Appends may come from multiple worker threads when the dispatcher
/// runs concurrently.
pub struct ReportSink {
    trace_level: TraceLevel,
    reports: Mutex<Vec<ProvisioningReport>>,
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    ignored: AtomicU64,
    by_operation: RwLock<HashMap<Operation, u64>>,
}

impl ReportSink {
    /// Create a sink with the given trace level.
    pub fn new(trace_level: TraceLevel) -> Self {
        Self {
            trace_level,
            reports: Mutex::new(Vec::new()),
            processed: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            by_operation: RwLock::new(HashMap::new()),
        }
    }

    /// Append a finalized record. Statistics are always counted; the
    /// record itself is retained according to the trace level.
    pub fn append(&self, report: ProvisioningReport) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        match report.status {
            ReportStatus::Success => {
                self.succeeded.fetch_add(1, Ordering::Relaxed);
            }
            ReportStatus::Failure => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            ReportStatus::Ignore => {
                self.ignored.fetch_add(1, Ordering::Relaxed);
            }
            ReportStatus::None => {}
        }
        {
            let mut by_op = self.by_operation.write().expect("statistics lock poisoned");
            *by_op.entry(report.operation).or_insert(0) += 1;
        }

        let retain = match self.trace_level {
            TraceLevel::All => true,
            TraceLevel::Failures => {
                matches!(report.status, ReportStatus::Failure | ReportStatus::Ignore)
            }
            TraceLevel::Summary => false,
        };
        if retain {
            self.reports
                .lock()
                .expect("report lock poisoned")
                .push(report);
        }
    }

    /// Snapshot the statistics.
    pub fn statistics(&self) -> RunStatistics {
        let by_operation = self
            .by_operation
            .read()
            .expect("statistics lock poisoned")
            .iter()
            .map(|(op, count)| (op.to_string(), *count))
            .collect();
        RunStatistics {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            by_operation,
        }
    }

    /// Drain the retained records and statistics into a final report.
    pub fn run_report(&self, run_id: Uuid, resource: impl Into<String>) -> RunReport {
        let statistics = self.statistics();
        let reports = std::mem::take(&mut *self.reports.lock().expect("report lock poisoned"));
        RunReport {
            run_id,
            resource: resource.into(),
            started_at: None,
            completed_at: Some(Utc::now()),
            statistics,
            reports,
            tokens: HashMap::new(),
        }
    }
}

/// The sole user-facing artifact of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: Uuid,
    /// External system the run was executed against.
    pub resource: String,
    /// When the run started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the run completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Aggregated statistics.
    pub statistics: RunStatistics,
    /// Retained per-object records, per the run's trace level.
    pub reports: Vec<ProvisioningReport>,
    /// Advanced sync tokens per object class.
    #[serde(default)]
    pub tokens: HashMap<String, SyncToken>,
}
