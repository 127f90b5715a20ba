//! Remediation records for failed operations.
//!
//! A remediation is a durable record of a failed create/update/delete,
//! created only when the policy's remediation flag is set. It carries
//! the attempted payload, the error, and a back-reference to the
//! triggering run, enabling later manual replay.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::ReconResult;
use crate::policy::EntityKind;
use crate::report::Operation;
use crate::workflow::EntityRequest;

/// Durable record of a failed operation, kept for manual replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Remediation {
    /// Record identifier.
    pub id: Uuid,
    /// The run that produced this record.
    pub run_id: Uuid,
    /// Entity kind.
    pub kind: EntityKind,
    /// Operation that failed.
    pub operation: Operation,
    /// The attempted payload, replayable as-is.
    pub payload: EntityRequest,
    /// The original error message.
    pub error: String,
    /// When the failure occurred.
    pub created_at: DateTime<Utc>,
}

impl Remediation {
    /// Create a record for a failed operation.
    pub fn new(
        run_id: Uuid,
        operation: Operation,
        payload: EntityRequest,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            kind: payload.kind,
            operation,
            payload,
            error: error.into(),
            created_at: Utc::now(),
        }
    }
}

/// Port for persisting remediation records.
#[async_trait]
pub trait RemediationStore: Send + Sync {
    /// Persist one record.
    async fn create(&self, remediation: Remediation) -> ReconResult<()>;
}

/// In-memory store, for tests and single runs whose records are read
/// back out of the process.
#[derive(Default)]
pub struct InMemoryRemediationStore {
    records: Mutex<Vec<Remediation>>,
}

impl InMemoryRemediationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the stored records.
    pub fn records(&self) -> Vec<Remediation> {
        self.records.lock().expect("remediation lock poisoned").clone()
    }
}

#[async_trait]
impl RemediationStore for InMemoryRemediationStore {
    async fn create(&self, remediation: Remediation) -> ReconResult<()> {
        self.records
            .lock()
            .expect("remediation lock poisoned")
            .push(remediation);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idsync_connector::AttributeSet;

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryRemediationStore::new();
        let run_id = Uuid::new_v4();
        let payload = EntityRequest::create(
            EntityKind::User,
            "jdoe",
            "ldap-prod",
            AttributeSet::new().with("email", "jdoe@example.com"),
        );

        store
            .create(Remediation::new(
                run_id,
                Operation::Create,
                payload,
                "constraint violation",
            ))
            .await
            .unwrap();

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].run_id, run_id);
        assert_eq!(records[0].kind, EntityKind::User);
        assert_eq!(records[0].error, "constraint violation");
        assert_eq!(records[0].payload.name, "jdoe");
    }
}
