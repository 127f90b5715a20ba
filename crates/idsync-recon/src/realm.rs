//! Organizational-unit (realm) lifecycle guards.
//!
//! Realms follow the same matched/unmatched decision table as every
//! other kind, with one extra rule: a realm with dependents cannot be
//! deleted. The refusal is a structured error enumerating each blocking
//! category with a count, raised before the workflow collaborator is
//! ever invoked, and never masked by remediation.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use idsync_connector::ExternalObject;

use crate::error::ReconResult;
use crate::handler::EntityAdapter;
use crate::workflow::{EntityRequest, WorkflowOutcome};

/// Counts of elements that block deletion of an organizational unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RealmDependents {
    /// Descendant organizational units.
    pub child_units: u64,
    /// Entities of any kind contained in the unit.
    pub entities: u64,
    /// Scheduled tasks bound to the unit.
    pub scheduled_tasks: u64,
    /// Client applications registered under the unit.
    pub client_apps: u64,
}

impl RealmDependents {
    /// Whether nothing blocks deletion.
    pub fn is_empty(&self) -> bool {
        self.child_units == 0
            && self.entities == 0
            && self.scheduled_tasks == 0
            && self.client_apps == 0
    }

    /// Enumerate the non-empty blocking categories with counts.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if self.child_units > 0 {
            parts.push(format!("{} child unit(s)", self.child_units));
        }
        if self.entities > 0 {
            parts.push(format!("{} entity(ies)", self.entities));
        }
        if self.scheduled_tasks > 0 {
            parts.push(format!("{} scheduled task(s)", self.scheduled_tasks));
        }
        if self.client_apps > 0 {
            parts.push(format!("{} client application(s)", self.client_apps));
        }
        parts.join(", ")
    }
}

/// Deletion refused because the organizational unit has dependents.
#[derive(Debug, Clone, Error)]
#[error("cannot delete organizational unit {realm}: blocked by {}", .dependents.describe())]
pub struct ReferentialIntegrityError {
    /// The unit whose deletion was refused.
    pub realm: Uuid,
    /// What blocks it.
    pub dependents: RealmDependents,
}

/// Port for enumerating an organizational unit's dependents.
#[async_trait]
pub trait RealmInventory: Send + Sync {
    /// Count the elements that would block deletion of the unit.
    async fn dependents(&self, realm: Uuid) -> ReconResult<RealmDependents>;
}

/// Adapter wrapper enforcing referential integrity on realm deletion.
///
/// All operations delegate to the inner adapter; `delete` first consults
/// the inventory and refuses without touching the collaborator when any
/// dependents exist.
pub struct GuardedRealmAdapter<A: EntityAdapter, I: RealmInventory> {
    inner: Arc<A>,
    inventory: Arc<I>,
}

impl<A: EntityAdapter, I: RealmInventory> GuardedRealmAdapter<A, I> {
    /// Wrap a realm adapter with the deletion guard.
    pub fn new(inner: Arc<A>, inventory: Arc<I>) -> Self {
        Self { inner, inventory }
    }
}

#[async_trait]
impl<A: EntityAdapter, I: RealmInventory> EntityAdapter for GuardedRealmAdapter<A, I> {
    fn request_from(&self, object: &ExternalObject, resource: &str) -> EntityRequest {
        self.inner.request_from(object, resource)
    }

    async fn create(&self, request: &EntityRequest) -> ReconResult<WorkflowOutcome> {
        self.inner.create(request).await
    }

    async fn update(&self, request: &EntityRequest) -> ReconResult<WorkflowOutcome> {
        self.inner.update(request).await
    }

    async fn delete(&self, key: Uuid) -> ReconResult<WorkflowOutcome> {
        let dependents = self.inventory.dependents(key).await?;
        if !dependents.is_empty() {
            return Err(ReferentialIntegrityError {
                realm: key,
                dependents,
            }
            .into());
        }
        self.inner.delete(key).await
    }

    async fn link(&self, key: Uuid, resource: &str, uid: &str) -> ReconResult<()> {
        self.inner.link(key, resource, uid).await
    }

    async fn unlink(&self, key: Uuid, resource: &str) -> ReconResult<()> {
        self.inner.unlink(key, resource).await
    }

    async fn deprovision(&self, key: Uuid, resource: &str) -> ReconResult<WorkflowOutcome> {
        self.inner.deprovision(key, resource).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReconError;
    use crate::policy::EntityKind;
    use std::sync::Mutex;

    struct StubRealmAdapter {
        deletes: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl EntityAdapter for StubRealmAdapter {
        fn request_from(&self, object: &ExternalObject, resource: &str) -> EntityRequest {
            EntityRequest::create(
                EntityKind::Realm,
                object.name.clone(),
                resource,
                object.attributes.clone(),
            )
        }

        async fn create(&self, _request: &EntityRequest) -> ReconResult<WorkflowOutcome> {
            Ok(WorkflowOutcome::new(Uuid::new_v4()))
        }

        async fn update(&self, request: &EntityRequest) -> ReconResult<WorkflowOutcome> {
            Ok(WorkflowOutcome::new(request.key.unwrap_or_else(Uuid::new_v4)))
        }

        async fn delete(&self, key: Uuid) -> ReconResult<WorkflowOutcome> {
            self.deletes.lock().unwrap().push(key);
            Ok(WorkflowOutcome::new(key))
        }

        async fn link(&self, _key: Uuid, _resource: &str, _uid: &str) -> ReconResult<()> {
            Ok(())
        }

        async fn unlink(&self, _key: Uuid, _resource: &str) -> ReconResult<()> {
            Ok(())
        }

        async fn deprovision(&self, key: Uuid, _resource: &str) -> ReconResult<WorkflowOutcome> {
            Ok(WorkflowOutcome::new(key))
        }
    }

    struct FixedInventory(RealmDependents);

    #[async_trait]
    impl RealmInventory for FixedInventory {
        async fn dependents(&self, _realm: Uuid) -> ReconResult<RealmDependents> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn test_delete_refused_with_dependents() {
        let inner = Arc::new(StubRealmAdapter {
            deletes: Mutex::new(Vec::new()),
        });
        let dependents = RealmDependents {
            child_units: 1,
            ..Default::default()
        };
        let guarded = GuardedRealmAdapter::new(inner.clone(), Arc::new(FixedInventory(dependents)));

        let err = guarded.delete(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ReconError::ReferentialIntegrity(_)));
        assert!(err.to_string().contains("1 child unit(s)"));
        // The collaborator was never invoked.
        assert!(inner.deletes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_proceeds_when_empty() {
        let inner = Arc::new(StubRealmAdapter {
            deletes: Mutex::new(Vec::new()),
        });
        let guarded =
            GuardedRealmAdapter::new(inner.clone(), Arc::new(FixedInventory(RealmDependents::default())));

        let key = Uuid::new_v4();
        guarded.delete(key).await.unwrap();
        assert_eq!(inner.deletes.lock().unwrap().as_slice(), &[key]);
    }

    #[test]
    fn test_describe_enumerates_all_categories() {
        let dependents = RealmDependents {
            child_units: 2,
            entities: 1,
            scheduled_tasks: 3,
            client_apps: 1,
        };
        assert_eq!(
            dependents.describe(),
            "2 child unit(s), 1 entity(ies), 3 scheduled task(s), 1 client application(s)"
        );
        assert!(!dependents.is_empty());
        assert!(RealmDependents::default().is_empty());
    }
}
