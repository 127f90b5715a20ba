//! Workflow collaborator contract.
//!
//! All entity mutation goes through the embedding application's workflow
//! layer; this module owns only the request/outcome data contract and
//! the propagation status consumed by the state machine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use idsync_connector::AttributeSet;

use crate::policy::EntityKind;

/// A mutation request handed to the workflow collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRequest {
    /// Entity kind.
    pub kind: EntityKind,
    /// Internal key, when the target entity already exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<Uuid>,
    /// Display name.
    pub name: String,
    /// External system this request originated from or targets.
    pub resource: String,
    /// External UID of the counterpart object, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Attribute values to apply.
    pub attributes: AttributeSet,
}

impl EntityRequest {
    /// Create a request for a new entity.
    pub fn create(
        kind: EntityKind,
        name: impl Into<String>,
        resource: impl Into<String>,
        attributes: AttributeSet,
    ) -> Self {
        Self {
            kind,
            key: None,
            name: name.into(),
            resource: resource.into(),
            uid: None,
            attributes,
        }
    }

    /// Target an existing entity.
    #[must_use]
    pub fn with_key(mut self, key: Uuid) -> Self {
        self.key = Some(key);
        self
    }

    /// Attach the external UID.
    #[must_use]
    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }
}

/// Status of one downstream propagation triggered by a workflow call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationStatus {
    /// The downstream system accepted the change.
    Success,
    /// The downstream system rejected or failed the change.
    Failure,
    /// Propagation was not attempted (disabled, filtered out).
    NotAttempted,
}

/// One downstream propagation outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagationOutcome {
    /// The downstream external system.
    pub resource: String,
    /// Propagation status.
    pub status: PropagationStatus,
    /// Failure reason when status is `Failure`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl PropagationOutcome {
    /// A successful propagation.
    pub fn success(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            status: PropagationStatus::Success,
            failure_reason: None,
        }
    }

    /// A failed propagation with a reason.
    pub fn failure(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            status: PropagationStatus::Failure,
            failure_reason: Some(reason.into()),
        }
    }
}

/// Result of a workflow call: the affected entity key plus the outcomes
/// of any downstream propagations the change triggered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowOutcome {
    /// Key of the created or mutated entity.
    pub key: Uuid,
    /// Downstream propagation outcomes.
    #[serde(default)]
    pub propagations: Vec<PropagationOutcome>,
}

impl WorkflowOutcome {
    /// Create an outcome with no propagations.
    pub fn new(key: Uuid) -> Self {
        Self {
            key,
            propagations: Vec::new(),
        }
    }

    /// Attach propagation outcomes.
    #[must_use]
    pub fn with_propagations(mut self, propagations: Vec<PropagationOutcome>) -> Self {
        self.propagations = propagations;
        self
    }

    /// Collect failure reasons from failed propagations, if any.
    pub fn propagation_failures(&self) -> Vec<String> {
        self.propagations
            .iter()
            .filter(|p| p.status == PropagationStatus::Failure)
            .map(|p| {
                format!(
                    "{}: {}",
                    p.resource,
                    p.failure_reason.as_deref().unwrap_or("unknown")
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_propagation_failures_collected() {
        let outcome = WorkflowOutcome::new(Uuid::new_v4()).with_propagations(vec![
            PropagationOutcome::success("db-hr"),
            PropagationOutcome::failure("ldap-dev", "connection refused"),
        ]);

        let failures = outcome.propagation_failures();
        assert_eq!(failures, vec!["ldap-dev: connection refused".to_string()]);
    }

    #[test]
    fn test_entity_request_builder() {
        let key = Uuid::new_v4();
        let request = EntityRequest::create(
            EntityKind::User,
            "Jane Doe",
            "ldap-prod",
            AttributeSet::new().with("email", "jane@example.com"),
        )
        .with_key(key)
        .with_uid("u1");

        assert_eq!(request.key, Some(key));
        assert_eq!(request.uid.as_deref(), Some("u1"));
        assert_eq!(request.resource, "ldap-prod");
    }
}
