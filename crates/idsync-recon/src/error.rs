//! Reconciliation error types
//!
//! Per-object errors never escape the dispatcher; they become report
//! entries. Errors of this type surface only at whole-object-class or
//! whole-run granularity.

use thiserror::Error;

use idsync_connector::ConnectorError;

use crate::realm::ReferentialIntegrityError;

/// Error that can occur during a reconciliation run.
#[derive(Debug, Error)]
pub enum ReconError {
    /// Connector failure for a whole object class. Timeouts are
    /// distinguishable via [`ConnectorError::is_timeout`].
    #[error("connector error: {0}")]
    Connector(#[from] ConnectorError),

    /// The workflow collaborator rejected or failed an operation.
    #[error("workflow error: {message}")]
    Workflow { message: String },

    /// The authoritative store failed a lookup.
    #[error("entity store error: {message}")]
    Store { message: String },

    /// A declared correlation rule failed to build its query.
    #[error("correlation rule error: {message}")]
    CorrelationRule { message: String },

    /// Organizational-unit delete refused because dependents exist.
    #[error(transparent)]
    ReferentialIntegrity(#[from] ReferentialIntegrityError),

    /// The dispatcher's worker pool rejected a unit (saturation).
    #[error("dispatch rejected for object class '{object_class}': worker pool saturated")]
    DispatchRejected { object_class: String },

    /// The remediation store failed to persist a record.
    #[error("remediation store error: {message}")]
    Remediation { message: String },

    /// Run-level misconfiguration. The only error that aborts a run
    /// before any object is processed.
    #[error("misconfiguration: {message}")]
    Misconfiguration { message: String },
}

impl ReconError {
    /// Create a workflow error.
    pub fn workflow(message: impl Into<String>) -> Self {
        ReconError::Workflow {
            message: message.into(),
        }
    }

    /// Create an entity store error.
    pub fn store(message: impl Into<String>) -> Self {
        ReconError::Store {
            message: message.into(),
        }
    }

    /// Create a correlation rule error.
    pub fn correlation_rule(message: impl Into<String>) -> Self {
        ReconError::CorrelationRule {
            message: message.into(),
        }
    }

    /// Create a misconfiguration error.
    pub fn misconfiguration(message: impl Into<String>) -> Self {
        ReconError::Misconfiguration {
            message: message.into(),
        }
    }
}

/// Result type for reconciliation operations.
pub type ReconResult<T> = Result<T, ReconError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_error_passthrough() {
        let err: ReconError = ConnectorError::timeout(30).into();
        match &err {
            ReconError::Connector(c) => assert!(c.is_timeout()),
            other => panic!("unexpected variant: {other}"),
        }
    }

    #[test]
    fn test_display() {
        let err = ReconError::misconfiguration("no correlatable mapping");
        assert_eq!(
            err.to_string(),
            "misconfiguration: no correlatable mapping"
        );

        let err = ReconError::DispatchRejected {
            object_class: "account".to_string(),
        };
        assert!(err.to_string().contains("worker pool saturated"));
    }
}
