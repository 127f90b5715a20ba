//! Connector error types
//!
//! Error definitions with timeout/transient classification so the engine
//! can tell a whole-object-class failure apart from a bad single object.

use thiserror::Error;

/// Error that can occur during connector operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Failed to establish connection to target system.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation against the target system timed out.
    ///
    /// Surfaced distinctly so the orchestrator can abort the current
    /// object class and move on to the next one.
    #[error("operation timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// Target system is temporarily unavailable.
    #[error("target system unavailable: {message}")]
    TargetUnavailable { message: String },

    /// Invalid credentials or expired session.
    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Object class not known to the target system.
    #[error("object class '{object_class}' not found")]
    ObjectClassNotFound { object_class: String },

    /// Object not found in target system.
    #[error("object not found: {identifier}")]
    ObjectNotFound { identifier: String },

    /// The sync token is no longer accepted by the target system.
    #[error("sync token expired or invalid for object class '{object_class}'")]
    TokenExpired { object_class: String },

    /// Operation failed for any other reason.
    #[error("operation failed: {message}")]
    OperationFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Connector configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },
}

impl ConnectorError {
    /// Check if this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConnectorError::Timeout { .. })
    }

    /// Check if this error is transient and the operation may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectorError::ConnectionFailed { .. }
                | ConnectorError::Timeout { .. }
                | ConnectorError::TargetUnavailable { .. }
        )
    }

    /// Get an error code for classification in reports.
    pub fn error_code(&self) -> &'static str {
        match self {
            ConnectorError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            ConnectorError::Timeout { .. } => "TIMEOUT",
            ConnectorError::TargetUnavailable { .. } => "TARGET_UNAVAILABLE",
            ConnectorError::AuthenticationFailed { .. } => "AUTH_FAILED",
            ConnectorError::ObjectClassNotFound { .. } => "OBJECT_CLASS_NOT_FOUND",
            ConnectorError::ObjectNotFound { .. } => "OBJECT_NOT_FOUND",
            ConnectorError::TokenExpired { .. } => "TOKEN_EXPIRED",
            ConnectorError::OperationFailed { .. } => "OPERATION_FAILED",
            ConnectorError::InvalidConfiguration { .. } => "INVALID_CONFIG",
        }
    }

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        ConnectorError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create an operation failed error.
    pub fn operation_failed(message: impl Into<String>) -> Self {
        ConnectorError::OperationFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create an operation failed error with source.
    pub fn operation_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConnectorError::OperationFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a timeout error.
    pub fn timeout(timeout_secs: u64) -> Self {
        ConnectorError::Timeout { timeout_secs }
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        ConnectorError::InvalidConfiguration {
            message: message.into(),
        }
    }
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;
