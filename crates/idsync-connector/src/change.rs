//! Change events and sync tokens
//!
//! A [`ChangeEvent`] wraps an observed object (or its absence, for
//! deletions) with a change kind and the opaque [`SyncToken`] marking its
//! position in the external change stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::object::ExternalObject;

/// Opaque cursor marking a position in an external change stream.
///
/// Tokens are totally ordered per object class by delivery order; the
/// engine never parses the value. Advancing past a token is only safe
/// once the corresponding event has been fully handled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncToken(String);

impl SyncToken {
    /// Create a token from an opaque connector-supplied value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The opaque token value, for persistence.
    pub fn value(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SyncToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SyncToken {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Kind of change detected in the external system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// A new object was created.
    Create,
    /// An existing object was updated.
    Update,
    /// Created or updated; the source cannot distinguish.
    CreateOrUpdate,
    /// An object was deleted.
    Delete,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Create => write!(f, "create"),
            ChangeKind::Update => write!(f, "update"),
            ChangeKind::CreateOrUpdate => write!(f, "create_or_update"),
            ChangeKind::Delete => write!(f, "delete"),
        }
    }
}

/// A delta delivered by an incremental or live sync stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// The kind of change.
    pub kind: ChangeKind,
    /// Object class the change applies to.
    pub object_class: String,
    /// External UID of the affected object.
    pub uid: String,
    /// The observed object. Absent for deletions.
    pub object: Option<ExternalObject>,
    /// Position of this event in the change stream.
    pub token: SyncToken,
    /// Timestamp of the change, if the source system provides one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChangeEvent {
    /// Create a change event for a created object.
    pub fn created(object: ExternalObject, token: SyncToken) -> Self {
        Self {
            kind: ChangeKind::Create,
            object_class: object.object_class.clone(),
            uid: object.uid.clone(),
            object: Some(object),
            token,
            timestamp: None,
        }
    }

    /// Create a change event for an updated object.
    pub fn updated(object: ExternalObject, token: SyncToken) -> Self {
        Self {
            kind: ChangeKind::Update,
            object_class: object.object_class.clone(),
            uid: object.uid.clone(),
            object: Some(object),
            token,
            timestamp: None,
        }
    }

    /// Create a change event when the source cannot distinguish
    /// creation from update.
    pub fn created_or_updated(object: ExternalObject, token: SyncToken) -> Self {
        Self {
            kind: ChangeKind::CreateOrUpdate,
            object_class: object.object_class.clone(),
            uid: object.uid.clone(),
            object: Some(object),
            token,
            timestamp: None,
        }
    }

    /// Create a change event for a deleted object.
    pub fn deleted(
        object_class: impl Into<String>,
        uid: impl Into<String>,
        token: SyncToken,
    ) -> Self {
        Self {
            kind: ChangeKind::Delete,
            object_class: object_class.into(),
            uid: uid.into(),
            object: None,
            token,
            timestamp: None,
        }
    }

    /// Set the timestamp of the change.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Whether this event represents a deletion.
    pub fn is_delete(&self) -> bool {
        self.kind == ChangeKind::Delete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_event_constructors() {
        let obj = ExternalObject::new("account", "u1", "Jane Doe");
        let event = ChangeEvent::created(obj, SyncToken::new("42"));
        assert_eq!(event.kind, ChangeKind::Create);
        assert_eq!(event.uid, "u1");
        assert_eq!(event.object_class, "account");
        assert!(event.object.is_some());
        assert!(!event.is_delete());

        let event = ChangeEvent::deleted("account", "u2", SyncToken::new("43"));
        assert!(event.is_delete());
        assert!(event.object.is_none());
        assert_eq!(event.token.value(), "43");
    }

    #[test]
    fn test_change_kind_display() {
        assert_eq!(ChangeKind::Create.to_string(), "create");
        assert_eq!(ChangeKind::CreateOrUpdate.to_string(), "create_or_update");
        assert_eq!(ChangeKind::Delete.to_string(), "delete");
    }

    #[test]
    fn test_token_is_opaque() {
        let token = SyncToken::new("cookie:abc/123==");
        assert_eq!(token.value(), "cookie:abc/123==");
        assert_eq!(token, SyncToken::from("cookie:abc/123=="));
    }
}
