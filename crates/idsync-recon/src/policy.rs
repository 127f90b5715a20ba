//! Reconciliation policy and provision configuration.
//!
//! The two rule axes ([`UnmatchingRule`], [`MatchingRule`]) plus conflict
//! resolution and permission flags decide which lifecycle operation the
//! state machine applies to each object.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::matching::CorrelationRule;

/// Internal entity kinds the engine reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// User-like entities.
    User,
    /// Group-like entities.
    Group,
    /// Generic objects without dedicated lifecycle rules.
    AnyObject,
    /// Organizational units (realms).
    Realm,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::User => write!(f, "user"),
            EntityKind::Group => write!(f, "group"),
            EntityKind::AnyObject => write!(f, "any_object"),
            EntityKind::Realm => write!(f, "realm"),
        }
    }
}

/// What to do when zero internal entities match an external object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchingRule {
    /// Create the entity, then link the external system to it.
    Assign,
    /// Create the entity only, without linking.
    Provision,
    /// Record a no-op outcome.
    Unlink,
    /// Record a no-op outcome.
    Ignore,
}

/// What to do when one or more internal entities match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingRule {
    /// Compute and apply an attribute delta.
    Update,
    /// Remove the external-system object but keep the link.
    Deprovision,
    /// Remove both the object and the link.
    Unassign,
    /// Mutate only the link, no external-system mutation.
    Link,
    /// Remove only the link, no external-system mutation.
    Unlink,
    /// Record a no-op outcome.
    Ignore,
}

/// Tie-break when correlation yields more than one real match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolutionAction {
    /// Abort processing of this object with a recoverable ignore.
    Ignore,
    /// Keep the first match by list position.
    FirstMatch,
    /// Keep the last match by list position.
    LastMatch,
}

/// Per-run reconciliation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationPolicy {
    /// Rule for the zero-match branch.
    pub unmatching_rule: UnmatchingRule,
    /// Rule for the one-or-more-match branch.
    pub matching_rule: MatchingRule,
    /// Tie-break for the more-than-one-match case.
    #[serde(default = "default_conflict_resolution")]
    pub conflict_resolution: ConflictResolutionAction,
    /// Whether create operations are permitted.
    #[serde(default = "default_true")]
    pub perform_create: bool,
    /// Whether update operations are permitted.
    #[serde(default = "default_true")]
    pub perform_update: bool,
    /// Whether delete operations are permitted.
    #[serde(default = "default_true")]
    pub perform_delete: bool,
    /// Classify intended operations without executing side effects.
    #[serde(default)]
    pub dry_run: bool,
    /// Create a remediation record on operation failure and keep going.
    #[serde(default)]
    pub remediation: bool,
}

fn default_conflict_resolution() -> ConflictResolutionAction {
    ConflictResolutionAction::Ignore
}

fn default_true() -> bool {
    true
}

impl Default for ReconciliationPolicy {
    fn default() -> Self {
        Self {
            unmatching_rule: UnmatchingRule::Assign,
            matching_rule: MatchingRule::Update,
            conflict_resolution: default_conflict_resolution(),
            perform_create: true,
            perform_update: true,
            perform_delete: true,
            dry_run: false,
            remediation: false,
        }
    }
}

/// How to look up internal entities from an external key value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyField {
    /// Look up by the entity's primary identifier.
    PrimaryId,
    /// Look up by a designated unique field (e.g. username).
    UniqueField(String),
    /// Look up by a mapped custom attribute.
    CustomAttribute(String),
}

/// How organizational units are keyed during matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RealmKeying {
    /// Match by full realm path.
    FullPath,
    /// Match by realm name.
    Name,
    /// Match by internal identifier.
    InternalId,
}

/// Configuration binding one internal entity kind to one external object
/// class for one external system.
#[derive(Clone)]
pub struct Provision {
    /// Entity kind this provision reconciles.
    pub entity_kind: EntityKind,
    /// Object class name in the external system.
    pub object_class: String,
    /// Designated key attribute in the external object. The external UID
    /// is used when absent or unmapped.
    pub key_attribute: Option<String>,
    /// How the key value resolves to internal entities.
    pub key_field: KeyField,
    /// Whether key comparison is case sensitive.
    pub case_sensitive: bool,
    /// Declared correlation rule, overriding the default key lookup.
    pub correlation_rule: Option<Arc<dyn CorrelationRule>>,
    /// Value transform applied to the resolved key before lookup.
    pub key_transform: Option<Arc<dyn Fn(&str) -> String + Send + Sync>>,
}

impl Provision {
    /// Create a provision with default key lookup (by unique field).
    pub fn new(
        entity_kind: EntityKind,
        object_class: impl Into<String>,
        key_field: KeyField,
    ) -> Self {
        Self {
            entity_kind,
            object_class: object_class.into(),
            key_attribute: None,
            key_field,
            case_sensitive: true,
            correlation_rule: None,
            key_transform: None,
        }
    }

    /// Designate the key attribute in the external object.
    #[must_use]
    pub fn with_key_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.key_attribute = Some(attribute.into());
        self
    }

    /// Set case sensitivity for key comparison.
    #[must_use]
    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    /// Attach a declared correlation rule.
    #[must_use]
    pub fn with_correlation_rule(mut self, rule: Arc<dyn CorrelationRule>) -> Self {
        self.correlation_rule = Some(rule);
        self
    }

    /// Attach a value transform applied to the key before lookup.
    #[must_use]
    pub fn with_key_transform(
        mut self,
        transform: Arc<dyn Fn(&str) -> String + Send + Sync>,
    ) -> Self {
        self.key_transform = Some(transform);
        self
    }
}

impl std::fmt::Debug for Provision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provision")
            .field("entity_kind", &self.entity_kind)
            .field("object_class", &self.object_class)
            .field("key_attribute", &self.key_attribute)
            .field("key_field", &self.key_field)
            .field("case_sensitive", &self.case_sensitive)
            .field("correlation_rule", &self.correlation_rule.is_some())
            .field("key_transform", &self.key_transform.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults() {
        let policy = ReconciliationPolicy::default();
        assert_eq!(policy.unmatching_rule, UnmatchingRule::Assign);
        assert_eq!(policy.matching_rule, MatchingRule::Update);
        assert_eq!(
            policy.conflict_resolution,
            ConflictResolutionAction::Ignore
        );
        assert!(policy.perform_create);
        assert!(!policy.dry_run);
        assert!(!policy.remediation);
    }

    #[test]
    fn test_policy_serde_defaults() {
        let policy: ReconciliationPolicy = serde_json::from_str(
            r#"{"unmatching_rule": "assign", "matching_rule": "update"}"#,
        )
        .unwrap();
        assert!(policy.perform_delete);
        assert_eq!(
            policy.conflict_resolution,
            ConflictResolutionAction::Ignore
        );
    }

    #[test]
    fn test_provision_builder() {
        let provision = Provision::new(
            EntityKind::User,
            "account",
            KeyField::UniqueField("username".to_string()),
        )
        .with_key_attribute("uid")
        .with_case_sensitive(false)
        .with_key_transform(Arc::new(|v| v.trim().to_string()));

        assert_eq!(provision.object_class, "account");
        assert_eq!(provision.key_attribute.as_deref(), Some("uid"));
        assert!(!provision.case_sensitive);
        let transform = provision.key_transform.as_ref().unwrap();
        assert_eq!(transform("  jdoe "), "jdoe");
    }

    #[test]
    fn test_entity_kind_display() {
        assert_eq!(EntityKind::User.to_string(), "user");
        assert_eq!(EntityKind::Realm.to_string(), "realm");
    }
}
