//! Correlation & matching engine.
//!
//! Resolves identity between an external representation and internal
//! entities, in both directions, via either a declared correlation rule
//! or a default key/attribute lookup.
//!
//! The "more than one match" case is deliberately not resolved here: the
//! correct tie-break (ignore / first / last) is a policy decision that
//! belongs to the reconciliation state machine, so the engine surfaces
//! the full list.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use idsync_connector::{AttributeSet, ExternalObject, Filter, OperationOptions, SearchOp};

use crate::error::{ReconError, ReconResult};
use crate::policy::{EntityKind, KeyField, Provision, RealmKeying};

/// An internal entity as held by the authoritative store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalEntity {
    /// Primary identifier.
    pub key: Uuid,
    /// Entity kind.
    pub kind: EntityKind,
    /// Display name.
    pub name: String,
    /// Attribute values.
    pub attributes: AttributeSet,
}

impl InternalEntity {
    /// Create an entity.
    pub fn new(key: Uuid, kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            key,
            kind,
            name: name.into(),
            attributes: AttributeSet::new(),
        }
    }

    /// Attach attributes using builder pattern.
    #[must_use]
    pub fn with_attributes(mut self, attributes: AttributeSet) -> Self {
        self.attributes = attributes;
        self
    }
}

/// A lookup against the authoritative store.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityQuery {
    /// Look up by primary identifier.
    ById(Uuid),
    /// Look up by a designated unique field.
    UniqueField {
        /// Field name.
        field: String,
        /// Expected value.
        value: String,
        /// Whether comparison is case sensitive.
        case_sensitive: bool,
    },
    /// Look up by a mapped custom attribute.
    Attribute {
        /// Attribute name.
        name: String,
        /// Expected value.
        value: String,
        /// Whether comparison is case sensitive.
        case_sensitive: bool,
    },
}

/// Port onto the authoritative store for correlation lookups.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Run a query for entities of one kind.
    async fn query(&self, kind: EntityKind, query: &EntityQuery)
        -> ReconResult<Vec<InternalEntity>>;

    /// Find a linked subordinate account bound to the given external
    /// system and key value, if any.
    async fn find_linked_account(
        &self,
        resource: &str,
        key_value: &str,
    ) -> ReconResult<Option<InternalEntity>>;

    /// Look up an organizational unit by full path.
    async fn find_realm_by_path(&self, path: &str) -> ReconResult<Option<InternalEntity>>;
}

/// What a correlation attempt resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTarget {
    /// A first-class internal entity.
    InternalEntity,
    /// A secondary account owned by an internal entity, reconciled with
    /// abbreviated lifecycle rules.
    LinkedAccount,
}

/// Outcome of one correlation attempt.
///
/// Absence of matches is represented by a single sentinel, never by an
/// empty list, so callers can distinguish "found nothing" from "not yet
/// searched".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    /// What the match points at.
    pub target: MatchTarget,
    /// The matched entity, or `None` for the sentinel.
    pub entity: Option<InternalEntity>,
}

impl Match {
    /// A real match against an internal entity.
    pub fn entity(entity: InternalEntity) -> Self {
        Self {
            target: MatchTarget::InternalEntity,
            entity: Some(entity),
        }
    }

    /// A real match against a linked subordinate account.
    pub fn linked_account(entity: InternalEntity) -> Self {
        Self {
            target: MatchTarget::LinkedAccount,
            entity: Some(entity),
        }
    }

    /// The no-match sentinel.
    pub fn no_match() -> Self {
        Self {
            target: MatchTarget::InternalEntity,
            entity: None,
        }
    }

    /// Whether this is a real match (not the sentinel).
    pub fn is_real(&self) -> bool {
        self.entity.is_some()
    }
}

/// Pluggable correlation logic declared per provision.
#[async_trait]
pub trait CorrelationRule: Send + Sync {
    /// Build an authoritative-store query for an observed object.
    fn build_query(
        &self,
        object: &ExternalObject,
        provision: &Provision,
    ) -> ReconResult<EntityQuery>;

    /// Fallback consulted when the rule's query yields no result.
    async fn unmatched(
        &self,
        _object: &ExternalObject,
        _provision: &Provision,
    ) -> Option<Match> {
        None
    }

    /// Build an external-system filter for an internal entity, for
    /// outbound correlation. `None` falls back to the key lookup.
    fn build_filter(
        &self,
        _entity: &InternalEntity,
        _provision: &Provision,
    ) -> Option<Filter> {
        None
    }
}

/// The correlation & matching engine for one external system.
pub struct MatchingEngine<S: EntityStore> {
    store: Arc<S>,
    resource: String,
}

impl<S: EntityStore> MatchingEngine<S> {
    /// Create an engine bound to one external system.
    pub fn new(store: Arc<S>, resource: impl Into<String>) -> Self {
        Self {
            store,
            resource: resource.into(),
        }
    }

    /// The external system this engine correlates against.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Resolve an external object to internal entities.
    ///
    /// Never returns an empty list and never fails: a malformed key
    /// mapping or a throwing correlation rule is logged and degraded to
    /// the sentinel for that object only, so one bad delta cannot abort
    /// a whole batch.
    pub async fn match_inbound(&self, object: &ExternalObject, provision: &Provision) -> Vec<Match> {
        let matches = if let Some(rule) = &provision.correlation_rule {
            self.match_by_rule(rule.as_ref(), object, provision).await
        } else {
            self.match_by_key(object, provision).await
        };

        match matches {
            Ok(list) if list.iter().any(Match::is_real) => list,
            Ok(_) => vec![Match::no_match()],
            Err(e) => {
                warn!(
                    object = %object,
                    error = %e,
                    "Correlation failed, treating as no match"
                );
                vec![Match::no_match()]
            }
        }
    }

    /// Discover the pre-existing external state for an internal entity
    /// ("before object"), so outbound updates can be computed as deltas.
    pub async fn match_outbound<C: SearchOp + ?Sized>(
        &self,
        connector: &C,
        entity: &InternalEntity,
        provision: &Provision,
    ) -> ReconResult<Vec<ExternalObject>> {
        let filter = provision
            .correlation_rule
            .as_ref()
            .and_then(|rule| rule.build_filter(entity, provision))
            .unwrap_or_else(|| {
                let value = self.outbound_key_value(entity, provision);
                Filter::eq(
                    provision.key_attribute.clone().unwrap_or_else(|| "uid".to_string()),
                    value,
                )
            });

        let found = connector
            .get_object(&provision.object_class, &filter, &OperationOptions::new())
            .await?;
        Ok(found.into_iter().collect())
    }

    /// Resolve an external object to organizational units, keyed by full
    /// path, name, or internal identifier per configuration.
    pub async fn match_by_realm_path(
        &self,
        object: &ExternalObject,
        keying: RealmKeying,
    ) -> Vec<Match> {
        let result = match keying {
            RealmKeying::FullPath => {
                let path = object
                    .get_string("path")
                    .map(str::to_string)
                    .unwrap_or_else(|| object.name.clone());
                self.store.find_realm_by_path(&path).await.map(|found| {
                    found.into_iter().map(Match::entity).collect::<Vec<_>>()
                })
            }
            RealmKeying::Name => {
                let query = EntityQuery::UniqueField {
                    field: "name".to_string(),
                    value: object.name.clone(),
                    case_sensitive: true,
                };
                self.store
                    .query(EntityKind::Realm, &query)
                    .await
                    .map(|found| found.into_iter().map(Match::entity).collect())
            }
            RealmKeying::InternalId => match Uuid::parse_str(&object.uid) {
                Ok(id) => self
                    .store
                    .query(EntityKind::Realm, &EntityQuery::ById(id))
                    .await
                    .map(|found| found.into_iter().map(Match::entity).collect()),
                Err(_) => {
                    warn!(uid = %object.uid, "Realm UID is not a valid internal id");
                    Ok(Vec::new())
                }
            },
        };

        match result {
            Ok(list) if !list.is_empty() => list,
            Ok(_) => vec![Match::no_match()],
            Err(e) => {
                warn!(object = %object, error = %e, "Realm lookup failed, treating as no match");
                vec![Match::no_match()]
            }
        }
    }

    async fn match_by_rule(
        &self,
        rule: &dyn CorrelationRule,
        object: &ExternalObject,
        provision: &Provision,
    ) -> ReconResult<Vec<Match>> {
        let query = rule.build_query(object, provision).map_err(|e| {
            ReconError::correlation_rule(format!("query construction failed: {e}"))
        })?;

        let found = self.store.query(provision.entity_kind, &query).await?;
        if found.is_empty() {
            // The rule's own fallback may still produce a match.
            if let Some(fallback) = rule.unmatched(object, provision).await {
                return Ok(vec![fallback]);
            }
            return Ok(Vec::new());
        }
        Ok(found.into_iter().map(Match::entity).collect())
    }

    async fn match_by_key(
        &self,
        object: &ExternalObject,
        provision: &Provision,
    ) -> ReconResult<Vec<Match>> {
        let key_value = self.inbound_key_value(object, provision);
        debug!(object = %object, key = %key_value, "Default key lookup");

        let query = match &provision.key_field {
            KeyField::PrimaryId => match Uuid::parse_str(&key_value) {
                Ok(id) => EntityQuery::ById(id),
                Err(_) => {
                    warn!(
                        object = %object,
                        key = %key_value,
                        "Key value is not a valid primary identifier"
                    );
                    return Ok(Vec::new());
                }
            },
            KeyField::UniqueField(field) => EntityQuery::UniqueField {
                field: field.clone(),
                value: key_value.clone(),
                case_sensitive: provision.case_sensitive,
            },
            KeyField::CustomAttribute(name) => EntityQuery::Attribute {
                name: name.clone(),
                value: key_value.clone(),
                case_sensitive: provision.case_sensitive,
            },
        };

        let mut matches: Vec<Match> = self
            .store
            .query(provision.entity_kind, &query)
            .await?
            .into_iter()
            .map(Match::entity)
            .collect();

        // A subordinate account bound to the same system and key is a
        // second, abbreviated-lifecycle match.
        if let Some(linked) = self
            .store
            .find_linked_account(&self.resource, &key_value)
            .await?
        {
            matches.push(Match::linked_account(linked));
        }

        Ok(matches)
    }

    /// Resolve the key value of an observed object: the designated key
    /// attribute when present, the external UID otherwise, with the
    /// configured transform applied.
    fn inbound_key_value(&self, object: &ExternalObject, provision: &Provision) -> String {
        let raw = provision
            .key_attribute
            .as_deref()
            .and_then(|attr| object.get_string(attr))
            .unwrap_or(&object.uid);
        match &provision.key_transform {
            Some(transform) => transform(raw),
            None => raw.to_string(),
        }
    }

    /// Compute the mapped key value for an internal entity.
    fn outbound_key_value(&self, entity: &InternalEntity, provision: &Provision) -> String {
        let raw = match &provision.key_field {
            KeyField::PrimaryId => entity.key.to_string(),
            KeyField::UniqueField(field) | KeyField::CustomAttribute(field) => entity
                .attributes
                .get_string(field)
                .map(str::to_string)
                .unwrap_or_else(|| entity.name.clone()),
        };
        match &provision.key_transform {
            Some(transform) => transform(&raw),
            None => raw,
        }
    }
}
