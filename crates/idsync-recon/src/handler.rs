//! Per-kind reconciliation state machine.
//!
//! One [`ReconHandler`] per provision maps a match outcome plus policy
//! to a concrete lifecycle operation, executes it through the entity's
//! [`EntityAdapter`], classifies the result, and isolates failures so a
//! single bad object never aborts a batch.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use idsync_connector::{ChangeEvent, ExternalObject};

use crate::actions::{run_before, run_on_error, Flow, ReconActions};
use crate::dispatch::{UnitHandler, WorkUnit};
use crate::error::{ReconError, ReconResult};
use crate::matching::{EntityStore, InternalEntity, Match, MatchTarget, MatchingEngine};
use crate::policy::{
    ConflictResolutionAction, EntityKind, MatchingRule, Provision, ReconciliationPolicy,
    UnmatchingRule,
};
use crate::remediation::{Remediation, RemediationStore};
use crate::report::{Operation, ProvisioningReport, ReportSink, ReportStatus};
use crate::workflow::{EntityRequest, WorkflowOutcome};

/// Terminal outcome of handling one object.
///
/// An explicit sum type instead of exception control flow: the caller
/// decides what each variant means for token advancement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The operation executed (or was classified, in dry-run).
    Applied(Operation),
    /// Processing was skipped with a recoverable outcome.
    Ignored(String),
    /// The operation failed.
    Failed(String),
}

impl Disposition {
    /// Whether it is safe to advance the sync token past this object.
    pub fn advances_token(&self) -> bool {
        !matches!(self, Disposition::Failed(_))
    }
}

/// Capability set one entity kind exposes to the state machine.
///
/// Implementations delegate to the embedding application's workflow
/// layer; create/update/delete return the affected key together with the
/// outcomes of any downstream propagations the change triggered.
#[async_trait]
pub trait EntityAdapter: Send + Sync {
    /// Build the workflow request for an observed object.
    fn request_from(&self, object: &ExternalObject, resource: &str) -> EntityRequest;

    /// Create the internal entity.
    async fn create(&self, request: &EntityRequest) -> ReconResult<WorkflowOutcome>;

    /// Apply an attribute delta to an existing entity.
    async fn update(&self, request: &EntityRequest) -> ReconResult<WorkflowOutcome>;

    /// Delete the internal entity.
    async fn delete(&self, key: Uuid) -> ReconResult<WorkflowOutcome>;

    /// Record the link between the entity and an external object.
    async fn link(&self, key: Uuid, resource: &str, uid: &str) -> ReconResult<()>;

    /// Remove the link.
    async fn unlink(&self, key: Uuid, resource: &str) -> ReconResult<()>;

    /// Remove the external-system object, keeping the entity.
    async fn deprovision(&self, key: Uuid, resource: &str) -> ReconResult<WorkflowOutcome>;
}

/// The reconciliation state machine for one provision.
pub struct ReconHandler<A: EntityAdapter, S: EntityStore> {
    run_id: Uuid,
    provision: Provision,
    policy: ReconciliationPolicy,
    adapter: Arc<A>,
    matching: Arc<MatchingEngine<S>>,
    actions: Vec<Arc<dyn ReconActions>>,
    reports: Arc<ReportSink>,
    remediation: Option<Arc<dyn RemediationStore>>,
}

impl<A: EntityAdapter, S: EntityStore> ReconHandler<A, S> {
    /// Create a handler for one provision.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: Uuid,
        provision: Provision,
        policy: ReconciliationPolicy,
        adapter: Arc<A>,
        matching: Arc<MatchingEngine<S>>,
        actions: Vec<Arc<dyn ReconActions>>,
        reports: Arc<ReportSink>,
        remediation: Option<Arc<dyn RemediationStore>>,
    ) -> Self {
        Self {
            run_id,
            provision,
            policy,
            adapter,
            matching,
            actions,
            reports,
            remediation,
        }
    }

    /// The object class this handler reconciles.
    pub fn object_class(&self) -> &str {
        &self.provision.object_class
    }

    /// Handle one change event from an incremental or live stream.
    pub async fn handle_event(&self, event: &ChangeEvent) -> Disposition {
        if event.is_delete() {
            // Deletions carry no object snapshot; correlate by UID.
            let skeleton =
                ExternalObject::new(event.object_class.clone(), event.uid.clone(), event.uid.clone());
            return self.handle_delete(&skeleton).await;
        }
        match &event.object {
            Some(object) => self.handle_object(object).await,
            None => {
                warn!(uid = %event.uid, kind = %event.kind, "Delta without object payload");
                let report = ProvisioningReport::new(
                    self.provision.entity_kind,
                    Operation::None,
                    ReportStatus::Ignore,
                    event.uid.clone(),
                    event.uid.clone(),
                )
                .with_message("delta without object payload");
                self.finish(report, Disposition::Ignored("delta without object".into()))
                    .await
            }
        }
    }

    /// Handle one observed object (full or filtered reconciliation).
    pub async fn handle_object(&self, object: &ExternalObject) -> Disposition {
        let matches = self.matching.match_inbound(object, &self.provision).await;
        let real: Vec<&Match> = matches.iter().filter(|m| m.is_real()).collect();
        debug!(object = %object, matches = real.len(), "Correlated object");

        if real.is_empty() {
            let operation = match self.policy.unmatching_rule {
                UnmatchingRule::Assign => Operation::Create,
                UnmatchingRule::Provision => Operation::Provision,
                UnmatchingRule::Unlink | UnmatchingRule::Ignore => Operation::None,
            };
            return self.execute(operation, object, None).await;
        }

        let selected = match self.resolve_conflict(&real) {
            Ok(selected) => selected,
            Err(reason) => {
                let report = ProvisioningReport::new(
                    self.provision.entity_kind,
                    Operation::None,
                    ReportStatus::Ignore,
                    object.uid.clone(),
                    object.name.clone(),
                )
                .with_message(reason.clone());
                return self.finish(report, Disposition::Ignored(reason)).await;
            }
        };

        let mut operation = match self.policy.matching_rule {
            MatchingRule::Update => Operation::Update,
            MatchingRule::Deprovision => Operation::Deprovision,
            MatchingRule::Unassign => Operation::Unassign,
            MatchingRule::Link => Operation::Link,
            MatchingRule::Unlink => Operation::Unlink,
            MatchingRule::Ignore => Operation::None,
        };
        if selected.target == MatchTarget::LinkedAccount {
            operation = abbreviate(operation);
        }
        let entity = selected.entity.clone();
        self.execute(operation, object, entity).await
    }

    /// Handle a deletion: matched entities are deleted (policy flags and
    /// hooks apply), unmatched deletions are a no-op.
    async fn handle_delete(&self, object: &ExternalObject) -> Disposition {
        let matches = self.matching.match_inbound(object, &self.provision).await;
        let real: Vec<&Match> = matches.iter().filter(|m| m.is_real()).collect();

        if real.is_empty() {
            let report = ProvisioningReport::new(
                self.provision.entity_kind,
                Operation::None,
                ReportStatus::Ignore,
                object.uid.clone(),
                object.name.clone(),
            )
            .with_message("no matching entity for deletion");
            return self
                .finish(report, Disposition::Ignored("unmatched delete".into()))
                .await;
        }

        let selected = match self.resolve_conflict(&real) {
            Ok(selected) => selected,
            Err(reason) => {
                let report = ProvisioningReport::new(
                    self.provision.entity_kind,
                    Operation::None,
                    ReportStatus::Ignore,
                    object.uid.clone(),
                    object.name.clone(),
                )
                .with_message(reason.clone());
                return self.finish(report, Disposition::Ignored(reason)).await;
            }
        };

        let entity = selected.entity.clone();
        self.execute(Operation::Delete, object, entity).await
    }

    /// Apply the conflict resolution action when more than one real
    /// match came back. Truncation is deterministic by list position.
    fn resolve_conflict<'m>(&self, real: &[&'m Match]) -> Result<&'m Match, String> {
        if real.len() == 1 {
            return Ok(real[0]);
        }
        match self.policy.conflict_resolution {
            ConflictResolutionAction::Ignore => Err(format!(
                "ignored: {} matching entities found",
                real.len()
            )),
            ConflictResolutionAction::FirstMatch => Ok(real[0]),
            ConflictResolutionAction::LastMatch => Ok(real[real.len() - 1]),
        }
    }

    /// Execute one operation with the full execution contract: permission
    /// flags, dry-run, before hooks, workflow call, propagation-failure
    /// isolation, error-hook conversion, remediation masking, after hooks.
    async fn execute(
        &self,
        operation: Operation,
        object: &ExternalObject,
        entity: Option<InternalEntity>,
    ) -> Disposition {
        let kind = self.provision.entity_kind;

        if operation == Operation::None {
            let report = ProvisioningReport::new(
                kind,
                Operation::None,
                ReportStatus::Ignore,
                object.uid.clone(),
                object.name.clone(),
            );
            return self.finish(report, Disposition::Ignored("no-op by policy".into())).await;
        }

        if !self.permitted(operation) {
            // Disabled operations still run the no-op notification path
            // so audit consumers see the task ran.
            let report = ProvisioningReport::new(
                kind,
                operation,
                ReportStatus::Ignore,
                object.uid.clone(),
                object.name.clone(),
            )
            .with_message(format!("{operation} not permitted by policy"));
            return self
                .finish(report, Disposition::Ignored(format!("{operation} not permitted")))
                .await;
        }

        if self.policy.dry_run {
            // Classification only; no hooks, no workflow.
            let mut report = ProvisioningReport::new(
                kind,
                operation,
                ReportStatus::None,
                object.uid.clone(),
                object.name.clone(),
            )
            .with_message("dry run");
            if let Some(entity) = &entity {
                report = report.with_entity_key(entity.key);
            }
            self.reports.append(report);
            return Disposition::Applied(operation);
        }

        let resource = self.matching.resource().to_string();
        let mut request = self.adapter.request_from(object, &resource);
        if let Some(entity) = &entity {
            request = request.with_key(entity.key);
        }

        match run_before(&self.actions, operation, Some(object), &mut request).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Ignore(reason)) => {
                let report = ProvisioningReport::new(
                    kind,
                    operation,
                    ReportStatus::Ignore,
                    object.uid.clone(),
                    object.name.clone(),
                )
                .with_message(reason.clone());
                return self.finish(report, Disposition::Ignored(reason)).await;
            }
            Err(e) => return self.failed(operation, object, request, e).await,
        }

        match self.run_operation(operation, object, &entity, &request).await {
            Ok((key, propagation_failures)) => {
                let mut report = ProvisioningReport::new(
                    kind,
                    operation,
                    ReportStatus::Success,
                    object.uid.clone(),
                    object.name.clone(),
                );
                if let Some(key) = key {
                    report = report.with_entity_key(key);
                }
                // A downstream propagation failure does not downgrade the
                // reconciliation outcome; the authoritative state is
                // correct. The failures are carried on the record itself.
                if !propagation_failures.is_empty() {
                    report = report
                        .with_message(format!(
                            "propagation failure: {}",
                            propagation_failures.join("; ")
                        ))
                        .with_propagation_failures(propagation_failures);
                }
                info!(
                    object = %object,
                    operation = %operation,
                    "Reconciled object"
                );
                self.finish(report, Disposition::Applied(operation)).await
            }
            Err(e) => self.failed(operation, object, request, e).await,
        }
    }

    /// Invoke the adapter for one operation. Returns the affected key
    /// and any downstream propagation failure descriptions.
    async fn run_operation(
        &self,
        operation: Operation,
        object: &ExternalObject,
        entity: &Option<InternalEntity>,
        request: &EntityRequest,
    ) -> ReconResult<(Option<Uuid>, Vec<String>)> {
        let resource = self.matching.resource();
        match operation {
            Operation::Create => {
                let outcome = self.adapter.create(request).await?;
                self.adapter.link(outcome.key, resource, &object.uid).await?;
                Ok((Some(outcome.key), outcome.propagation_failures()))
            }
            Operation::Provision => {
                let outcome = self.adapter.create(request).await?;
                Ok((Some(outcome.key), outcome.propagation_failures()))
            }
            Operation::Update => {
                let outcome = self.adapter.update(request).await?;
                Ok((Some(outcome.key), outcome.propagation_failures()))
            }
            Operation::Delete => {
                let key = self.entity_key(entity)?;
                let outcome = self.adapter.delete(key).await?;
                Ok((Some(key), outcome.propagation_failures()))
            }
            Operation::Deprovision => {
                let key = self.entity_key(entity)?;
                let outcome = self.adapter.deprovision(key, resource).await?;
                Ok((Some(key), outcome.propagation_failures()))
            }
            Operation::Unassign => {
                let key = self.entity_key(entity)?;
                let outcome = self.adapter.deprovision(key, resource).await?;
                self.adapter.unlink(key, resource).await?;
                Ok((Some(key), outcome.propagation_failures()))
            }
            Operation::Link => {
                let key = self.entity_key(entity)?;
                self.adapter.link(key, resource, &object.uid).await?;
                Ok((Some(key), Vec::new()))
            }
            Operation::Unlink => {
                let key = self.entity_key(entity)?;
                self.adapter.unlink(key, resource).await?;
                Ok((Some(key), Vec::new()))
            }
            Operation::None => Ok((None, Vec::new())),
        }
    }

    fn entity_key(&self, entity: &Option<InternalEntity>) -> ReconResult<Uuid> {
        entity
            .as_ref()
            .map(|e| e.key)
            .ok_or_else(|| ReconError::workflow("operation requires a matched entity"))
    }

    fn permitted(&self, operation: Operation) -> bool {
        match operation {
            Operation::Create | Operation::Provision => self.policy.perform_create,
            Operation::Update => self.policy.perform_update,
            Operation::Delete | Operation::Deprovision | Operation::Unassign => {
                self.policy.perform_delete
            }
            Operation::Link | Operation::Unlink | Operation::None => true,
        }
    }

    /// Classify a failed operation: error hooks may convert it to a
    /// recoverable ignore; remediation masks it so incremental mode
    /// keeps advancing instead of stalling on one bad object.
    async fn failed(
        &self,
        operation: Operation,
        object: &ExternalObject,
        request: EntityRequest,
        error: ReconError,
    ) -> Disposition {
        if let Some(Flow::Ignore(reason)) =
            run_on_error(&self.actions, Some(object), &error).await
        {
            let report = ProvisioningReport::new(
                self.provision.entity_kind,
                operation,
                ReportStatus::Ignore,
                object.uid.clone(),
                object.name.clone(),
            )
            .with_message(reason.clone());
            return self.finish(report, Disposition::Ignored(reason)).await;
        }

        // Referential-integrity refusals always surface as failures.
        let remediable = !matches!(error, ReconError::ReferentialIntegrity(_));
        if self.policy.remediation && remediable {
            if let Some(store) = &self.remediation {
                let remediation =
                    Remediation::new(self.run_id, operation, request, error.to_string());
                let remediation_id = remediation.id;
                match store.create(remediation).await {
                    Ok(()) => {
                        warn!(
                            object = %object,
                            operation = %operation,
                            remediation_id = %remediation_id,
                            error = %error,
                            "Operation failed, remediation recorded"
                        );
                        let report = ProvisioningReport::new(
                            self.provision.entity_kind,
                            operation,
                            ReportStatus::Ignore,
                            object.uid.clone(),
                            object.name.clone(),
                        )
                        .with_message(format!("remediation {remediation_id}: {error}"));
                        return self
                            .finish(
                                report,
                                Disposition::Ignored(format!("remediated: {error}")),
                            )
                            .await;
                    }
                    Err(store_err) => {
                        warn!(error = %store_err, "Failed to persist remediation record");
                    }
                }
            }
        }

        let message = error.to_string();
        let report = ProvisioningReport::new(
            self.provision.entity_kind,
            operation,
            ReportStatus::Failure,
            object.uid.clone(),
            object.name.clone(),
        )
        .with_message(message.clone());
        self.finish(report, Disposition::Failed(message)).await
    }

    /// Append the report and run after hooks.
    async fn finish(&self, report: ProvisioningReport, disposition: Disposition) -> Disposition {
        for action in &self.actions {
            if let Err(e) = action.after(&report).await {
                warn!(error = %e, "After hook failed");
            }
        }
        self.reports.append(report);
        disposition
    }
}

#[async_trait]
impl<A: EntityAdapter + 'static, S: EntityStore + 'static> UnitHandler for ReconHandler<A, S> {
    fn kind(&self) -> EntityKind {
        self.provision.entity_kind
    }

    async fn handle(&self, unit: WorkUnit) -> Disposition {
        match unit {
            WorkUnit::Object(object) => self.handle_object(&object).await,
            WorkUnit::Delta(event) => self.handle_event(&event).await,
        }
    }
}

/// Restrict an operation to the abbreviated linked-account table:
/// create/update/delete only, since such accounts have no independent
/// lifecycle outside their owning entity.
fn abbreviate(operation: Operation) -> Operation {
    match operation {
        Operation::Update => Operation::Update,
        Operation::Deprovision | Operation::Unassign | Operation::Delete => Operation::Delete,
        Operation::Create | Operation::Provision => Operation::Provision,
        Operation::Link | Operation::Unlink | Operation::None => Operation::None,
    }
}
