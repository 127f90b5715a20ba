//! Pluggable action hooks.
//!
//! An ordered list of actions runs around every operation. A before hook
//! may transform the pending request or veto the object; vetoes are an
//! explicit [`Flow::Ignore`] value, not an error, and short-circuit
//! processing with a recoverable outcome.

use async_trait::async_trait;

use idsync_connector::ExternalObject;

use crate::error::{ReconError, ReconResult};
use crate::report::{Operation, ProvisioningReport, RunReport};
use crate::workflow::EntityRequest;

/// Control-flow decision returned by before hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Proceed with the operation.
    Continue,
    /// Skip this object with a recoverable ignore outcome.
    Ignore(String),
}

/// Hooks invoked around reconciliation operations.
///
/// All methods default to no-ops so implementations override only what
/// they need. Hooks run in registration order; the first `Ignore` wins.
#[async_trait]
#[allow(unused_variables)]
pub trait ReconActions: Send + Sync {
    /// Invoked once before any object class is processed.
    async fn before_all(&self) -> ReconResult<()> {
        Ok(())
    }

    /// Invoked before an assign (create + link).
    async fn before_assign(
        &self,
        object: Option<&ExternalObject>,
        request: &mut EntityRequest,
    ) -> ReconResult<Flow> {
        Ok(Flow::Continue)
    }

    /// Invoked before a provision (create only).
    async fn before_provision(
        &self,
        object: Option<&ExternalObject>,
        request: &mut EntityRequest,
    ) -> ReconResult<Flow> {
        Ok(Flow::Continue)
    }

    /// Invoked before an update.
    async fn before_update(
        &self,
        object: Option<&ExternalObject>,
        request: &mut EntityRequest,
    ) -> ReconResult<Flow> {
        Ok(Flow::Continue)
    }

    /// Invoked before a link.
    async fn before_link(
        &self,
        object: Option<&ExternalObject>,
        request: &mut EntityRequest,
    ) -> ReconResult<Flow> {
        Ok(Flow::Continue)
    }

    /// Invoked before an unlink.
    async fn before_unlink(
        &self,
        object: Option<&ExternalObject>,
        request: &mut EntityRequest,
    ) -> ReconResult<Flow> {
        Ok(Flow::Continue)
    }

    /// Invoked before a deprovision.
    async fn before_deprovision(
        &self,
        object: Option<&ExternalObject>,
        request: &mut EntityRequest,
    ) -> ReconResult<Flow> {
        Ok(Flow::Continue)
    }

    /// Invoked before an unassign.
    async fn before_unassign(
        &self,
        object: Option<&ExternalObject>,
        request: &mut EntityRequest,
    ) -> ReconResult<Flow> {
        Ok(Flow::Continue)
    }

    /// Invoked before a delete.
    async fn before_delete(
        &self,
        object: Option<&ExternalObject>,
        request: &mut EntityRequest,
    ) -> ReconResult<Flow> {
        Ok(Flow::Continue)
    }

    /// Invoked after each object with the finalized report record.
    async fn after(&self, report: &ProvisioningReport) -> ReconResult<()> {
        Ok(())
    }

    /// Invoked once after the whole run with the aggregated report.
    async fn after_all(&self, report: &RunReport) -> ReconResult<()> {
        Ok(())
    }

    /// Invoked when an operation fails. May convert the failure into a
    /// recoverable ignore by returning `Some(Flow::Ignore(..))`.
    async fn on_error(
        &self,
        object: Option<&ExternalObject>,
        error: &ReconError,
    ) -> Option<Flow> {
        None
    }
}

/// Dispatch a before hook by the operation being attempted.
pub async fn run_before(
    actions: &[std::sync::Arc<dyn ReconActions>],
    operation: Operation,
    object: Option<&ExternalObject>,
    request: &mut EntityRequest,
) -> ReconResult<Flow> {
    for action in actions {
        let flow = match operation {
            Operation::Create => action.before_assign(object, request).await?,
            Operation::Provision => action.before_provision(object, request).await?,
            Operation::Update => action.before_update(object, request).await?,
            Operation::Link => action.before_link(object, request).await?,
            Operation::Unlink => action.before_unlink(object, request).await?,
            Operation::Deprovision => action.before_deprovision(object, request).await?,
            Operation::Unassign => action.before_unassign(object, request).await?,
            Operation::Delete => action.before_delete(object, request).await?,
            Operation::None => Flow::Continue,
        };
        if let Flow::Ignore(reason) = flow {
            return Ok(Flow::Ignore(reason));
        }
    }
    Ok(Flow::Continue)
}

/// Run the error hooks; the first conversion to ignore wins.
pub async fn run_on_error(
    actions: &[std::sync::Arc<dyn ReconActions>],
    object: Option<&ExternalObject>,
    error: &ReconError,
) -> Option<Flow> {
    for action in actions {
        if let Some(flow) = action.on_error(object, error).await {
            return Some(flow);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::EntityKind;
    use idsync_connector::AttributeSet;
    use std::sync::Arc;

    struct VetoUpdates;

    #[async_trait]
    impl ReconActions for VetoUpdates {
        async fn before_update(
            &self,
            _object: Option<&ExternalObject>,
            _request: &mut EntityRequest,
        ) -> ReconResult<Flow> {
            Ok(Flow::Ignore("updates are frozen".to_string()))
        }
    }

    struct Renamer;

    #[async_trait]
    impl ReconActions for Renamer {
        async fn before_assign(
            &self,
            _object: Option<&ExternalObject>,
            request: &mut EntityRequest,
        ) -> ReconResult<Flow> {
            request.name = format!("ext-{}", request.name);
            Ok(Flow::Continue)
        }
    }

    fn request() -> EntityRequest {
        EntityRequest::create(EntityKind::User, "jdoe", "ldap-prod", AttributeSet::new())
    }

    #[tokio::test]
    async fn test_first_ignore_wins() {
        let actions: Vec<Arc<dyn ReconActions>> =
            vec![Arc::new(Renamer), Arc::new(VetoUpdates)];
        let mut req = request();

        let flow = run_before(&actions, Operation::Update, None, &mut req)
            .await
            .unwrap();
        assert_eq!(flow, Flow::Ignore("updates are frozen".to_string()));

        // A different operation passes through the veto.
        let flow = run_before(&actions, Operation::Create, None, &mut req)
            .await
            .unwrap();
        assert_eq!(flow, Flow::Continue);
        assert_eq!(req.name, "ext-jdoe");
    }

    struct ConvertToIgnore;

    #[async_trait]
    impl ReconActions for ConvertToIgnore {
        async fn on_error(
            &self,
            _object: Option<&ExternalObject>,
            error: &ReconError,
        ) -> Option<Flow> {
            Some(Flow::Ignore(format!("converted: {error}")))
        }
    }

    #[tokio::test]
    async fn test_on_error_conversion() {
        let actions: Vec<Arc<dyn ReconActions>> = vec![Arc::new(ConvertToIgnore)];
        let err = ReconError::workflow("boom");
        let flow = run_on_error(&actions, None, &err).await;
        assert_eq!(
            flow,
            Some(Flow::Ignore("converted: workflow error: boom".to_string()))
        );

        let none: Vec<Arc<dyn ReconActions>> = vec![Arc::new(Renamer)];
        assert_eq!(run_on_error(&none, None, &err).await, None);
    }
}
