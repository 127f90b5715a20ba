//! Connector capability traits
//!
//! Capability-based trait definitions for connectors. A connector only
//! implements the capabilities its target system supports; the engine
//! requests the capability it needs per interaction mode.

use async_trait::async_trait;

use crate::change::{ChangeEvent, SyncToken};
use crate::error::ConnectorResult;
use crate::object::{ExternalObject, Filter};

/// Options applied to a search or sync invocation.
#[derive(Debug, Clone, Default)]
pub struct OperationOptions {
    /// Maximum objects/events per page fetched from the target system.
    pub page_size: Option<u32>,
    /// Attributes to retrieve; `None` means all.
    pub attributes_to_get: Option<Vec<String>>,
}

impl OperationOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }
}

/// Callback receiving enumerated objects one at a time.
///
/// Returning `false` stops the enumeration cooperatively.
#[async_trait]
pub trait ObjectHandler: Send + Sync {
    /// Handle one observed object. Return `false` to stop enumeration.
    async fn handle(&self, object: ExternalObject) -> bool;
}

/// Callback receiving change events one at a time, in stream order.
///
/// Returning `false` stops delivery cooperatively.
#[async_trait]
pub trait DeltaHandler: Send + Sync {
    /// Handle one change event. Return `false` to stop delivery.
    async fn handle(&self, event: ChangeEvent) -> bool;
}

/// Base trait for all connectors.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Display name for this connector instance, for reports and logs.
    fn display_name(&self) -> &str;

    /// Test the connection to the target system.
    async fn test_connection(&self) -> ConnectorResult<()>;
}

/// Capability for searching and retrieving objects in the target system.
#[async_trait]
pub trait SearchOp: Connector {
    /// Enumerate objects of one class, optionally filtered, delivering
    /// each to the handler in target-system order.
    async fn search(
        &self,
        object_class: &str,
        filter: Option<&Filter>,
        handler: &dyn ObjectHandler,
        options: &OperationOptions,
    ) -> ConnectorResult<()>;

    /// Fetch a single object by a key attribute filter.
    ///
    /// Returns `Ok(None)` when the object does not exist; errors are
    /// reserved for transport or configuration failures.
    async fn get_object(
        &self,
        object_class: &str,
        key: &Filter,
        options: &OperationOptions,
    ) -> ConnectorResult<Option<ExternalObject>>;
}

/// Capability for change-stream synchronization from the target system.
///
/// The sync token is an opaque string representing the synchronization
/// position. Different systems use different token formats (LDAP sync
/// cookie, AD DirSync cookie, sequence number, page cursor); the engine
/// persists and replays it verbatim.
#[async_trait]
pub trait SyncOp: Connector {
    /// Deliver change events after `token` to the handler, in stream
    /// order. Returns the latest token delivered, or `None` when no
    /// events were available.
    ///
    /// An initial sync (`token` is `None`) delivers all current objects
    /// as create events.
    async fn sync(
        &self,
        object_class: &str,
        token: Option<&SyncToken>,
        handler: &dyn DeltaHandler,
        options: &OperationOptions,
    ) -> ConnectorResult<Option<SyncToken>>;

    /// Enumerate every object of the class for full reconciliation.
    async fn full_reconciliation(
        &self,
        object_class: &str,
        handler: &dyn ObjectHandler,
        options: &OperationOptions,
    ) -> ConnectorResult<()>;

    /// Enumerate objects matching an externally supplied predicate.
    async fn filtered_reconciliation(
        &self,
        object_class: &str,
        filter: &Filter,
        handler: &dyn ObjectHandler,
        options: &OperationOptions,
    ) -> ConnectorResult<()>;

    /// One iteration of a live subscription: deliver whatever events are
    /// pending and return the new token. The caller loops with its own
    /// inter-iteration delay and stop flag.
    async fn livesync(
        &self,
        object_class: &str,
        token: Option<&SyncToken>,
        handler: &dyn DeltaHandler,
        options: &OperationOptions,
    ) -> ConnectorResult<Option<SyncToken>> {
        self.sync(object_class, token, handler, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeKind;
    use std::sync::Mutex;

    struct VecConnector {
        name: String,
        objects: Vec<ExternalObject>,
    }

    #[async_trait]
    impl Connector for VecConnector {
        fn display_name(&self) -> &str {
            &self.name
        }

        async fn test_connection(&self) -> ConnectorResult<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl SyncOp for VecConnector {
        async fn sync(
            &self,
            object_class: &str,
            token: Option<&SyncToken>,
            handler: &dyn DeltaHandler,
            _options: &OperationOptions,
        ) -> ConnectorResult<Option<SyncToken>> {
            let start: usize = token.map_or(0, |t| t.value().parse().unwrap_or(0));
            let mut last = None;
            for (i, obj) in self.objects.iter().enumerate().skip(start) {
                if obj.object_class != object_class {
                    continue;
                }
                let tok = SyncToken::new((i + 1).to_string());
                last = Some(tok.clone());
                if !handler.handle(ChangeEvent::created(obj.clone(), tok)).await {
                    break;
                }
            }
            Ok(last)
        }

        async fn full_reconciliation(
            &self,
            object_class: &str,
            handler: &dyn ObjectHandler,
            _options: &OperationOptions,
        ) -> ConnectorResult<()> {
            for obj in &self.objects {
                if obj.object_class == object_class && !handler.handle(obj.clone()).await {
                    break;
                }
            }
            Ok(())
        }

        async fn filtered_reconciliation(
            &self,
            object_class: &str,
            filter: &Filter,
            handler: &dyn ObjectHandler,
            _options: &OperationOptions,
        ) -> ConnectorResult<()> {
            for obj in &self.objects {
                if obj.object_class == object_class
                    && filter.matches(obj)
                    && !handler.handle(obj.clone()).await
                {
                    break;
                }
            }
            Ok(())
        }
    }

    struct Collect(Mutex<Vec<ChangeEvent>>);

    #[async_trait]
    impl DeltaHandler for Collect {
        async fn handle(&self, event: ChangeEvent) -> bool {
            self.0.lock().unwrap().push(event);
            true
        }
    }

    fn connector() -> VecConnector {
        VecConnector {
            name: "test".to_string(),
            objects: vec![
                ExternalObject::new("account", "u1", "One"),
                ExternalObject::new("account", "u2", "Two"),
                ExternalObject::new("group", "g1", "Admins"),
            ],
        }
    }

    #[tokio::test]
    async fn test_sync_resumes_from_token() {
        let c = connector();
        let sink = Collect(Mutex::new(Vec::new()));

        let token = c
            .sync("account", None, &sink, &OperationOptions::new())
            .await
            .unwrap();
        assert_eq!(sink.0.lock().unwrap().len(), 2);
        assert_eq!(token, Some(SyncToken::new("2")));

        // Resuming past the last token yields nothing new.
        let again = c
            .sync("account", token.as_ref(), &sink, &OperationOptions::new())
            .await
            .unwrap();
        assert_eq!(again, None);
        assert_eq!(sink.0.lock().unwrap().len(), 2);
        assert!(sink
            .0
            .lock()
            .unwrap()
            .iter()
            .all(|e| e.kind == ChangeKind::Create));
    }

    struct CountObjects(Mutex<usize>);

    #[async_trait]
    impl ObjectHandler for CountObjects {
        async fn handle(&self, _object: ExternalObject) -> bool {
            *self.0.lock().unwrap() += 1;
            true
        }
    }

    #[tokio::test]
    async fn test_filtered_reconciliation() {
        let c = connector();
        let count = CountObjects(Mutex::new(0));
        c.filtered_reconciliation(
            "account",
            &Filter::eq("uid", "u2"),
            &count,
            &OperationOptions::new(),
        )
        .await
        .unwrap();
        assert_eq!(*count.0.lock().unwrap(), 1);
    }
}
