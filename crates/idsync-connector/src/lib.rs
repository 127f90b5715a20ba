//! # Connector Abstraction
//!
//! Core abstractions for reaching external identity systems from the
//! reconciliation engine.
//!
//! This crate owns the boundary types the engine exchanges with a
//! connector: the external object model, change events with sync tokens,
//! search filters, and the capability-based trait family connectors
//! implement.
//!
//! ## Architecture
//!
//! The framework uses a capability-based trait system:
//!
//! - [`Connector`] - Base trait all connectors implement
//! - [`SearchOp`] - Search and single-object retrieval
//! - [`SyncOp`] - Incremental, full, filtered and live synchronization
//!
//! The engine never parses connector-specific wire formats; everything
//! crosses this boundary as [`ExternalObject`] snapshots or
//! [`ChangeEvent`] deltas carrying opaque [`SyncToken`] cursors.
//!
//! ## Crate Organization
//!
//! - [`object`] - `ExternalObject`, attribute values, filters
//! - [`change`] - Change events and sync tokens
//! - [`error`] - Error types with timeout/transient classification
//! - [`traits`] - Connector capability traits and result handlers

pub mod change;
pub mod error;
pub mod object;
pub mod traits;

pub use change::{ChangeEvent, ChangeKind, SyncToken};
pub use error::{ConnectorError, ConnectorResult};
pub use object::{AttributeSet, AttributeValue, ExternalObject, Filter};
pub use traits::{Connector, DeltaHandler, ObjectHandler, OperationOptions, SearchOp, SyncOp};
