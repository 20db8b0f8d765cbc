//! Object graph implementation
//!
//! This module implements the managed-node data model with:
//! - Entities, actions and relationships sharing one node record shape
//! - A typed property bag and a group tag set on every node
//! - Cascade delete from entities to the actions and relationships naming them
//! - Serial, atomic saves followed by change notification

pub mod context;
pub mod edge;
pub mod event;
pub mod handle;
pub mod node;
pub mod property;
pub mod queue;
pub mod store;
pub mod transaction;
pub mod types;
pub mod watch;

// Re-export main types
pub use context::Graph;
pub use edge::{NodeLinks, Role};
pub use event::{ChangeEvent, ChangeKind};
pub use handle::{Action, Entity, NodeHandle, Relationship};
pub use node::{NodeRecord, NodeSnapshot, TagSet};
pub use property::{PropertyMap, PropertyValue};
pub use store::{BackRefIndex, GraphError, GraphResult, GraphStore};
pub use transaction::CommitReport;
pub use types::{NodeClass, NodeId};
pub use watch::{GraphObserver, ObserverError, ObserverId, Watch, WatchRegistry};
