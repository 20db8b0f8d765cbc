//! nodegraph
//!
//! An object-graph persistence layer: entities, actions and relationships
//! with typed property bags and group tags, cascade delete, atomic saves
//! and change notification on top of a transactional record store.
//!
//! # Architecture
//!
//! - [`graph`]: node records, the working state, cascade delete, the save
//!   queue and the watch registry
//! - [`persistence`]: the record-store interface plus in-memory and RocksDB
//!   implementations
//! - [`config`]: graph configuration, loadable from YAML
//!
//! Every mutation goes through one lock on the graph's working state and is
//! staged in memory. A save diffs the staged state against the last
//! committed image, writes the difference as one atomic batch, and then
//! notifies observers whose watch predicates match. Saves run one at a time
//! on a dedicated worker thread.
//!
//! ## Example Usage
//!
//! ```rust
//! use nodegraph::{ChangeEvent, Graph, ObserverError, Watch};
//! use std::sync::{Arc, Mutex};
//!
//! let graph = Graph::in_memory().unwrap();
//!
//! // Watch group changes on entities of type "Person"
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! let observer = graph.subscribe(move |event: &ChangeEvent| -> Result<(), ObserverError> {
//!     sink.lock().unwrap().push(event.kind.event_type());
//!     Ok(())
//! });
//! graph.watch(observer, Watch::entity().types(["Person"]).groups(["friends"])).unwrap();
//!
//! // Create nodes and link them
//! let alice = graph.create_entity("Person").unwrap();
//! let bob = graph.create_entity("Person").unwrap();
//! alice.set("name", "Alice");
//! alice.add_to_group("friends");
//! let knows = graph.create_relationship("knows", &alice, &bob).unwrap();
//!
//! // Commit; observers have run by the time save returns
//! let report = graph.save().unwrap();
//! assert_eq!(report.inserted.len(), 3);
//! assert!(seen.lock().unwrap().contains(&"group:added"));
//!
//! // Deleting an entity takes its relationships with it
//! alice.delete();
//! graph.save().unwrap();
//! assert!(!knows.is_live());
//! assert!(bob.is_live());
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod graph;
pub mod persistence;

// Re-export main types for convenience
pub use config::GraphConfig;

pub use graph::{
    Action, ChangeEvent, ChangeKind, CommitReport, Entity, Graph, GraphError, GraphObserver, GraphResult,
    NodeClass, NodeHandle, NodeId, NodeRecord, NodeSnapshot, ObserverError, ObserverId, PropertyMap, PropertyValue,
    Relationship, Role, TagSet, Watch,
};

pub use persistence::{
    MemoryStore, NodeRow, PropertyRow, Record, RecordKey, RecordStore, RocksStore, StoreError, StoreResult, TagRow,
    WriteBatch, WriteOp,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}
