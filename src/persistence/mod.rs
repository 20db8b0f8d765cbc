//! Record-store layer for the object graph
//!
//! The graph persists each node as three kinds of rows:
//! - a node row (id, type, timestamp, links)
//! - one property row per property
//! - one tag row per group membership
//!
//! A [`RecordStore`] only has to load rows, fetch node rows by class and
//! type, and apply a [`WriteBatch`] atomically. Cascades, diffing and
//! notification all live above this layer.

pub mod memory;
pub mod storage;

pub use memory::MemoryStore;
pub use storage::RocksStore;

use crate::graph::{NodeClass, NodeId, NodeLinks, NodeRecord, PropertyValue};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// RocksDB error
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The batch would leave a dangling reference behind
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// The store refused the batch
    #[error("Commit rejected: {0}")]
    Rejected(String),

    /// Column family error
    #[error("Column family error: {0}")]
    ColumnFamily(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persisted node row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRow {
    pub id: NodeId,
    pub node_type: String,
    pub created_at: DateTime<Utc>,
    pub links: NodeLinks,
}

impl NodeRow {
    pub fn class(&self) -> NodeClass {
        self.links.class()
    }
}

impl From<&NodeRecord> for NodeRow {
    fn from(node: &NodeRecord) -> Self {
        NodeRow {
            id: node.id,
            node_type: node.node_type.clone(),
            created_at: node.created_at,
            links: node.links.clone(),
        }
    }
}

/// Persisted property row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRow {
    pub owner: NodeId,
    pub name: String,
    pub value: PropertyValue,
}

/// Persisted group-membership row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRow {
    pub owner: NodeId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    Node(NodeRow),
    Property(PropertyRow),
    Tag(TagRow),
}

impl Record {
    pub fn key(&self) -> RecordKey {
        match self {
            Record::Node(row) => RecordKey::Node(row.id),
            Record::Property(row) => RecordKey::Property(row.owner, row.name.clone()),
            Record::Tag(row) => RecordKey::Tag(row.owner, row.name.clone()),
        }
    }
}

/// Address of a row, used for deletes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKey {
    Node(NodeId),
    Property(NodeId, String),
    Tag(NodeId, String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WriteOp {
    Put(Record),
    Delete(RecordKey),
}

/// Ordered list of row writes applied as one atomic unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, record: Record) {
        self.ops.push(WriteOp::Put(record));
    }

    pub fn delete(&mut self, key: RecordKey) {
        self.ops.push(WriteOp::Delete(key));
    }

    pub fn extend(&mut self, other: WriteBatch) {
        self.ops.extend(other.ops);
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl IntoIterator for WriteBatch {
    type Item = WriteOp;
    type IntoIter = std::vec::IntoIter<WriteOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

/// The record-store collaborator the graph commits into
pub trait RecordStore: Send + Sync {
    /// Every persisted row
    fn load(&self) -> StoreResult<Vec<Record>>;

    /// Node rows of one class and type
    fn fetch(&self, class: NodeClass, node_type: &str) -> StoreResult<Vec<NodeRow>>;

    /// Apply a batch atomically: either every op lands or none does
    fn commit(&self, batch: WriteBatch) -> StoreResult<()>;
}

/// Rebuild node records from persisted rows
///
/// Property and tag rows whose owner is missing are skipped.
pub fn assemble(records: Vec<Record>) -> FxHashMap<NodeId, NodeRecord> {
    let mut nodes: FxHashMap<NodeId, NodeRecord> = FxHashMap::default();
    let mut owned = Vec::new();

    for record in records {
        match record {
            Record::Node(row) => {
                nodes.insert(
                    row.id,
                    NodeRecord {
                        id: row.id,
                        node_type: row.node_type,
                        created_at: row.created_at,
                        properties: Default::default(),
                        groups: Default::default(),
                        links: row.links,
                    },
                );
            }
            other => owned.push(other),
        }
    }

    for record in owned {
        match record {
            Record::Property(row) => match nodes.get_mut(&row.owner) {
                Some(node) => {
                    node.properties.insert(row.name, row.value);
                }
                None => warn!("Skipping orphan property {} of {}", row.name, row.owner),
            },
            Record::Tag(row) => match nodes.get_mut(&row.owner) {
                Some(node) => {
                    node.groups.insert(row.name);
                }
                None => warn!("Skipping orphan tag {} of {}", row.name, row.owner),
            },
            Record::Node(_) => {}
        }
    }

    nodes
}

/// Rows for a whole node, node row first
pub fn rows_for(node: &NodeRecord) -> Vec<Record> {
    let mut rows = Vec::with_capacity(1 + node.properties.len() + node.groups.len());
    rows.push(Record::Node(NodeRow::from(node)));
    rows.extend(node.properties.iter().map(|(name, value)| {
        Record::Property(PropertyRow {
            owner: node.id,
            name: name.clone(),
            value: value.clone(),
        })
    }));
    rows.extend(node.groups.iter().map(|name| {
        Record::Tag(TagRow {
            owner: node.id,
            name: name.clone(),
        })
    }));
    rows
}
