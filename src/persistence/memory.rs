//! In-memory record store
//!
//! Applies each batch to a copy of its tables, checks referential integrity
//! on the copy, and only then swaps it in. A rejected batch therefore leaves
//! nothing behind.

use super::{NodeRow, Record, RecordKey, RecordStore, StoreError, StoreResult, WriteBatch, WriteOp};
use crate::graph::{NodeClass, NodeId, PropertyValue};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct Tables {
    nodes: BTreeMap<NodeId, NodeRow>,
    properties: BTreeMap<(NodeId, String), PropertyValue>,
    tags: BTreeSet<(NodeId, String)>,
}

impl Tables {
    fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::Put(Record::Node(row)) => {
                self.nodes.insert(row.id, row);
            }
            WriteOp::Put(Record::Property(row)) => {
                self.properties.insert((row.owner, row.name), row.value);
            }
            WriteOp::Put(Record::Tag(row)) => {
                self.tags.insert((row.owner, row.name));
            }
            WriteOp::Delete(RecordKey::Node(id)) => {
                self.nodes.remove(&id);
            }
            WriteOp::Delete(RecordKey::Property(owner, name)) => {
                self.properties.remove(&(owner, name));
            }
            WriteOp::Delete(RecordKey::Tag(owner, name)) => {
                self.tags.remove(&(owner, name));
            }
        }
    }

    fn owns_rows(&self, owner: NodeId) -> bool {
        let lower = (owner, String::new());
        let owns_property = self
            .properties
            .range(lower.clone()..)
            .next()
            .is_some_and(|((id, _), _)| *id == owner);
        let owns_tag = self.tags.range(lower..).next().is_some_and(|(id, _)| *id == owner);
        owns_property || owns_tag
    }

    fn is_entity(&self, id: NodeId) -> bool {
        self.nodes
            .get(&id)
            .is_some_and(|row| row.class() == NodeClass::Entity)
    }

    /// Check the rows a batch touched
    fn validate(&self, batch: &WriteBatch) -> StoreResult<()> {
        for op in batch.ops() {
            match op {
                WriteOp::Put(Record::Property(row)) if !self.nodes.contains_key(&row.owner) => {
                    return Err(StoreError::ConstraintViolation(format!(
                        "property {} references missing node {}",
                        row.name, row.owner
                    )));
                }
                WriteOp::Put(Record::Tag(row)) if !self.nodes.contains_key(&row.owner) => {
                    return Err(StoreError::ConstraintViolation(format!(
                        "tag {} references missing node {}",
                        row.name, row.owner
                    )));
                }
                WriteOp::Put(Record::Node(row)) => {
                    if let Some((role, target)) = row
                        .links
                        .references()
                        .into_iter()
                        .find(|(_, target)| !self.is_entity(*target))
                    {
                        return Err(StoreError::ConstraintViolation(format!(
                            "{} {} has {} {} which is not a stored entity",
                            row.class(),
                            row.id,
                            role,
                            target
                        )));
                    }
                }
                WriteOp::Delete(RecordKey::Node(id)) => {
                    if self.nodes.contains_key(id) {
                        continue;
                    }
                    if self.owns_rows(*id) {
                        return Err(StoreError::ConstraintViolation(format!(
                            "node {} deleted while it still owns properties or tags",
                            id
                        )));
                    }
                    if let Some(referrer) = self.nodes.values().find(|row| row.links.references_node(*id)) {
                        return Err(StoreError::ConstraintViolation(format!(
                            "node {} deleted while {} {} still references it",
                            id,
                            referrer.class(),
                            referrer.id
                        )));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Record store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    reject_next: Mutex<Option<String>>,
    commits: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail with [`StoreError::Rejected`]
    pub fn reject_next_commit(&self, reason: impl Into<String>) {
        *self.reject_next.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.into());
    }

    /// Number of successful commits so far
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn node_count(&self) -> usize {
        self.read().nodes.len()
    }

    pub fn property_count(&self) -> usize {
        self.read().properties.len()
    }

    pub fn tag_count(&self) -> usize {
        self.read().tags.len()
    }

    pub fn node(&self, id: NodeId) -> Option<NodeRow> {
        self.read().nodes.get(&id).cloned()
    }

    pub fn property(&self, owner: NodeId, name: &str) -> Option<PropertyValue> {
        self.read().properties.get(&(owner, name.to_string())).cloned()
    }

    pub fn has_tag(&self, owner: NodeId, name: &str) -> bool {
        self.read().tags.contains(&(owner, name.to_string()))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RecordStore for MemoryStore {
    fn load(&self) -> StoreResult<Vec<Record>> {
        let tables = self.read();
        let mut records = Vec::with_capacity(tables.nodes.len() + tables.properties.len() + tables.tags.len());
        records.extend(tables.nodes.values().cloned().map(Record::Node));
        records.extend(tables.properties.iter().map(|((owner, name), value)| {
            Record::Property(super::PropertyRow {
                owner: *owner,
                name: name.clone(),
                value: value.clone(),
            })
        }));
        records.extend(tables.tags.iter().map(|(owner, name)| {
            Record::Tag(super::TagRow {
                owner: *owner,
                name: name.clone(),
            })
        }));
        Ok(records)
    }

    fn fetch(&self, class: NodeClass, node_type: &str) -> StoreResult<Vec<NodeRow>> {
        Ok(self
            .read()
            .nodes
            .values()
            .filter(|row| row.class() == class && row.node_type == node_type)
            .cloned()
            .collect())
    }

    fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        if let Some(reason) = self.reject_next.lock().unwrap_or_else(PoisonError::into_inner).take() {
            return Err(StoreError::Rejected(reason));
        }

        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = tables.clone();
        for op in batch.ops().iter().cloned() {
            next.apply(op);
        }
        next.validate(&batch)?;

        *tables = next;
        self.commits.fetch_add(1, Ordering::SeqCst);
        debug!("Committed {} ops to memory store", batch.len());
        Ok(())
    }
}
