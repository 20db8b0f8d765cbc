//! Lowering staged changes into a store batch and change events
//!
//! A save collects one [`NodeDiff`] per touched node and turns the whole set
//! into a single [`WriteBatch`]. Ops are ordered so that no prefix of the
//! batch leaves a dangling row:
//! 1. node rows (entities before actions and relationships)
//! 2. property and tag rows
//! 3. property and tag deletes
//! 4. node deletes (actions and relationships before entities)

use super::event::{sort_for_dispatch, ChangeEvent, ChangeKind};
use super::node::NodeRecord;
use super::types::{NodeClass, NodeId};
use crate::persistence::{NodeRow, PropertyRow, Record, RecordKey, TagRow, WriteBatch};
use serde::{Deserialize, Serialize};

/// The committed and working image of one node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDiff {
    pub id: NodeId,
    pub before: Option<NodeRecord>,
    pub after: Option<NodeRecord>,
}

/// Every node diff of one save or merge, in staging order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    diffs: Vec<NodeDiff>,
}

impl ChangeSet {
    pub fn new(diffs: Vec<NodeDiff>) -> Self {
        ChangeSet { diffs }
    }

    pub fn diffs(&self) -> &[NodeDiff] {
        &self.diffs
    }

    pub fn len(&self) -> usize {
        self.diffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diffs.is_empty()
    }
}

/// What a successful save did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReport {
    pub inserted: Vec<NodeId>,
    pub updated: Vec<NodeId>,
    pub deleted: Vec<NodeId>,
    /// Number of row operations submitted to the record store
    pub records: usize,
}

impl CommitReport {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// A change set lowered for the store and the dispatcher
#[derive(Debug, Clone, Default)]
pub struct LoweredChanges {
    pub batch: WriteBatch,
    pub events: Vec<ChangeEvent>,
    pub report: CommitReport,
}

#[derive(Default)]
struct Phases {
    entity_rows: Vec<Record>,
    linked_rows: Vec<Record>,
    owned_puts: Vec<Record>,
    owned_deletes: Vec<RecordKey>,
    linked_deletes: Vec<RecordKey>,
    entity_deletes: Vec<RecordKey>,
}

impl Phases {
    fn put_node(&mut self, node: &NodeRecord) {
        let row = Record::Node(NodeRow::from(node));
        match node.class() {
            NodeClass::Entity => self.entity_rows.push(row),
            _ => self.linked_rows.push(row),
        }
    }

    fn delete_node(&mut self, node: &NodeRecord) {
        let key = RecordKey::Node(node.id);
        match node.class() {
            NodeClass::Entity => self.entity_deletes.push(key),
            _ => self.linked_deletes.push(key),
        }
    }

    fn into_batch(self) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for record in self.entity_rows.into_iter().chain(self.linked_rows).chain(self.owned_puts) {
            batch.put(record);
        }
        for key in self
            .owned_deletes
            .into_iter()
            .chain(self.linked_deletes)
            .chain(self.entity_deletes)
        {
            batch.delete(key);
        }
        batch
    }
}

/// Lower a change set
///
/// Events come back in dispatch order, each flagged with `from_cloud`.
pub fn lower(changes: &ChangeSet, from_cloud: bool) -> LoweredChanges {
    let mut phases = Phases::default();
    let mut events = Vec::new();
    let mut report = CommitReport::default();

    let mut emit = |node: &NodeRecord, kind: ChangeKind| {
        events.push(ChangeEvent {
            node: node.clone(),
            kind,
            from_cloud,
        });
    };

    for diff in changes.diffs() {
        match (&diff.before, &diff.after) {
            (None, Some(after)) => {
                phases.put_node(after);
                emit(after, ChangeKind::NodeInserted);
                for (name, value) in &after.properties {
                    phases.owned_puts.push(property_row(after.id, name, value));
                    emit(
                        after,
                        ChangeKind::PropertyInserted {
                            name: name.clone(),
                            value: value.clone(),
                        },
                    );
                }
                for group in &after.groups {
                    phases.owned_puts.push(tag_row(after.id, group));
                    emit(after, ChangeKind::GroupAdded { group: group.clone() });
                }
                report.inserted.push(after.id);
            }
            (Some(before), Some(after)) => {
                if NodeRow::from(before) != NodeRow::from(after) {
                    phases.put_node(after);
                }
                for (name, value) in &after.properties {
                    match before.properties.get(name) {
                        None => {
                            phases.owned_puts.push(property_row(after.id, name, value));
                            emit(
                                after,
                                ChangeKind::PropertyInserted {
                                    name: name.clone(),
                                    value: value.clone(),
                                },
                            );
                        }
                        Some(previous) if previous != value => {
                            phases.owned_puts.push(property_row(after.id, name, value));
                            emit(
                                after,
                                ChangeKind::PropertyUpdated {
                                    name: name.clone(),
                                    value: value.clone(),
                                    previous: previous.clone(),
                                },
                            );
                        }
                        Some(_) => {}
                    }
                }
                for group in after.groups.difference(&before.groups) {
                    phases.owned_puts.push(tag_row(after.id, group));
                    emit(after, ChangeKind::GroupAdded { group: group.clone() });
                }
                for group in before.groups.difference(&after.groups) {
                    phases.owned_deletes.push(RecordKey::Tag(after.id, group.clone()));
                    emit(after, ChangeKind::GroupRemoved { group: group.clone() });
                }
                for (name, value) in &before.properties {
                    if !after.properties.contains_key(name) {
                        phases.owned_deletes.push(RecordKey::Property(after.id, name.clone()));
                        emit(
                            after,
                            ChangeKind::PropertyDeleted {
                                name: name.clone(),
                                value: value.clone(),
                            },
                        );
                    }
                }
                report.updated.push(after.id);
            }
            (Some(before), None) => {
                let gone = before.stripped();
                for group in &before.groups {
                    phases.owned_deletes.push(RecordKey::Tag(before.id, group.clone()));
                    emit(&gone, ChangeKind::GroupRemoved { group: group.clone() });
                }
                for (name, value) in &before.properties {
                    phases.owned_deletes.push(RecordKey::Property(before.id, name.clone()));
                    emit(
                        &gone,
                        ChangeKind::PropertyDeleted {
                            name: name.clone(),
                            value: value.clone(),
                        },
                    );
                }
                phases.delete_node(before);
                emit(&gone, ChangeKind::NodeDeleted);
                report.deleted.push(before.id);
            }
            (None, None) => {}
        }
    }

    let batch = phases.into_batch();
    report.records = batch.len();
    sort_for_dispatch(&mut events);

    LoweredChanges { batch, events, report }
}

fn property_row(owner: NodeId, name: &str, value: &super::property::PropertyValue) -> Record {
    Record::Property(PropertyRow {
        owner,
        name: name.to_string(),
        value: value.clone(),
    })
}

fn tag_row(owner: NodeId, name: &str) -> Record {
    Record::Tag(TagRow {
        owner,
        name: name.to_string(),
    })
}
