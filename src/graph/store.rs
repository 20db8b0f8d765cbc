//! In-memory working state of the object graph
//!
//! Holds two images of every node:
//! - the working image, which all reads and mutations go through
//! - the committed image, as of the last successful store commit
//!
//! Ids touched since the last commit are tracked in `dirty`; a save diffs
//! just those ids between the two images. Entities have no authored links,
//! so their view of actions and relationships comes from [`BackRefIndex`],
//! which is updated together with every edit of the owning side.

use super::edge::{NodeLinks, Role};
use super::node::NodeRecord;
use super::property::PropertyValue;
use super::transaction::{ChangeSet, NodeDiff};
use super::types::{NodeClass, NodeId};
use super::watch::ObserverId;
use crate::persistence::StoreError;
use indexmap::IndexSet;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during graph operations
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Graph context is closed")]
    ContextUnavailable,

    #[error("Commit failed: {0}")]
    CommitFailed(StoreError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid relationship endpoint: {0}")]
    InvalidRelationshipEndpoint(String),

    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    #[error("Node {id} is a {found}, expected {expected}")]
    WrongNodeClass {
        id: NodeId,
        expected: NodeClass,
        found: NodeClass,
    },

    #[error("Observer {0} is not subscribed")]
    UnknownObserver(ObserverId),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type GraphResult<T> = Result<T, GraphError>;

/// Entity -> (referrer, role) index
///
/// A referrer is an action or relationship naming the entity as a subject
/// or object. Insertion order is kept so queries are deterministic.
#[derive(Debug, Default, Clone)]
pub struct BackRefIndex {
    refs: FxHashMap<NodeId, IndexSet<(NodeId, Role)>>,
}

impl BackRefIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the index from scratch
    pub fn rebuild<'a>(nodes: impl IntoIterator<Item = &'a NodeRecord>) -> Self {
        let mut index = Self::new();
        for node in nodes {
            index.index_node(node);
        }
        index
    }

    pub fn insert(&mut self, target: NodeId, referrer: NodeId, role: Role) {
        self.refs.entry(target).or_default().insert((referrer, role));
    }

    pub fn remove(&mut self, target: NodeId, referrer: NodeId, role: Role) {
        if let Some(set) = self.refs.get_mut(&target) {
            set.shift_remove(&(referrer, role));
            if set.is_empty() {
                self.refs.remove(&target);
            }
        }
    }

    /// Record every link a node authors
    pub fn index_node(&mut self, node: &NodeRecord) {
        for (role, target) in node.links.references() {
            self.insert(target, node.id, role);
        }
    }

    /// Forget every link a node authors
    pub fn unindex_node(&mut self, node: &NodeRecord) {
        for (role, target) in node.links.references() {
            self.remove(target, node.id, role);
        }
    }

    /// Everything referencing `target`, in insertion order
    pub fn referrers(&self, target: NodeId) -> Vec<(NodeId, Role)> {
        self.refs
            .get(&target)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Distinct referrer ids of `target`
    pub fn referrer_ids(&self, target: NodeId) -> IndexSet<NodeId> {
        self.refs
            .get(&target)
            .map(|set| set.iter().map(|(id, _)| *id).collect())
            .unwrap_or_default()
    }

    pub fn is_referenced(&self, target: NodeId) -> bool {
        self.refs.contains_key(&target)
    }

    /// Every id that something currently references
    pub fn targets(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.refs.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.refs.values().map(IndexSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

/// Working and committed state of one graph
#[derive(Debug, Default)]
pub struct GraphStore {
    /// Working image: committed state plus staged changes
    nodes: FxHashMap<NodeId, NodeRecord>,

    /// Image as of the last successful commit
    committed: FxHashMap<NodeId, NodeRecord>,

    /// Ids touched since the last commit, in first-touch order
    dirty: IndexSet<NodeId>,

    /// Back-references of the working image
    backrefs: BackRefIndex,
}

impl GraphStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose working and committed images are `nodes`
    pub fn from_committed(nodes: FxHashMap<NodeId, NodeRecord>) -> Self {
        let backrefs = BackRefIndex::rebuild(nodes.values());
        GraphStore {
            committed: nodes.clone(),
            nodes,
            dirty: IndexSet::new(),
            backrefs,
        }
    }

    /// Stage a new node
    ///
    /// The caller is responsible for checking link targets.
    pub fn insert_node(&mut self, node: NodeRecord) -> NodeId {
        let id = node.id;
        debug!("Staging new {} {} ({})", node.class(), id, node.node_type);
        self.backrefs.index_node(&node);
        self.nodes.insert(id, node);
        self.dirty.insert(id);
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeRecord> {
        self.nodes.get(&id)
    }

    pub fn committed_node(&self, id: NodeId) -> Option<&NodeRecord> {
        self.committed.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn class_of(&self, id: NodeId) -> Option<NodeClass> {
        self.nodes.get(&id).map(NodeRecord::class)
    }

    /// Live node of the expected class
    pub fn expect_class(&self, id: NodeId, expected: NodeClass) -> GraphResult<&NodeRecord> {
        let node = self.nodes.get(&id).ok_or(GraphError::NodeNotFound(id))?;
        let found = node.class();
        if found != expected {
            return Err(GraphError::WrongNodeClass { id, expected, found });
        }
        Ok(node)
    }

    pub fn is_live_entity(&self, id: NodeId) -> bool {
        self.class_of(id) == Some(NodeClass::Entity)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn all_nodes(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.values()
    }

    /// True when something is staged for the next commit
    pub fn has_changes(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    pub fn backrefs(&self) -> &BackRefIndex {
        &self.backrefs
    }

    /// Set, replace or (with `None`) remove a property
    ///
    /// Returns true when the working image changed.
    pub fn set_property(&mut self, id: NodeId, name: &str, value: Option<PropertyValue>) -> bool {
        let Some(node) = self.nodes.get_mut(&id) else {
            debug!("Ignoring property {} on missing node {}", name, id);
            return false;
        };

        let changed = match value {
            Some(value) if node.get_property(name) == Some(&value) => false,
            Some(value) => {
                node.set_property(name, value);
                true
            }
            None => node.remove_property(name).is_some(),
        };

        if changed {
            self.dirty.insert(id);
        }
        changed
    }

    pub fn add_group(&mut self, id: NodeId, group: &str) -> bool {
        let changed = match self.nodes.get_mut(&id) {
            Some(node) => node.add_group(group),
            None => false,
        };
        if changed {
            self.dirty.insert(id);
        }
        changed
    }

    pub fn remove_group(&mut self, id: NodeId, group: &str) -> bool {
        let changed = match self.nodes.get_mut(&id) {
            Some(node) => node.remove_group(group),
            None => false,
        };
        if changed {
            self.dirty.insert(id);
        }
        changed
    }

    /// Add a live entity to one side of a live action
    ///
    /// Anything else (missing nodes, wrong classes, duplicates) is a no-op.
    pub fn add_member(&mut self, action: NodeId, role: Role, entity: NodeId) -> bool {
        if !self.is_live_entity(entity) {
            debug!("Ignoring {} {} of action {}: not a live entity", role, entity, action);
            return false;
        }
        let inserted = match self.nodes.get_mut(&action) {
            Some(node) if node.class() == NodeClass::Action => node.links.insert_member(role, entity),
            _ => false,
        };
        if inserted {
            self.backrefs.insert(entity, action, role);
            self.dirty.insert(action);
        }
        inserted
    }

    pub fn remove_member(&mut self, action: NodeId, role: Role, entity: NodeId) -> bool {
        let removed = match self.nodes.get_mut(&action) {
            Some(node) => node.links.remove_member(role, entity),
            None => false,
        };
        if removed {
            self.backrefs.remove(entity, action, role);
            self.dirty.insert(action);
        }
        removed
    }

    /// Ordered members of one side of an action or relationship
    pub fn members(&self, id: NodeId, role: Role) -> Vec<NodeId> {
        self.nodes
            .get(&id)
            .map(|node| node.links.members(role))
            .unwrap_or_default()
    }

    /// Referrers of an entity, filtered by class and role
    pub fn referrers(&self, entity: NodeId, class: NodeClass, role: Option<Role>) -> Vec<NodeId> {
        let mut ids = IndexSet::new();
        for (referrer, r) in self.backrefs.referrers(entity) {
            if role.is_some_and(|wanted| wanted != r) {
                continue;
            }
            if self.class_of(referrer) == Some(class) {
                ids.insert(referrer);
            }
        }
        ids.into_iter().collect()
    }

    /// Delete a node and everything that depends on it
    ///
    /// Dependents of an entity are the actions and relationships that
    /// reference it; actions and relationships have no dependents. The whole
    /// closure is collected before anything is removed. Returns the removed
    /// ids, the requested node first; deleting a missing node returns
    /// nothing.
    pub fn delete_node(&mut self, id: NodeId) -> Vec<NodeId> {
        if !self.nodes.contains_key(&id) {
            return Vec::new();
        }

        let mut closure: IndexSet<NodeId> = IndexSet::new();
        let mut work = vec![id];
        while let Some(next) = work.pop() {
            if !closure.insert(next) {
                continue;
            }
            if self.class_of(next) == Some(NodeClass::Entity) {
                work.extend(self.backrefs.referrer_ids(next));
            }
        }

        for removed in &closure {
            if let Some(node) = self.nodes.remove(removed) {
                self.backrefs.unindex_node(&node);
                self.dirty.insert(*removed);
            }
        }

        let removed: Vec<NodeId> = closure.into_iter().collect();
        debug!("Staged deletion of {} node(s) rooted at {}", removed.len(), id);
        removed
    }

    /// Live nodes of one class and type
    pub fn search(&self, class: NodeClass, node_type: &str) -> Vec<NodeId> {
        let mut matches: Vec<&NodeRecord> = self
            .nodes
            .values()
            .filter(|node| node.class() == class && node.node_type == node_type)
            .collect();
        matches.sort_by_key(|node| (node.created_at, node.id));
        matches.into_iter().map(|node| node.id).collect()
    }

    /// Diff of every staged change against the committed image
    pub fn pending_changes(&self) -> ChangeSet {
        let diffs = self
            .dirty
            .iter()
            .map(|id| NodeDiff {
                id: *id,
                before: self.committed.get(id).cloned(),
                after: self.nodes.get(id).cloned(),
            })
            .filter(|diff| diff.before != diff.after)
            .collect();
        ChangeSet::new(diffs)
    }

    /// Advance the committed image to the working image for every staged id
    pub fn mark_committed(&mut self) {
        for id in self.dirty.drain(..) {
            match self.nodes.get(&id) {
                Some(node) => {
                    self.committed.insert(id, node.clone());
                }
                None => {
                    self.committed.remove(&id);
                }
            }
        }
    }

    /// Fold a fresh read of the record store into this state
    ///
    /// Every node whose stored image differs from the committed one is
    /// taken from the store; staged local edits to such a node are dropped.
    /// Local edits to other nodes stay staged. Nodes that reference an entity
    /// the remote side deleted, or one staged for deletion here, are deleted
    /// too and stay staged, so no reference is left dangling.
    pub fn merge_remote(&mut self, remote: FxHashMap<NodeId, NodeRecord>) -> ChangeSet {
        let mut ids: IndexSet<NodeId> = self.committed.keys().copied().collect();
        ids.extend(remote.keys().copied());

        let mut diffs = Vec::new();
        for id in ids {
            let before = self.committed.get(&id);
            let after = remote.get(&id);
            if before == after {
                continue;
            }
            diffs.push(NodeDiff {
                id,
                before: before.cloned(),
                after: after.cloned(),
            });
        }
        // Stable order for dispatch: by creation time, then id
        diffs.sort_by_key(|diff| {
            let node = diff.after.as_ref().or(diff.before.as_ref());
            (node.map(|n| n.created_at), diff.id)
        });

        for diff in &diffs {
            if let Some(old) = self.nodes.remove(&diff.id) {
                self.backrefs.unindex_node(&old);
            }
            self.dirty.shift_remove(&diff.id);
            match &diff.after {
                Some(node) => {
                    self.backrefs.index_node(node);
                    self.nodes.insert(diff.id, node.clone());
                    self.committed.insert(diff.id, node.clone());
                }
                None => {
                    self.committed.remove(&diff.id);
                }
            }
        }

        // Anything still naming a missing entity goes too: the entity was
        // either deleted remotely or is staged for deletion here
        let dangling: Vec<NodeId> = self
            .backrefs
            .targets()
            .filter(|target| !self.nodes.contains_key(target))
            .collect();
        for entity in dangling {
            for referrer in self.backrefs.referrer_ids(entity) {
                self.delete_node(referrer);
            }
        }

        ChangeSet::new(diffs)
    }
}

/// Link data a new relationship needs, checked against the working image
pub(crate) fn relationship_links(store: &GraphStore, subject: NodeId, object: NodeId) -> GraphResult<NodeLinks> {
    for (role, id) in [(Role::Subject, subject), (Role::Object, object)] {
        if !store.is_live_entity(id) {
            return Err(GraphError::InvalidRelationshipEndpoint(format!(
                "{} {} is not a live entity",
                role, id
            )));
        }
    }
    Ok(NodeLinks::relationship(subject, object))
}
