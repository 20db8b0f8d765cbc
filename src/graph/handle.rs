//! Node handles
//!
//! A handle names one node of one graph. Reads and writes go through the
//! graph's working state, so they see uncommitted changes. When the graph
//! is closed or dropped, reads return nothing and writes are ignored.

use super::context::GraphInner;
use super::edge::Role;
use super::node::{NodeRecord, NodeSnapshot, TagSet};
use super::property::{PropertyMap, PropertyValue};
use super::store::GraphStore;
use super::types::{NodeClass, NodeId};
use chrono::{DateTime, Utc};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Handle to a node of any class
#[derive(Clone)]
pub struct NodeHandle {
    graph: Weak<GraphInner>,
    id: NodeId,
    class: NodeClass,
    node_type: String,
    created_at: DateTime<Utc>,
}

impl NodeHandle {
    pub(crate) fn new(graph: Weak<GraphInner>, node: &NodeRecord) -> Self {
        NodeHandle {
            graph,
            id: node.id,
            class: node.class(),
            node_type: node.node_type.clone(),
            created_at: node.created_at,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn class(&self) -> NodeClass {
        self.class
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn belongs_to(&self, graph: &Arc<GraphInner>) -> bool {
        Weak::ptr_eq(&self.graph, &Arc::downgrade(graph))
    }

    /// Run `f` against the working state, unless the graph is gone or closed
    fn with_state<R>(&self, f: impl FnOnce(&mut GraphStore) -> R) -> Option<R> {
        let graph = self.graph.upgrade()?;
        if graph.is_closed() {
            return None;
        }
        let mut state = graph.lock_state();
        Some(f(&mut state))
    }

    fn mutate(&self, what: &str, f: impl FnOnce(&mut GraphStore) -> bool) {
        match self.with_state(f) {
            Some(true) => {}
            Some(false) => debug!("{} on {} {} changed nothing", what, self.class, self.id),
            None => debug!("Ignoring {} on {} {}: graph unavailable", what, self.class, self.id),
        }
    }

    fn handle_for(&self, node: &NodeRecord) -> NodeHandle {
        NodeHandle::new(self.graph.clone(), node)
    }

    /// Handles for live nodes among `ids`
    fn handles(&self, state: &GraphStore, ids: Vec<NodeId>) -> Vec<NodeHandle> {
        ids.into_iter()
            .filter_map(|id| state.node(id))
            .map(|node| self.handle_for(node))
            .collect()
    }

    /// True while the node exists in the working state
    pub fn is_live(&self) -> bool {
        self.with_state(|state| state.contains(self.id)).unwrap_or(false)
    }

    /// Current working state of the node
    pub fn snapshot(&self) -> Option<NodeSnapshot> {
        self.with_state(|state| state.node(self.id).cloned()).flatten()
    }

    pub fn get(&self, name: &str) -> Option<PropertyValue> {
        self.with_state(|state| state.node(self.id).and_then(|n| n.get_property(name).cloned()))
            .flatten()
    }

    pub fn set(&self, name: &str, value: impl Into<PropertyValue>) {
        let value = value.into();
        self.mutate("set", |state| state.set_property(self.id, name, Some(value)));
    }

    /// Set a property, or remove it when `value` is `None`
    pub fn set_opt<V: Into<PropertyValue>>(&self, name: &str, value: Option<V>) {
        let value = value.map(Into::into);
        self.mutate("set", |state| state.set_property(self.id, name, value));
    }

    pub fn unset(&self, name: &str) {
        self.mutate("unset", |state| state.set_property(self.id, name, None));
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Copy of the whole property bag
    pub fn properties(&self) -> PropertyMap {
        self.with_state(|state| state.node(self.id).map(|n| n.properties.clone()))
            .flatten()
            .unwrap_or_default()
    }

    pub fn add_to_group(&self, group: &str) {
        self.mutate("add_to_group", |state| state.add_group(self.id, group));
    }

    pub fn remove_from_group(&self, group: &str) {
        self.mutate("remove_from_group", |state| state.remove_group(self.id, group));
    }

    pub fn member_of(&self, group: &str) -> bool {
        self.with_state(|state| state.node(self.id).is_some_and(|n| n.has_group(group)))
            .unwrap_or(false)
    }

    pub fn groups(&self) -> TagSet {
        self.with_state(|state| state.node(self.id).map(|n| n.groups.clone()))
            .flatten()
            .unwrap_or_default()
    }

    pub fn add_tag(&self, tag: &str) {
        self.add_to_group(tag)
    }

    pub fn remove_tag(&self, tag: &str) {
        self.remove_from_group(tag)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.member_of(tag)
    }

    /// Stage deletion of this node and everything depending on it
    pub fn delete(&self) {
        self.mutate("delete", |state| !state.delete_node(self.id).is_empty());
    }
}

impl PartialEq for NodeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NodeHandle {}

impl Hash for NodeHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("id", &self.id)
            .field("class", &self.class)
            .field("node_type", &self.node_type)
            .finish()
    }
}

macro_rules! typed_handle {
    ($name:ident, $class:expr) => {
        #[derive(Clone, PartialEq, Eq, Hash, Debug)]
        pub struct $name(NodeHandle);

        impl $name {
            pub(crate) fn from_handle(handle: NodeHandle) -> Self {
                debug_assert_eq!(handle.class, $class);
                $name(handle)
            }

            pub fn handle(&self) -> &NodeHandle {
                &self.0
            }

            pub fn into_handle(self) -> NodeHandle {
                self.0
            }
        }

        impl Deref for $name {
            type Target = NodeHandle;

            fn deref(&self) -> &NodeHandle {
                &self.0
            }
        }

        impl TryFrom<NodeHandle> for $name {
            type Error = NodeHandle;

            fn try_from(handle: NodeHandle) -> Result<Self, NodeHandle> {
                if handle.class == $class {
                    Ok($name(handle))
                } else {
                    Err(handle)
                }
            }
        }

        impl From<$name> for NodeHandle {
            fn from(typed: $name) -> NodeHandle {
                typed.0
            }
        }
    };
}

typed_handle!(Entity, NodeClass::Entity);
typed_handle!(Action, NodeClass::Action);
typed_handle!(Relationship, NodeClass::Relationship);

impl Entity {
    fn referrers(&self, class: NodeClass, role: Option<Role>) -> Vec<NodeHandle> {
        self.with_state(|state| {
            let ids = state.referrers(self.id, class, role);
            self.handles(state, ids)
        })
        .unwrap_or_default()
    }

    /// Actions listing this entity as a subject
    pub fn actions_as_subject(&self) -> Vec<Action> {
        self.referrers(NodeClass::Action, Some(Role::Subject))
            .into_iter()
            .map(Action::from_handle)
            .collect()
    }

    /// Actions listing this entity as an object
    pub fn actions_as_object(&self) -> Vec<Action> {
        self.referrers(NodeClass::Action, Some(Role::Object))
            .into_iter()
            .map(Action::from_handle)
            .collect()
    }

    /// Actions referencing this entity in either role
    pub fn actions(&self) -> Vec<Action> {
        self.referrers(NodeClass::Action, None)
            .into_iter()
            .map(Action::from_handle)
            .collect()
    }

    pub fn relationships_as_subject(&self) -> Vec<Relationship> {
        self.referrers(NodeClass::Relationship, Some(Role::Subject))
            .into_iter()
            .map(Relationship::from_handle)
            .collect()
    }

    pub fn relationships_as_object(&self) -> Vec<Relationship> {
        self.referrers(NodeClass::Relationship, Some(Role::Object))
            .into_iter()
            .map(Relationship::from_handle)
            .collect()
    }

    pub fn relationships(&self) -> Vec<Relationship> {
        self.referrers(NodeClass::Relationship, None)
            .into_iter()
            .map(Relationship::from_handle)
            .collect()
    }
}

impl Action {
    fn change_member(&self, entity: &Entity, role: Role, add: bool) {
        if !Weak::ptr_eq(&self.graph, &entity.graph) {
            debug!("Ignoring {} {} of action {}: other graph", role, entity.id, self.id);
            return;
        }
        let what = if add { "add member" } else { "remove member" };
        self.mutate(what, |state| {
            if add {
                state.add_member(self.id, role, entity.id)
            } else {
                state.remove_member(self.id, role, entity.id)
            }
        });
    }

    pub fn add_subject(&self, entity: &Entity) {
        self.change_member(entity, Role::Subject, true);
    }

    pub fn add_object(&self, entity: &Entity) {
        self.change_member(entity, Role::Object, true);
    }

    pub fn remove_subject(&self, entity: &Entity) {
        self.change_member(entity, Role::Subject, false);
    }

    pub fn remove_object(&self, entity: &Entity) {
        self.change_member(entity, Role::Object, false);
    }

    fn members(&self, role: Role) -> Vec<Entity> {
        self.with_state(|state| {
            let ids = state.members(self.id, role);
            self.handles(state, ids)
        })
        .unwrap_or_default()
        .into_iter()
        .map(Entity::from_handle)
        .collect()
    }

    /// Subjects in insertion order
    pub fn subjects(&self) -> Vec<Entity> {
        self.members(Role::Subject)
    }

    /// Objects in insertion order
    pub fn objects(&self) -> Vec<Entity> {
        self.members(Role::Object)
    }

    pub fn has_subject(&self, entity: &Entity) -> bool {
        self.with_state(|state| state.members(self.id, Role::Subject).contains(&entity.id))
            .unwrap_or(false)
    }

    pub fn has_object(&self, entity: &Entity) -> bool {
        self.with_state(|state| state.members(self.id, Role::Object).contains(&entity.id))
            .unwrap_or(false)
    }
}

impl Relationship {
    fn endpoint(&self, role: Role) -> Option<Entity> {
        self.with_state(|state| {
            let ids = state.members(self.id, role);
            self.handles(state, ids).into_iter().next()
        })
        .flatten()
        .map(Entity::from_handle)
    }

    pub fn subject(&self) -> Option<Entity> {
        self.endpoint(Role::Subject)
    }

    pub fn object(&self) -> Option<Entity> {
        self.endpoint(Role::Object)
    }
}
