//! Subject/object links owned by actions and relationships
//!
//! An action owns two ordered sets of entities; a relationship owns exactly
//! one subject and one object. Entities own nothing here: their view of
//! these links is the derived back-reference index in the store.

use super::types::{NodeClass, NodeId};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The role an entity plays relative to an action or relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum Role {
    Subject,
    Object,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Subject => f.write_str("subject"),
            Role::Object => f.write_str("object"),
        }
    }
}

/// Class-specific link data of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeLinks {
    Entity,
    Action {
        subjects: IndexSet<NodeId>,
        objects: IndexSet<NodeId>,
    },
    Relationship {
        subject: NodeId,
        object: NodeId,
    },
}

impl NodeLinks {
    /// Empty links for an entity or action
    ///
    /// Relationships have no empty form; build them with
    /// [`NodeLinks::relationship`].
    pub fn empty(class: NodeClass) -> Option<Self> {
        match class {
            NodeClass::Entity => Some(NodeLinks::Entity),
            NodeClass::Action => Some(NodeLinks::Action {
                subjects: IndexSet::new(),
                objects: IndexSet::new(),
            }),
            NodeClass::Relationship => None,
        }
    }

    pub fn relationship(subject: NodeId, object: NodeId) -> Self {
        NodeLinks::Relationship { subject, object }
    }

    pub fn class(&self) -> NodeClass {
        match self {
            NodeLinks::Entity => NodeClass::Entity,
            NodeLinks::Action { .. } => NodeClass::Action,
            NodeLinks::Relationship { .. } => NodeClass::Relationship,
        }
    }

    /// Every (role, entity) pair this node points at
    pub fn references(&self) -> Vec<(Role, NodeId)> {
        match self {
            NodeLinks::Entity => Vec::new(),
            NodeLinks::Action { subjects, objects } => subjects
                .iter()
                .map(|id| (Role::Subject, *id))
                .chain(objects.iter().map(|id| (Role::Object, *id)))
                .collect(),
            NodeLinks::Relationship { subject, object } => {
                vec![(Role::Subject, *subject), (Role::Object, *object)]
            }
        }
    }

    pub fn references_node(&self, id: NodeId) -> bool {
        self.references().iter().any(|(_, target)| *target == id)
    }

    /// Ordered members of one side of an action
    pub fn members(&self, role: Role) -> Vec<NodeId> {
        match (self, role) {
            (NodeLinks::Action { subjects, .. }, Role::Subject) => subjects.iter().copied().collect(),
            (NodeLinks::Action { objects, .. }, Role::Object) => objects.iter().copied().collect(),
            (NodeLinks::Relationship { subject, .. }, Role::Subject) => vec![*subject],
            (NodeLinks::Relationship { object, .. }, Role::Object) => vec![*object],
            (NodeLinks::Entity, _) => Vec::new(),
        }
    }

    /// Add an entity to one side of an action; returns true when it was new
    ///
    /// Relationship endpoints are fixed, so this is always false for them.
    pub fn insert_member(&mut self, role: Role, id: NodeId) -> bool {
        match (self, role) {
            (NodeLinks::Action { subjects, .. }, Role::Subject) => subjects.insert(id),
            (NodeLinks::Action { objects, .. }, Role::Object) => objects.insert(id),
            _ => false,
        }
    }

    /// Remove an entity from one side of an action; returns true when it was present
    pub fn remove_member(&mut self, role: Role, id: NodeId) -> bool {
        match (self, role) {
            (NodeLinks::Action { subjects, .. }, Role::Subject) => subjects.shift_remove(&id),
            (NodeLinks::Action { objects, .. }, Role::Object) => objects.shift_remove(&id),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_links() {
        assert_eq!(NodeLinks::empty(NodeClass::Entity), Some(NodeLinks::Entity));
        assert!(NodeLinks::empty(NodeClass::Relationship).is_none());
        let action = NodeLinks::empty(NodeClass::Action).unwrap();
        assert_eq!(action.class(), NodeClass::Action);
        assert!(action.references().is_empty());
    }

    #[test]
    fn test_action_membership_is_a_set() {
        let mut links = NodeLinks::empty(NodeClass::Action).unwrap();
        let e1 = NodeId::new();
        let e2 = NodeId::new();

        assert!(links.insert_member(Role::Subject, e1));
        assert!(!links.insert_member(Role::Subject, e1));
        assert!(links.insert_member(Role::Subject, e2));
        assert!(links.insert_member(Role::Object, e1));

        assert_eq!(links.members(Role::Subject), vec![e1, e2]);
        assert_eq!(links.members(Role::Object), vec![e1]);
        assert_eq!(links.references().len(), 3);

        assert!(links.remove_member(Role::Subject, e1));
        assert!(!links.remove_member(Role::Subject, e1));
        assert_eq!(links.members(Role::Subject), vec![e2]);
        assert!(links.references_node(e1));
    }

    #[test]
    fn test_relationship_endpoints_are_fixed() {
        let subject = NodeId::new();
        let object = NodeId::new();
        let mut links = NodeLinks::relationship(subject, object);

        assert!(!links.insert_member(Role::Subject, NodeId::new()));
        assert!(!links.remove_member(Role::Object, object));
        assert_eq!(links.members(Role::Subject), vec![subject]);
        assert_eq!(links.members(Role::Object), vec![object]);
        assert!(links.references_node(subject));
        assert!(links.references_node(object));
    }
}
