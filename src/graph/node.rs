//! Managed node record
//!
//! Every node, whatever its class, carries:
//! - A unique id, a caller-supplied type and a creation timestamp
//! - A property bag (at most one value per name)
//! - A set of group tags
//! - Class-specific links (see [`NodeLinks`])

use super::edge::NodeLinks;
use super::property::{PropertyMap, PropertyValue};
use super::types::{NodeClass, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Group tags owned by a node
pub type TagSet = BTreeSet<String>;

/// The in-memory image of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Unique identifier, fixed at creation
    pub id: NodeId,

    /// Caller-supplied classification, fixed at creation
    pub node_type: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Properties owned by this node
    pub properties: PropertyMap,

    /// Groups this node belongs to
    pub groups: TagSet,

    /// Subject/object links; also determines the node class
    pub links: NodeLinks,
}

/// The state of a node as delivered to observers
pub type NodeSnapshot = NodeRecord;

impl NodeRecord {
    /// Create an entity or action record with a fresh id
    ///
    /// Returns `None` for [`NodeClass::Relationship`], which needs its
    /// endpoints up front.
    pub fn new(class: NodeClass, node_type: impl Into<String>) -> Option<Self> {
        NodeLinks::empty(class).map(|links| Self::with_links(node_type, links))
    }

    pub fn entity(node_type: impl Into<String>) -> Self {
        Self::with_links(node_type, NodeLinks::Entity)
    }

    pub fn action(node_type: impl Into<String>) -> Self {
        Self::with_links(node_type, NodeLinks::Action {
            subjects: Default::default(),
            objects: Default::default(),
        })
    }

    /// Create a relationship record with a fresh id
    pub fn new_relationship(node_type: impl Into<String>, subject: NodeId, object: NodeId) -> Self {
        Self::with_links(node_type, NodeLinks::relationship(subject, object))
    }

    pub(crate) fn with_links(node_type: impl Into<String>, links: NodeLinks) -> Self {
        NodeRecord {
            id: NodeId::new(),
            node_type: node_type.into(),
            created_at: Utc::now(),
            properties: PropertyMap::new(),
            groups: TagSet::new(),
            links,
        }
    }

    pub fn class(&self) -> NodeClass {
        self.links.class()
    }

    /// Set a property value, returning the previous one
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Option<PropertyValue> {
        self.properties.insert(key.into(), value.into())
    }

    /// Get a property value
    pub fn get_property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    /// Remove a property
    pub fn remove_property(&mut self, key: &str) -> Option<PropertyValue> {
        self.properties.remove(key)
    }

    pub fn has_property(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    /// Add this node to a group; returns true when membership changed
    pub fn add_group(&mut self, group: impl Into<String>) -> bool {
        self.groups.insert(group.into())
    }

    /// Remove this node from a group; returns true when membership changed
    pub fn remove_group(&mut self, group: &str) -> bool {
        self.groups.remove(group)
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Copy of this record without its properties and groups
    ///
    /// Used for deletion events, where the owned records were already
    /// reported as removed.
    pub fn stripped(&self) -> Self {
        NodeRecord {
            properties: PropertyMap::new(),
            groups: TagSet::new(),
            ..self.clone()
        }
    }
}
