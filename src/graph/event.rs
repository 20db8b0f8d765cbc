//! Change events delivered to observers after a commit
//!
//! Captures what a commit did to each node, in the category order observers
//! rely on: inserts first, deletes last.

use super::node::NodeSnapshot;
use super::property::PropertyValue;
use super::types::{NodeClass, NodeId};
use serde::{Deserialize, Serialize};

/// What happened to a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeKind {
    /// The node itself was inserted
    NodeInserted,
    /// A property was set for the first time
    PropertyInserted { name: String, value: PropertyValue },
    /// An existing property changed value
    PropertyUpdated {
        name: String,
        value: PropertyValue,
        previous: PropertyValue,
    },
    /// The node joined a group
    GroupAdded { group: String },
    /// The node left a group
    GroupRemoved { group: String },
    /// A property was removed; `value` is the last value it held
    PropertyDeleted { name: String, value: PropertyValue },
    /// The node was deleted
    NodeDeleted,
}

impl ChangeKind {
    /// Dispatch order of this kind; lower fires first
    pub fn category(&self) -> u8 {
        match self {
            ChangeKind::NodeInserted => 0,
            ChangeKind::PropertyInserted { .. } => 1,
            ChangeKind::PropertyUpdated { .. } => 2,
            ChangeKind::GroupAdded { .. } => 3,
            ChangeKind::GroupRemoved { .. } => 4,
            ChangeKind::PropertyDeleted { .. } => 5,
            ChangeKind::NodeDeleted => 6,
        }
    }

    /// Get a string representation of the event type
    pub fn event_type(&self) -> &'static str {
        match self {
            ChangeKind::NodeInserted => "node:inserted",
            ChangeKind::PropertyInserted { .. } => "property:inserted",
            ChangeKind::PropertyUpdated { .. } => "property:updated",
            ChangeKind::GroupAdded { .. } => "group:added",
            ChangeKind::GroupRemoved { .. } => "group:removed",
            ChangeKind::PropertyDeleted { .. } => "property:deleted",
            ChangeKind::NodeDeleted => "node:deleted",
        }
    }
}

/// One change to one node, with the node's state at dispatch time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub node: NodeSnapshot,
    pub kind: ChangeKind,
    /// True when the change was merged in from another device
    pub from_cloud: bool,
}

impl ChangeEvent {
    pub fn id(&self) -> NodeId {
        self.node.id
    }

    pub fn class(&self) -> NodeClass {
        self.node.class()
    }

    pub fn node_type(&self) -> &str {
        &self.node.node_type
    }

    /// The group involved, for group events
    pub fn group(&self) -> Option<&str> {
        match &self.kind {
            ChangeKind::GroupAdded { group } | ChangeKind::GroupRemoved { group } => Some(group),
            _ => None,
        }
    }

    /// The property name and value involved, for property events
    pub fn property(&self) -> Option<(&str, &PropertyValue)> {
        match &self.kind {
            ChangeKind::PropertyInserted { name, value }
            | ChangeKind::PropertyUpdated { name, value, .. }
            | ChangeKind::PropertyDeleted { name, value } => Some((name, value)),
            _ => None,
        }
    }
}

/// Stable-sort events into dispatch order
pub fn sort_for_dispatch(events: &mut [ChangeEvent]) {
    events.sort_by_key(|e| e.kind.category());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::NodeRecord;

    fn event(kind: ChangeKind) -> ChangeEvent {
        ChangeEvent {
            node: NodeRecord::new(NodeClass::Entity, "T").unwrap(),
            kind,
            from_cloud: false,
        }
    }

    #[test]
    fn test_dispatch_order() {
        let mut events = vec![
            event(ChangeKind::NodeDeleted),
            event(ChangeKind::GroupAdded { group: "G".into() }),
            event(ChangeKind::PropertyInserted { name: "P".into(), value: 1.into() }),
            event(ChangeKind::NodeInserted),
            event(ChangeKind::PropertyDeleted { name: "P".into(), value: 1.into() }),
            event(ChangeKind::GroupRemoved { group: "G".into() }),
            event(ChangeKind::PropertyUpdated {
                name: "P".into(),
                value: 2.into(),
                previous: 1.into(),
            }),
        ];
        sort_for_dispatch(&mut events);

        let order: Vec<&str> = events.iter().map(|e| e.kind.event_type()).collect();
        assert_eq!(
            order,
            vec![
                "node:inserted",
                "property:inserted",
                "property:updated",
                "group:added",
                "group:removed",
                "property:deleted",
                "node:deleted",
            ]
        );
    }

    #[test]
    fn test_sort_is_stable_within_category() {
        let mut events = vec![
            event(ChangeKind::GroupAdded { group: "B".into() }),
            event(ChangeKind::NodeInserted),
            event(ChangeKind::GroupAdded { group: "A".into() }),
        ];
        sort_for_dispatch(&mut events);
        assert_eq!(events[1].group(), Some("B"));
        assert_eq!(events[2].group(), Some("A"));
    }

    #[test]
    fn test_accessors() {
        let e = event(ChangeKind::PropertyDeleted { name: "P".into(), value: 222.into() });
        assert_eq!(e.property(), Some(("P", &PropertyValue::Integer(222))));
        assert_eq!(e.group(), None);
        assert_eq!(e.class(), NodeClass::Entity);
        assert_eq!(e.node_type(), "T");
    }
}
