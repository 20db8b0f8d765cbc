//! Watch predicates and change dispatch
//!
//! Observers subscribe once and then register any number of [`Watch`]
//! predicates. After each successful commit the registry walks the change
//! events in order and calls every observer with at least one matching
//! predicate, once per event.

use super::event::{ChangeEvent, ChangeKind};
use super::types::NodeClass;
use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Error an observer may return; it is logged and otherwise ignored
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// Receives change events
pub trait GraphObserver: Send + Sync {
    fn on_change(&self, event: &ChangeEvent) -> Result<(), ObserverError>;
}

impl<F> GraphObserver for F
where
    F: Fn(&ChangeEvent) -> Result<(), ObserverError> + Send + Sync,
{
    fn on_change(&self, event: &ChangeEvent) -> Result<(), ObserverError> {
        self(event)
    }
}

/// Handle for a subscribed observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

/// A predicate over change events
///
/// The class always has to match. Each filter left unset matches anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watch {
    class: NodeClass,
    types: Option<BTreeSet<String>>,
    groups: Option<BTreeSet<String>>,
    properties: Option<BTreeSet<String>>,
}

impl Watch {
    pub fn new(class: NodeClass) -> Self {
        Watch {
            class,
            types: None,
            groups: None,
            properties: None,
        }
    }

    pub fn entity() -> Self {
        Self::new(NodeClass::Entity)
    }

    pub fn action() -> Self {
        Self::new(NodeClass::Action)
    }

    pub fn relationship() -> Self {
        Self::new(NodeClass::Relationship)
    }

    /// Only nodes of these types
    pub fn types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Only group events for these groups
    pub fn groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = Some(groups.into_iter().map(Into::into).collect());
        self
    }

    /// Only property events for these property names
    pub fn properties<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn class(&self) -> NodeClass {
        self.class
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.class() != self.class {
            return false;
        }
        if !passes(&self.types, event.node_type()) {
            return false;
        }
        match &event.kind {
            ChangeKind::GroupAdded { group } | ChangeKind::GroupRemoved { group } => passes(&self.groups, group),
            ChangeKind::PropertyInserted { name, .. }
            | ChangeKind::PropertyUpdated { name, .. }
            | ChangeKind::PropertyDeleted { name, .. } => passes(&self.properties, name),
            ChangeKind::NodeInserted | ChangeKind::NodeDeleted => true,
        }
    }
}

fn passes(filter: &Option<BTreeSet<String>>, value: &str) -> bool {
    filter.as_ref().map_or(true, |allowed| allowed.contains(value))
}

#[derive(Clone)]
struct Subscription {
    observer: Arc<dyn GraphObserver>,
    watches: Vec<Watch>,
}

impl Subscription {
    fn matches(&self, event: &ChangeEvent) -> bool {
        self.watches.iter().any(|watch| watch.matches(event))
    }
}

/// Registry of observers and their predicates
#[derive(Default)]
pub struct WatchRegistry {
    subscriptions: IndexMap<ObserverId, Subscription>,
    next_id: u64,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: Arc<dyn GraphObserver>) -> ObserverId {
        self.next_id += 1;
        let id = ObserverId(self.next_id);
        self.subscriptions.insert(
            id,
            Subscription {
                observer,
                watches: Vec::new(),
            },
        );
        debug!("Subscribed {}", id);
        id
    }

    /// Remove an observer; returns false when it was not subscribed
    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        self.subscriptions.shift_remove(&id).is_some()
    }

    /// Add a predicate to an observer; returns false when it was not subscribed
    pub fn watch(&mut self, id: ObserverId, watch: Watch) -> bool {
        match self.subscriptions.get_mut(&id) {
            Some(subscription) => {
                subscription.watches.push(watch);
                true
            }
            None => false,
        }
    }

    pub fn watches(&self, id: ObserverId) -> &[Watch] {
        self.subscriptions
            .get(&id)
            .map(|s| s.watches.as_slice())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Snapshot of the current subscriptions
    ///
    /// Dispatch runs on the snapshot so observers may subscribe or
    /// unsubscribe from inside a callback.
    pub fn snapshot(&self) -> Dispatcher {
        Dispatcher {
            subscriptions: self.subscriptions.iter().map(|(id, s)| (*id, s.clone())).collect(),
        }
    }
}

/// Delivers one commit's events to a fixed set of subscriptions
pub struct Dispatcher {
    subscriptions: Vec<(ObserverId, Subscription)>,
}

impl Dispatcher {
    /// Call every matching observer for every event, in event order
    ///
    /// Returns the number of observer calls made. Observer errors and
    /// panics are logged and do not stop dispatch.
    pub fn dispatch(&self, events: &[ChangeEvent]) -> usize {
        let mut calls = 0;
        for event in events {
            for (id, subscription) in &self.subscriptions {
                if !subscription.matches(event) {
                    continue;
                }
                calls += 1;
                let outcome = catch_unwind(AssertUnwindSafe(|| subscription.observer.on_change(event)));
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("{} failed on {} for {}: {}", id, event.kind.event_type(), event.id(), e),
                    Err(_) => warn!("{} panicked on {} for {}", id, event.kind.event_type(), event.id()),
                }
            }
        }
        calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::NodeRecord;
    use std::sync::Mutex;

    fn event(class: NodeClass, node_type: &str, kind: ChangeKind) -> ChangeEvent {
        let node = match class {
            NodeClass::Relationship => {
                NodeRecord::new_relationship(node_type, crate::graph::NodeId::new(), crate::graph::NodeId::new())
            }
            _ => NodeRecord::new(class, node_type).unwrap(),
        };
        ChangeEvent {
            node,
            kind,
            from_cloud: false,
        }
    }

    fn group_added(group: &str) -> ChangeKind {
        ChangeKind::GroupAdded { group: group.into() }
    }

    #[test]
    fn test_class_and_type_filters() {
        let watch = Watch::entity().types(["T"]);
        assert!(watch.matches(&event(NodeClass::Entity, "T", ChangeKind::NodeInserted)));
        assert!(!watch.matches(&event(NodeClass::Entity, "U", ChangeKind::NodeInserted)));
        assert!(!watch.matches(&event(NodeClass::Action, "T", ChangeKind::NodeInserted)));
        assert!(Watch::relationship().matches(&event(NodeClass::Relationship, "R", ChangeKind::NodeDeleted)));
    }

    #[test]
    fn test_group_filter_only_narrows_group_events() {
        let watch = Watch::entity().types(["T"]).groups(["G"]);
        assert!(watch.matches(&event(NodeClass::Entity, "T", group_added("G"))));
        assert!(!watch.matches(&event(NodeClass::Entity, "T", group_added("H"))));
        assert!(watch.matches(&event(NodeClass::Entity, "T", ChangeKind::NodeInserted)));
    }

    #[test]
    fn test_property_filter() {
        let watch = Watch::action().properties(["P"]);
        let set = |name: &str| ChangeKind::PropertyInserted {
            name: name.into(),
            value: 1.into(),
        };
        assert!(watch.matches(&event(NodeClass::Action, "A", set("P"))));
        assert!(!watch.matches(&event(NodeClass::Action, "A", set("Q"))));
        assert!(watch.matches(&event(NodeClass::Action, "A", group_added("G"))));
    }

    #[test]
    fn test_dispatch_calls_once_per_event() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut registry = WatchRegistry::new();
        let id = registry.subscribe(Arc::new(move |e: &ChangeEvent| -> Result<(), ObserverError> {
            sink.lock().unwrap().push(e.kind.event_type());
            Ok(())
        }));
        registry.watch(id, Watch::entity());
        registry.watch(id, Watch::entity().types(["T"]));

        let events = vec![
            event(NodeClass::Entity, "T", ChangeKind::NodeInserted),
            event(NodeClass::Action, "T", ChangeKind::NodeInserted),
        ];
        assert_eq!(registry.snapshot().dispatch(&events), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["node:inserted"]);
    }

    #[test]
    fn test_failing_observers_do_not_stop_dispatch() {
        let count = Arc::new(Mutex::new(0));
        let mut registry = WatchRegistry::new();

        let failing = registry.subscribe(Arc::new(|_: &ChangeEvent| -> Result<(), ObserverError> {
            Err("observer failed".into())
        }));
        let panicking = registry.subscribe(Arc::new(|_: &ChangeEvent| -> Result<(), ObserverError> {
            panic!("observer panicked")
        }));
        let sink = count.clone();
        let counting = registry.subscribe(Arc::new(move |_: &ChangeEvent| -> Result<(), ObserverError> {
            *sink.lock().unwrap() += 1;
            Ok(())
        }));
        for id in [failing, panicking, counting] {
            registry.watch(id, Watch::entity());
        }

        let events = vec![event(NodeClass::Entity, "T", ChangeKind::NodeInserted)];
        assert_eq!(registry.snapshot().dispatch(&events), 3);
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let mut registry = WatchRegistry::new();
        let id = registry.subscribe(Arc::new(|_: &ChangeEvent| -> Result<(), ObserverError> { Ok(()) }));
        assert!(registry.watch(id, Watch::entity()));
        assert_eq!(registry.watches(id).len(), 1);

        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        assert!(!registry.watch(id, Watch::entity()));
        assert!(registry.is_empty());
    }
}
