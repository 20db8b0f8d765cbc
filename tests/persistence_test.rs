//! Integration tests for persistence
//!
//! Covers round-trips through the record store, commit atomicity, retry
//! after a failed commit, and merging changes made by another writer.

use nodegraph::{
    ChangeEvent, Graph, GraphConfig, GraphError, MemoryStore, ObserverError, PropertyValue, RecordStore, RocksStore,
    StoreError, Watch,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn shared_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

/// Wait until the graph's last strong reference to `store` is gone
fn wait_for_release<T>(store: &Arc<T>) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Arc::strong_count(store) > 1 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_property_round_trip_through_reload() {
    let graph = Graph::in_memory().unwrap();
    let node = graph.create_entity("T").unwrap();

    let values: Vec<(&str, PropertyValue)> = vec![
        ("int", 42.into()),
        ("float", 1.5.into()),
        ("text", "hello".into()),
        ("flag", true.into()),
        ("blob", vec![1u8, 2, 3].into()),
        ("ref", node.id().into()),
    ];
    for (name, value) in &values {
        node.set(name, value.clone());
    }
    graph.save().unwrap();
    graph.reload().unwrap();

    for (name, value) in &values {
        assert_eq!(node.get(name).as_ref(), Some(value));
    }

    node.set_opt::<i64>("int", None);
    graph.save().unwrap();
    graph.reload().unwrap();
    assert_eq!(node.get("int"), None);
    assert_eq!(node.properties().len(), values.len() - 1);
}

#[test]
fn test_reload_discards_staged_changes() {
    let graph = Graph::in_memory().unwrap();
    let node = graph.create_entity("T").unwrap();
    node.set("P", 1);
    graph.save().unwrap();

    node.set("P", 2);
    let staged = graph.create_entity("T").unwrap();
    graph.reload().unwrap();

    assert_eq!(node.get("P"), Some(PropertyValue::Integer(1)));
    assert!(!staged.is_live());
    assert!(!graph.has_changes());
}

#[test]
fn test_failed_commit_is_atomic_and_retryable() {
    let store = shared_store();
    let graph = Graph::open(store.clone(), GraphConfig::default()).unwrap();

    let log = Arc::new(Mutex::new(0));
    let sink = log.clone();
    let id = graph.subscribe(move |_: &ChangeEvent| -> Result<(), ObserverError> {
        *sink.lock().unwrap() += 1;
        Ok(())
    });
    graph.watch(id, Watch::entity()).unwrap();

    for i in 0..3 {
        graph.create_entity("T").unwrap().set("n", i);
    }
    store.reject_next_commit("disk full");

    let err = graph.save().unwrap_err();
    assert!(matches!(err, GraphError::CommitFailed(StoreError::Rejected(_))));
    assert_eq!(store.node_count(), 0);
    assert_eq!(store.property_count(), 0);
    assert_eq!(*log.lock().unwrap(), 0);
    assert!(graph.has_changes());

    let report = graph.save().unwrap();
    assert_eq!(report.inserted.len(), 3);
    assert_eq!(store.node_count(), 3);
    assert_eq!(store.property_count(), 3);
    assert!(*log.lock().unwrap() > 0);
}

#[test]
fn test_failed_save_with_reports_error_to_completion() {
    let store = shared_store();
    let graph = Graph::open(store.clone(), GraphConfig::default()).unwrap();
    graph.create_entity("T").unwrap();
    store.reject_next_commit("quota exceeded");

    let (tx, rx) = std::sync::mpsc::channel();
    graph.save_with(move |result| {
        tx.send(result.map(|report| report.inserted.len())).unwrap();
    });

    let result = rx.recv().unwrap();
    assert!(matches!(result, Err(GraphError::CommitFailed(_))));
    assert_eq!(store.commit_count(), 0);
}

#[test]
fn test_rocks_round_trip_through_open() {
    let temp_dir = TempDir::new().unwrap();
    let (alice_id, bob_id, meeting_id, knows_id);

    {
        let store = Arc::new(RocksStore::open(temp_dir.path()).unwrap());
        let graph = Graph::open(store.clone(), GraphConfig::persistent(temp_dir.path())).unwrap();

        let alice = graph.create_entity("Person").unwrap();
        alice.set("name", "Alice");
        alice.add_to_group("friends");
        let bob = graph.create_entity("Person").unwrap();
        let meeting = graph.create_action("Meeting").unwrap();
        meeting.add_subject(&alice);
        meeting.add_object(&bob);
        let knows = graph.create_relationship("knows", &alice, &bob).unwrap();
        graph.save().unwrap();
        store.flush().unwrap();

        alice_id = alice.id();
        bob_id = bob.id();
        meeting_id = meeting.id();
        knows_id = knows.id();

        drop(graph);
        wait_for_release(&store);
    }

    let graph = Graph::from_config(GraphConfig::persistent(temp_dir.path())).unwrap();
    assert_eq!(graph.node_count(), 4);

    let alice = graph.entity(alice_id).unwrap();
    assert_eq!(alice.get("name"), Some(PropertyValue::from("Alice")));
    assert!(alice.member_of("friends"));

    let meeting = graph.action(meeting_id).unwrap();
    assert_eq!(meeting.subjects(), vec![alice.clone()]);
    assert_eq!(meeting.objects()[0].id(), bob_id);

    let knows = graph.relationship(knows_id).unwrap();
    assert_eq!(knows.subject(), Some(alice.clone()));
    assert_eq!(alice.relationships_as_subject(), vec![knows]);

    // Cascade through the rebuilt back-reference index
    alice.delete();
    graph.save().unwrap();
    let rows = graph.record_store().load().unwrap();
    assert_eq!(rows.len(), 1);
}

#[test]
fn test_merge_remote_changes_flags_cloud() {
    let store = shared_store();
    let device_a = Graph::open(store.clone(), GraphConfig::default()).unwrap();
    let device_b = Graph::open(store.clone(), GraphConfig::default()).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let id = device_b.subscribe(move |event: &ChangeEvent| -> Result<(), ObserverError> {
        sink.lock().unwrap().push((event.kind.event_type(), event.from_cloud));
        Ok(())
    });
    device_b.watch(id, Watch::entity().types(["T"])).unwrap();

    let node = device_a.create_entity("T").unwrap();
    node.set("P", 111);
    device_a.save().unwrap();

    let report = device_b.merge_remote_changes().unwrap();
    assert_eq!(report.inserted, vec![node.id()]);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![("node:inserted", true), ("property:inserted", true)]
    );
    let mirrored = device_b.entity(node.id()).unwrap();
    assert_eq!(mirrored.get("P"), Some(PropertyValue::Integer(111)));

    // Nothing new: merging again is quiet
    seen.lock().unwrap().clear();
    assert!(device_b.merge_remote_changes().unwrap().is_empty());
    assert!(seen.lock().unwrap().is_empty());

    // Local saves on device B are not flagged
    mirrored.set("P", 222);
    device_b.save().unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![("property:updated", false)]);
}

#[test]
fn test_remote_delete_cascades_into_local_staging() {
    let store = shared_store();
    let device_a = Graph::open(store.clone(), GraphConfig::default()).unwrap();
    let device_b = Graph::open(store.clone(), GraphConfig::default()).unwrap();

    let node = device_a.create_entity("T").unwrap();
    device_a.save().unwrap();
    device_b.merge_remote_changes().unwrap();

    // Device B stages an action on the entity; device A deletes it
    let local = device_b.entity(node.id()).unwrap();
    let action = device_b.create_action("A").unwrap();
    action.add_subject(&local);
    node.delete();
    device_a.save().unwrap();

    let report = device_b.merge_remote_changes().unwrap();
    assert_eq!(report.deleted, vec![node.id()]);
    assert!(!local.is_live());
    assert!(!action.is_live());

    // Nothing left to write: the action never reached the store
    let report = device_b.save().unwrap();
    assert!(report.is_empty());
    assert_eq!(store.node_count(), 0);
}

#[test]
fn test_remote_update_to_locally_cascaded_action() {
    let store = shared_store();
    let device_a = Graph::open(store.clone(), GraphConfig::default()).unwrap();
    let device_b = Graph::open(store.clone(), GraphConfig::default()).unwrap();

    let entity = device_a.create_entity("T").unwrap();
    let action = device_a.create_action("A").unwrap();
    action.add_subject(&entity);
    device_a.save().unwrap();

    // Device B edits the action while device A deletes its subject
    device_b.merge_remote_changes().unwrap();
    device_b.action(action.id()).unwrap().set("P", 1);
    device_b.save().unwrap();
    entity.delete();
    assert!(!action.is_live());

    device_a.merge_remote_changes().unwrap();
    assert!(!entity.is_live());
    assert!(!action.is_live());

    let report = device_a.save().unwrap();
    assert_eq!(report.deleted.len(), 2);
    assert!(report.deleted.contains(&entity.id()));
    assert!(report.deleted.contains(&action.id()));
    assert_eq!(store.node_count(), 0);
    assert_eq!(store.property_count(), 0);
}

#[test]
fn test_remote_action_on_locally_deleted_entity() {
    let store = shared_store();
    let device_a = Graph::open(store.clone(), GraphConfig::default()).unwrap();
    let device_b = Graph::open(store.clone(), GraphConfig::default()).unwrap();

    let entity = device_a.create_entity("T").unwrap();
    device_a.save().unwrap();

    // Device B adds an action on the entity that device A is deleting
    device_b.merge_remote_changes().unwrap();
    let remote_action = device_b.create_action("A").unwrap();
    remote_action.add_object(&device_b.entity(entity.id()).unwrap());
    device_b.save().unwrap();
    entity.delete();

    device_a.merge_remote_changes().unwrap();
    assert!(device_a.action(remote_action.id()).is_err());
    assert!(device_a.actions("A").unwrap().is_empty());

    device_a.save().unwrap();
    assert_eq!(store.node_count(), 0);

    device_b.merge_remote_changes().unwrap();
    assert!(!remote_action.is_live());
}

#[tokio::test]
async fn test_async_commit() {
    let graph = Graph::in_memory().unwrap();
    let node = graph.create_entity("T").unwrap();
    node.set("P", 1);

    let report = graph.commit().await.unwrap();
    assert_eq!(report.inserted, vec![node.id()]);
    assert_eq!(graph.record_store().load().unwrap().len(), 2);

    let report = graph.merge_remote_changes_async().await.unwrap();
    assert!(report.is_empty());
}
