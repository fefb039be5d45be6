use pretty_assertions::assert_eq;
use sediment::{
    DiffOptions, Hlc, Metadata, MetadataEvent, MetadataOptions, NormalizedObject, Oid, Operation,
    Patch, PropValue, ReplicaId, SyncMessage, Timestamp, Value,
};
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;
use std::str::FromStr;
use test_log::test;

fn oid(s: &str) -> Oid {
    Oid::from_str(s).unwrap()
}

fn recording(store: &mut Metadata) -> Rc<RefCell<Vec<MetadataEvent>>> {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    store.add_event_handler(Box::new(move |event| {
        sink.borrow_mut().push(event.clone());
    }));
    events
}

fn create(store: &mut Metadata, root: &str, json: serde_json::Value) -> Value {
    let mut doc = Value::from(json);
    let ops = store.initialize_document(&oid(root), &mut doc).unwrap();
    store.insert_local_operation(ops).unwrap();
    doc
}

#[test]
fn initialize_and_read() {
    let mut store = Metadata::new();
    let doc = create(&mut store, "todo/a:x", json!({ "id": "a", "title": "hi" }));

    let snapshot = store.get_document_snapshot(&oid("todo/a")).unwrap().unwrap();
    assert_eq!(snapshot, doc);
    assert_eq!(snapshot.maybe_get_oid(), Some(&oid("todo/a:x")));
    assert_eq!(snapshot.to_json(), json!({ "id": "a", "title": "hi" }));
}

#[test]
fn creation_emits_one_initialize_per_sub_object() {
    let mut store = Metadata::new();
    let mut doc = Value::from(json!({ "id": "a", "title": "hi" }));
    let ops = store.initialize_document(&oid("todo/a:x"), &mut doc).unwrap();
    assert_eq!(ops.len(), 1);
    match &ops[0].data {
        Patch::Initialize { value } => {
            assert_eq!(value.get("id"), Some(&PropValue::Scalar("a".into())));
            assert_eq!(value.get("title"), Some(&PropValue::Scalar("hi".into())));
        }
        other => panic!("expected an initialize, got {:?}", other),
    }
}

#[test]
fn nested_replace_by_identity() {
    let mut store = Metadata::new();
    let doc = create(&mut store, "todo/a:x", json!({ "id": "a", "sub": { "v": 1 } }));

    let mut edited = doc.clone();
    let ops = store
        .diff(&doc, &mut edited, DiffOptions::default())
        .unwrap();
    assert_eq!(ops, vec![]);

    // identity travels with the clone, so the edit lands on the sub oid
    let mut edited = Value::from(json!({ "id": "a", "sub": { "v": 2 } }));
    edited.assign_oid(oid("todo/a:x"));
    let ops = store
        .diff(
            &doc,
            &mut edited,
            DiffOptions {
                merge_unknown_objects: true,
                ..DiffOptions::default()
            },
        )
        .unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].oid, oid("todo/a:x#sub"));

    store.insert_local_operation(ops).unwrap();
    let snapshot = store.get_document_snapshot(&oid("todo/a")).unwrap().unwrap();
    assert_eq!(snapshot.to_json(), json!({ "id": "a", "sub": { "v": 2 } }));
    assert_eq!(
        snapshot.get("sub").unwrap().maybe_get_oid(),
        Some(&oid("todo/a:x#sub"))
    );
}

#[test]
fn nested_replace_by_reassignment() {
    let mut store = Metadata::new();
    let doc = create(&mut store, "todo/a:x", json!({ "id": "a", "sub": { "v": 1 } }));

    let mut edited = Value::from(json!({ "id": "a", "sub": { "v": 2 } }));
    let ops = store
        .diff(&doc, &mut edited, DiffOptions::default())
        .unwrap();
    let new_sub = edited.get("sub").unwrap().maybe_get_oid().unwrap().clone();
    assert_ne!(new_sub, oid("todo/a:x#sub"));
    assert_eq!(
        ops.iter().map(|op| (&op.oid, &op.data)).collect::<Vec<_>>()[1..],
        [
            (
                &oid("todo/a:x"),
                &Patch::Set {
                    name: "sub".into(),
                    value: PropValue::reference(new_sub.clone()),
                }
            ),
            (&oid("todo/a:x#sub"), &Patch::Delete),
        ]
    );

    store.insert_local_operation(ops).unwrap();
    let snapshot = store.get_document_snapshot(&oid("todo/a")).unwrap().unwrap();
    assert_eq!(snapshot.to_json(), json!({ "id": "a", "sub": { "v": 2 } }));
    assert_eq!(snapshot.get("sub").unwrap().maybe_get_oid(), Some(&new_sub));
}

#[test]
fn list_tail_shrink() {
    let mut store = Metadata::new();
    let doc = create(&mut store, "todo/a:x", json!({ "items": [1, 2, 3] }));

    let mut edited = doc.clone();
    let ops = store
        .diff(&doc, &mut edited, DiffOptions::default())
        .unwrap();
    assert_eq!(ops, vec![]);

    let mut edited = Value::from(json!({ "items": [1, 2] }));
    edited.assign_oid(oid("todo/a:x"));
    let ops = store
        .diff(
            &doc,
            &mut edited,
            DiffOptions {
                merge_unknown_objects: true,
                ..DiffOptions::default()
            },
        )
        .unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].oid, oid("todo/a:x#items"));
    assert_eq!(ops[0].data, Patch::ListDelete { index: 2, count: 1 });

    store.insert_local_operation(ops).unwrap();
    let snapshot = store.get_document_snapshot(&oid("todo/a")).unwrap().unwrap();
    assert_eq!(snapshot.to_json(), json!({ "items": [1, 2] }));
}

#[test]
fn rebase_compaction_on_global_ack() {
    let mut store = Metadata::new();
    let events = recording(&mut store);

    // a synced replica no longer rebases autonomously, so history
    // accumulates until the server declares the global watermark
    store.mark_synced(Timestamp::from("000000000000001-0000-00-v0"));
    let doc = create(&mut store, "todo/a:x", json!({ "v": 0 }));
    let mut edited = Value::from(json!({ "v": 3 }));
    edited.assign_oid(oid("todo/a:x"));
    let ops = store.diff(&doc, &mut edited, DiffOptions::default()).unwrap();
    store.insert_local_operation(ops).unwrap();

    let before = store.get_document_snapshot(&oid("todo/a")).unwrap();
    let exported = store.export();
    assert_eq!(exported.operations.len(), 2);
    let last = exported.operations.last().unwrap().timestamp.clone();

    store.set_global_ack(last.clone()).unwrap();

    let exported = store.export();
    assert_eq!(exported.operations, vec![]);
    assert_eq!(exported.baselines.len(), 1);
    assert_eq!(exported.baselines[0].oid, oid("todo/a:x"));
    assert_eq!(exported.baselines[0].timestamp, last);

    // replay over the new baseline gives the identical document
    let after = store.get_document_snapshot(&oid("todo/a")).unwrap();
    assert_eq!(after, before);

    assert!(events.borrow().iter().any(|event| matches!(
        event,
        MetadataEvent::Rebase { baselines } if baselines.len() == 1
    )));
}

#[test]
fn autonomous_rebase_before_first_sync() {
    let mut store = Metadata::new();
    create(&mut store, "todo/a:x", json!({ "v": 0 }));
    // never synced: the local insert already folded itself away
    let exported = store.export();
    assert_eq!(exported.operations, vec![]);
    assert_eq!(exported.baselines.len(), 1);

    let snapshot = store.get_document_snapshot(&oid("todo/a")).unwrap().unwrap();
    assert_eq!(snapshot.to_json(), json!({ "v": 0 }));
}

#[test]
fn disabled_rebasing_keeps_history() {
    let mut store = Metadata::with_options(MetadataOptions {
        disable_rebasing: true,
    });
    create(&mut store, "todo/a:x", json!({ "v": 0 }));
    let watermark = store.now();
    store.set_global_ack(watermark).unwrap();
    assert_eq!(store.export().operations.len(), 1);
}

#[test]
fn out_of_order_remote_operations_replay_in_timestamp_order() {
    let mut remote = Hlc::new(ReplicaId::random(), 0);
    let init = Operation::initialize(
        oid("todo/a:x"),
        &mut remote,
        NormalizedObject::Map(Default::default()),
    );
    let first = Operation::set(
        oid("todo/a:x"),
        &mut remote,
        "v",
        PropValue::Scalar(1i64.into()),
    );
    let second = Operation::set(
        oid("todo/a:x"),
        &mut remote,
        "v",
        PropValue::Scalar(2i64.into()),
    );

    let mut store = Metadata::new();
    let roots = store
        .insert_remote_operations(vec![second, init, first])
        .unwrap();
    assert_eq!(roots, vec![oid("todo/a")]);

    let snapshot = store.get_document_snapshot(&oid("todo/a")).unwrap().unwrap();
    assert_eq!(snapshot.to_json(), json!({ "v": 2 }));
}

#[test]
fn remote_baselines_seed_reconstruction() {
    let mut remote = Hlc::new(ReplicaId::random(), 0);
    let mut doc = Value::from(json!({ "id": "a", "sub": { "v": 1 } }));
    let init_ops = sediment::initial_to_patches(&mut doc, &oid("todo/a:x"), &mut remote).unwrap();
    let baselines: Vec<_> = init_ops
        .iter()
        .map(|op| sediment::DocumentBaseline {
            oid: op.oid.clone(),
            snapshot: match &op.data {
                Patch::Initialize { value } => Some(value.clone()),
                _ => None,
            },
            timestamp: op.timestamp.clone(),
        })
        .collect();
    let follow_up = Operation::set(
        oid("todo/a:x#sub"),
        &mut remote,
        "v",
        PropValue::Scalar(2i64.into()),
    );

    let mut store = Metadata::new();
    let roots = store.insert_remote_baselines(baselines).unwrap();
    assert_eq!(roots, vec![oid("todo/a")]);
    store.insert_remote_operations(vec![follow_up]).unwrap();

    let snapshot = store.get_document_snapshot(&oid("todo/a")).unwrap().unwrap();
    assert_eq!(snapshot.to_json(), json!({ "id": "a", "sub": { "v": 2 } }));
}

#[test]
fn deleted_documents_materialize_as_absent() {
    let mut store = Metadata::new();
    create(&mut store, "todo/a:x", json!({ "v": 0 }));
    // a server-ordered remote edit has seen our history
    let mut clock = Hlc::new(ReplicaId::random(), 0);
    clock.observe(&store.now());
    store
        .insert_remote_operations(vec![Operation::delete(oid("todo/a:x"), &mut clock)])
        .unwrap();
    assert_eq!(store.get_document_snapshot(&oid("todo/a")).unwrap(), None);
}

#[test]
fn local_edits_reach_the_transport() {
    let mut store = Metadata::new();
    let events = recording(&mut store);
    create(&mut store, "todo/a:x", json!({ "v": 0 }));

    let outbound: Vec<_> = events
        .borrow()
        .iter()
        .filter_map(|event| match event {
            MetadataEvent::Message(SyncMessage::Operation { operations, replica_id }) => {
                Some((operations.len(), replica_id.clone()))
            }
            _ => None,
        })
        .collect();
    assert_eq!(outbound, vec![(1, store.replica_id().clone())]);
}

#[test]
fn export_and_restore_round_trip() {
    let mut store = Metadata::new();
    store.mark_synced(Timestamp::from("000000000000001-0000-00-v0"));
    create(&mut store, "todo/a:x", json!({ "id": "a", "tags": ["x"] }));
    store
        .update_schema(
            sediment::Schema {
                version: 3,
                definition: json!({ "todo": { "id": "string" } }),
            },
            None,
        )
        .unwrap();
    let mut remote = Hlc::new(ReplicaId::random(), 3);
    remote.observe(&store.now());
    store
        .insert_remote_operations(vec![Operation::set(
            oid("todo/a:x"),
            &mut remote,
            "title",
            PropValue::Scalar("hi".into()),
        )])
        .unwrap();

    let exported = store.export();
    // the export round-trips through serde verbatim
    let serialized = serde_json::to_string(&exported).unwrap();
    let deserialized: sediment::ExportData = serde_json::from_str(&serialized).unwrap();
    assert_eq!(deserialized, exported);

    let mut restored = Metadata::new();
    restored.reset_from(deserialized);
    assert_eq!(restored.export(), exported);
    assert_eq!(restored.replica_id(), store.replica_id());
    assert_eq!(restored.schema().map(|s| s.version), Some(3));

    let snapshot = restored.get_document_snapshot(&oid("todo/a")).unwrap().unwrap();
    assert_eq!(
        snapshot.to_json(),
        json!({ "id": "a", "tags": ["x"], "title": "hi" })
    );

    // the rehydrated clock keeps issuing past the restored history
    let acked = restored.local_replica().acked_logical_time.clone().unwrap();
    assert!(restored.now() > acked);
}

#[test]
fn related_oids_cover_baselines_and_operations() {
    let mut store = Metadata::new();
    store.mark_synced(Timestamp::from("000000000000001-0000-00-v0"));
    create(&mut store, "todo/a:x", json!({ "sub": { "v": 1 } }));
    let mut remote = Hlc::new(ReplicaId::random(), 0);
    store
        .insert_remote_baselines(vec![sediment::DocumentBaseline {
            oid: oid("todo/a:x#other"),
            snapshot: Some(NormalizedObject::List(vec![])),
            timestamp: remote.now(),
        }])
        .unwrap();

    let related = store.get_all_document_related_oids(&oid("todo/a")).unwrap();
    assert_eq!(
        related,
        vec![
            oid("todo/a:x"),
            oid("todo/a:x#other"),
            oid("todo/a:x#sub"),
        ]
    );
}
