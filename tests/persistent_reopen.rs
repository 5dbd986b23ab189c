//! Persistence tests: reopening, locking, read-only access and corruption
//! detection for the on-disk backend.

#![cfg(feature = "persistent")]

use redb::{Database, TableDefinition};
use spfstore::{BackendKind, EntityStore, InstanceId, OpenError, Schema, StoreError, StoreOptions, Value};
use tempfile::tempdir;

const RECORDS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("records");

fn schema() -> Schema {
    Schema::builder("IFC_MINI")
        .entity("IfcRoot", None, &["GlobalId", "Name"])
        .entity("IfcWall", Some("IfcRoot"), &["Placement"])
        .entity("IfcCartesianPoint", None, &["Coordinates"])
        .guid_root("IfcRoot")
        .build()
        .unwrap()
}

fn id(raw: u32) -> InstanceId {
    InstanceId::new(raw).unwrap()
}

fn instance_key(id: InstanceId) -> Vec<u8> {
    let mut key = vec![b'i'];
    key.extend_from_slice(&id.get().to_be_bytes());
    key
}

#[test]
fn test_reopen_preserves_instances_and_indices() {
    let dir = tempdir().unwrap();
    let guid = spfstore::new_guid();
    let (point, wall) = {
        let mut store = EntityStore::open_persistent(schema(), dir.path(), StoreOptions::default()).unwrap();
        assert_eq!(store.backend_kind(), BackendKind::Persistent);
        let point_ty = store.type_id("IfcCartesianPoint").unwrap();
        let wall_ty = store.type_id("IfcWall").unwrap();
        let p = store.insert(point_ty, vec![Value::List(vec![1.0.into()])]).unwrap();
        let w = store
            .insert(wall_ty, vec![guid.as_str().into(), "W".into(), Value::Ref(p)])
            .unwrap();
        (p, w)
    };

    let store = EntityStore::open_persistent(schema(), dir.path(), StoreOptions::default()).unwrap();
    assert_eq!(store.len().unwrap(), 2);
    assert_eq!(store.instance_by_guid(&guid).unwrap().id, wall);
    assert_eq!(
        store.referencing_instances(point, None, None).unwrap().collect_ids().unwrap(),
        vec![wall]
    );
    assert_eq!(store.instance_by_id(wall).unwrap().attributes[1], Value::String("W".into()));
}

#[test]
fn test_ids_are_not_reused_after_reopen() {
    let dir = tempdir().unwrap();
    {
        let mut store = EntityStore::open_persistent(schema(), dir.path(), StoreOptions::default()).unwrap();
        let ty = store.type_id("IfcCartesianPoint").unwrap();
        for _ in 0..3 {
            store.create(ty).unwrap();
        }
        store.delete(id(3)).unwrap();
        // A forward reference reserves its target id as well.
        store
            .load(id(7), ty, vec![Value::List(vec![Value::Ref(id(12))])])
            .unwrap();
        assert!(matches!(store.finish_load(), Err(StoreError::MalformedRecord { .. })));
    }

    let mut store = EntityStore::open_persistent(schema(), dir.path(), StoreOptions::default()).unwrap();
    let ty = store.type_id("IfcCartesianPoint").unwrap();
    assert_eq!(store.create(ty).unwrap(), id(13));
}

#[test]
fn test_second_writer_is_locked_out() {
    let dir = tempdir().unwrap();
    let _first = EntityStore::open_persistent(schema(), dir.path(), StoreOptions::default()).unwrap();
    let second = EntityStore::open_persistent(schema(), dir.path(), StoreOptions::default());
    assert!(matches!(second, Err(OpenError::Locked(_))), "{second:?}");
}

#[test]
fn test_readonly_open() {
    let empty = tempdir().unwrap();
    let missing = EntityStore::open_persistent(schema(), empty.path(), StoreOptions::readonly());
    assert!(matches!(missing, Err(OpenError::Missing(_))), "{missing:?}");

    let dir = tempdir().unwrap();
    let p = {
        let mut store = EntityStore::open_persistent(schema(), dir.path(), StoreOptions::default()).unwrap();
        let ty = store.type_id("IfcCartesianPoint").unwrap();
        store.create(ty).unwrap()
    };

    let mut store = EntityStore::open_persistent(schema(), dir.path(), StoreOptions::readonly()).unwrap();
    assert!(store.contains(p).unwrap());
    assert!(matches!(store.delete(p), Err(StoreError::ReadOnly)));
    let ty = store.type_id("IfcCartesianPoint").unwrap();
    assert!(matches!(store.create(ty), Err(StoreError::ReadOnly)));
    assert_eq!(store.len().unwrap(), 1);
}

#[test]
fn test_schema_mismatch_is_rejected() {
    let dir = tempdir().unwrap();
    drop(EntityStore::open_persistent(schema(), dir.path(), StoreOptions::default()).unwrap());

    let other = Schema::builder("OTHER")
        .entity("Thing", None, &["A"])
        .build()
        .unwrap();
    let result = EntityStore::open_persistent(other, dir.path(), StoreOptions::default());
    assert!(matches!(result, Err(OpenError::SchemaMismatch { .. })), "{result:?}");
}

#[test]
fn test_corrupt_record_is_detected() {
    let dir = tempdir().unwrap();
    {
        let mut store = EntityStore::open_persistent(schema(), dir.path(), StoreOptions::default()).unwrap();
        let ty = store.type_id("IfcCartesianPoint").unwrap();
        store.create(ty).unwrap();
        store.create(ty).unwrap();
    }

    {
        let db = Database::open(dir.path().join("store.redb")).unwrap();
        let txn = db.begin_write().unwrap();
        {
            let mut table = txn.open_table(RECORDS).unwrap();
            let key = instance_key(id(2));
            table.insert(key.as_slice(), b"not a record".as_slice()).unwrap();
        }
        txn.commit().unwrap();
    }

    let store = EntityStore::open_persistent(schema(), dir.path(), StoreOptions::default()).unwrap();
    assert!(store.instance_by_id(id(1)).is_ok());
    let err = store.instance_by_id(id(2)).unwrap_err();
    assert!(matches!(err, StoreError::CorruptIndex { .. }), "{err:?}");
    assert!(err.is_fatal());
}

#[test]
fn test_reset_keeps_store_usable() {
    let dir = tempdir().unwrap();
    {
        let mut store = EntityStore::open_persistent(schema(), dir.path(), StoreOptions::default()).unwrap();
        let ty = store.type_id("IfcCartesianPoint").unwrap();
        store.create(ty).unwrap();
        store.create(ty).unwrap();
        store.reset().unwrap();
        assert!(store.is_empty().unwrap());
        assert_eq!(store.create(ty).unwrap(), id(1));
    }

    let store = EntityStore::open_persistent(schema(), dir.path(), StoreOptions::default()).unwrap();
    assert_eq!(store.len().unwrap(), 1);
    assert_eq!(store.types().count(), 1);
}

#[test]
fn test_uncached_store_reads_from_disk() {
    let dir = tempdir().unwrap();
    let options = StoreOptions {
        cache_size: 0,
        sync_on_write: false,
        ..StoreOptions::default()
    };
    let mut store = EntityStore::open_persistent(schema(), dir.path(), options).unwrap();
    let ty = store.type_id("IfcCartesianPoint").unwrap();
    let p = store.insert(ty, vec![Value::List(vec![2.0.into()])]).unwrap();
    store.set_attribute(p, 0, Value::List(vec![3.0.into()])).unwrap();
    assert_eq!(
        store.instance_by_id(p).unwrap().attributes[0],
        Value::List(vec![3.0.into()])
    );
}

#[test]
fn test_pending_references_survive_reopen() {
    let dir = tempdir().unwrap();
    let guid = spfstore::new_guid();
    {
        let mut store = EntityStore::open_persistent(schema(), dir.path(), StoreOptions::default()).unwrap();
        let wall = store.type_id("IfcWall").unwrap();
        let point = store.type_id("IfcCartesianPoint").unwrap();
        store
            .load(id(5), wall, vec![guid.as_str().into(), "W".into(), Value::Ref(id(9))])
            .unwrap();
        store
            .load(id(6), point, vec![Value::List(vec![Value::Ref(id(40))])])
            .unwrap();
        assert_eq!(store.unresolved_count(), 2);
    }

    {
        let mut store = EntityStore::open_persistent(schema(), dir.path(), StoreOptions::default()).unwrap();
        assert_eq!(store.unresolved_count(), 2);
        let point = store.type_id("IfcCartesianPoint").unwrap();
        store.load(id(9), point, vec![Value::List(vec![])]).unwrap();
        assert_eq!(store.unresolved_count(), 1);
        assert_eq!(
            store.referencing_instances(id(9), None, None).unwrap().collect_ids().unwrap(),
            vec![id(5)]
        );
    }

    {
        let mut store = EntityStore::open_persistent(schema(), dir.path(), StoreOptions::default()).unwrap();
        assert_eq!(store.unresolved_count(), 1);
        assert!(matches!(
            store.finish_load(),
            Err(StoreError::MalformedRecord { id: source, .. }) if source == id(6)
        ));
        assert_eq!(store.instance_by_id(id(6)).unwrap().attributes[0], Value::List(vec![]));
    }

    let store = EntityStore::open_persistent(schema(), dir.path(), StoreOptions::default()).unwrap();
    assert_eq!(store.unresolved_count(), 0);
    assert_eq!(store.total_inverses(id(9)).unwrap(), 1);
}

#[test]
fn test_deleted_ids_stay_deleted_after_reopen() {
    let dir = tempdir().unwrap();
    {
        let mut store = EntityStore::open_persistent(schema(), dir.path(), StoreOptions::default()).unwrap();
        let ty = store.type_id("IfcCartesianPoint").unwrap();
        store.create(ty).unwrap();
        store.delete(id(1)).unwrap();
    }

    let mut store = EntityStore::open_persistent(schema(), dir.path(), StoreOptions::default()).unwrap();
    let ty = store.type_id("IfcCartesianPoint").unwrap();
    let err = store.load(id(1), ty, vec![Value::Null]).unwrap_err();
    assert!(matches!(err, StoreError::DuplicateId(dup) if dup == id(1)), "{err:?}");
    assert!(store.is_empty().unwrap());
}

#[test]
fn test_readonly_opens_hold_the_directory_exclusively() {
    let dir = tempdir().unwrap();
    drop(EntityStore::open_persistent(schema(), dir.path(), StoreOptions::default()).unwrap());

    {
        let _reader = EntityStore::open_persistent(schema(), dir.path(), StoreOptions::readonly()).unwrap();
        let second = EntityStore::open_persistent(schema(), dir.path(), StoreOptions::readonly());
        assert!(matches!(second, Err(OpenError::Locked(_))), "{second:?}");
        let writer = EntityStore::open_persistent(schema(), dir.path(), StoreOptions::default());
        assert!(matches!(writer, Err(OpenError::Locked(_))), "{writer:?}");
    }

    {
        let _writer = EntityStore::open_persistent(schema(), dir.path(), StoreOptions::default()).unwrap();
        let reader = EntityStore::open_persistent(schema(), dir.path(), StoreOptions::readonly());
        assert!(matches!(reader, Err(OpenError::Locked(_))), "{reader:?}");
    }

    // Released on drop, so readers can take turns.
    drop(EntityStore::open_persistent(schema(), dir.path(), StoreOptions::readonly()).unwrap());
    drop(EntityStore::open_persistent(schema(), dir.path(), StoreOptions::readonly()).unwrap());
}
