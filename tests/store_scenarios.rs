//! End-to-end scenarios run against every available backend.
//!
//! Each scenario builds a small IFC-like model, then checks the type, GlobalId
//! and inverse indices through the public facade.

use spfstore::{BackendChoice, EntityStore, InstanceId, Schema, StoreError, StoreOptions, Value};
use tempfile::TempDir;

fn schema() -> Schema {
    Schema::builder("IFC_MINI")
        .entity("IfcRoot", None, &["GlobalId", "Name"])
        .entity("IfcProduct", Some("IfcRoot"), &["ObjectPlacement", "Representation"])
        .entity("IfcWall", Some("IfcProduct"), &[])
        .entity("IfcSlab", Some("IfcProduct"), &["PredefinedType"])
        .entity("IfcCartesianPoint", None, &["Coordinates"])
        .entity("IfcProfileDef", None, &["ProfileName", "Position"])
        .entity("IfcExtrudedAreaSolid", None, &["SweptArea", "Position", "Depth"])
        .entity("IfcShapeRepresentation", None, &["Items"])
        .guid_root("IfcRoot")
        .build()
        .unwrap()
}

fn id(raw: u32) -> InstanceId {
    InstanceId::new(raw).unwrap()
}

/// One store per backend; the temp dir must outlive the persistent store.
fn stores() -> Vec<(EntityStore, Option<TempDir>)> {
    let mut out = vec![(EntityStore::in_memory(schema()), None)];
    #[cfg(feature = "persistent")]
    {
        let dir = tempfile::tempdir().unwrap();
        let store = EntityStore::open(
            schema(),
            BackendChoice::Persistent(dir.path().to_path_buf()),
            StoreOptions::default(),
        )
        .unwrap();
        out.push((store, Some(dir)));
    }
    out
}

fn collect(cursor: spfstore::IdCursor<'_>) -> Vec<InstanceId> {
    cursor.collect_ids().unwrap()
}

#[test]
fn test_profile_and_extrusion() {
    for (mut store, _dir) in stores() {
        let kind = store.backend_kind();
        let point = store.type_id("IfcCartesianPoint").unwrap();
        let profile = store.type_id("IfcProfileDef").unwrap();
        let solid = store.type_id("IfcExtrudedAreaSolid").unwrap();

        let origin = store
            .insert(point, vec![Value::List(vec![0.0.into(), 0.0.into()])])
            .unwrap();
        let p = store
            .insert(profile, vec!["rect".into(), Value::Ref(origin)])
            .unwrap();
        let s = store
            .insert(solid, vec![Value::Ref(p), Value::Ref(origin), Value::Float(3.0)])
            .unwrap();

        assert_eq!(collect(store.referencing_instances(p, None, None).unwrap()), vec![s], "{kind:?}");
        // Profile (type 5) sorts before the solid (type 6).
        assert_eq!(
            collect(store.referencing_instances(origin, None, None).unwrap()),
            vec![p, s],
            "{kind:?}"
        );
        assert_eq!(
            collect(store.referencing_instances(origin, Some(solid), None).unwrap()),
            vec![s]
        );
        assert_eq!(
            collect(store.referencing_instances(origin, None, Some(0)).unwrap()),
            Vec::<InstanceId>::new()
        );
        assert_eq!(store.total_inverses(origin).unwrap(), 2);

        store.delete(p).unwrap();
        let solid_now = store.instance_by_id(s).unwrap();
        assert_eq!(solid_now.attributes[0], Value::Null, "{kind:?}");
        assert_eq!(collect(store.referencing_instances(origin, None, None).unwrap()), vec![s]);
        assert_eq!(store.len().unwrap(), 2);
    }
}

#[test]
fn test_subtype_queries() {
    for (mut store, _dir) in stores() {
        let root = store.type_id("IfcRoot").unwrap();
        let product = store.type_id("IfcProduct").unwrap();
        let wall = store.type_id("IfcWall").unwrap();
        let slab = store.type_id("IfcSlab").unwrap();

        let w1 = store
            .insert(wall, vec![spfstore::new_guid().as_str().into(), "W1".into(), Value::Null, Value::Null])
            .unwrap();
        let s1 = store
            .insert(
                slab,
                vec![spfstore::new_guid().as_str().into(), "S1".into(), Value::Null, Value::Null, Value::Enum("FLOOR".into())],
            )
            .unwrap();
        let w2 = store
            .insert(wall, vec![spfstore::new_guid().as_str().into(), "W2".into(), Value::Null, Value::Null])
            .unwrap();

        let exact: Vec<_> = store
            .instances_of_type(product, false)
            .unwrap()
            .map(|i| i.unwrap().id)
            .collect();
        assert!(exact.is_empty());

        let all: Vec<_> = store
            .instances_of_type(root, true)
            .unwrap()
            .map(|i| i.unwrap().id)
            .collect();
        assert_eq!(all, vec![w1, w2, s1]);

        assert_eq!(collect(store.ids_of_type(wall)), vec![w1, w2]);
        let reversed: Vec<_> = store.ids_of_type(wall).rev().map(Result::unwrap).collect();
        assert_eq!(reversed, vec![w2, w1]);
        let types: Vec<_> = store.types().map(Result::unwrap).collect();
        assert_eq!(types, vec![wall, slab]);
    }
}

#[test]
fn test_guid_lookup_and_uniqueness() {
    for (mut store, _dir) in stores() {
        let wall = store.type_id("IfcWall").unwrap();
        let guid = spfstore::new_guid();
        let w = store
            .insert(wall, vec![guid.as_str().into(), Value::Null, Value::Null, Value::Null])
            .unwrap();
        assert_eq!(store.instance_by_guid(&guid).unwrap().id, w);

        let err = store
            .insert(wall, vec![guid.as_str().into(), Value::Null, Value::Null, Value::Null])
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateGuid { existing, .. } if existing == w));
        assert_eq!(store.len().unwrap(), 1);

        store.delete(w).unwrap();
        assert!(matches!(store.instance_by_guid(&guid), Err(StoreError::GuidNotFound(_))));
    }
}

#[test]
fn test_decoder_order_load() {
    for (mut store, _dir) in stores() {
        let point = store.type_id("IfcCartesianPoint").unwrap();
        let profile = store.type_id("IfcProfileDef").unwrap();
        let solid = store.type_id("IfcExtrudedAreaSolid").unwrap();
        let shape = store.type_id("IfcShapeRepresentation").unwrap();

        // #20 references #10 and #12 before either exists; #30 lists #20 twice.
        store
            .load(id(30), shape, vec![Value::List(vec![Value::Ref(id(20)), Value::Ref(id(20))])])
            .unwrap();
        store
            .load(id(20), solid, vec![Value::Ref(id(10)), Value::Ref(id(12)), Value::Float(1.0)])
            .unwrap();
        store.load(id(12), point, vec![Value::List(vec![])]).unwrap();
        store
            .load(id(10), profile, vec![Value::Null, Value::Ref(id(12))])
            .unwrap();
        assert_eq!(store.unresolved_count(), 0);
        assert_eq!(store.finish_load().unwrap(), 0);

        assert_eq!(collect(store.referencing_instances(id(12), None, None).unwrap()), vec![id(10), id(20)]);
        assert_eq!(collect(store.referencing_instances(id(20), None, None).unwrap()), vec![id(30)]);
        assert_eq!(store.total_inverses(id(20)).unwrap(), 2);
        assert_eq!(store.traverse(id(30), None).unwrap(), vec![id(30), id(20), id(10), id(12)]);

        let fresh = store.create(point).unwrap();
        assert_eq!(fresh, id(31));
    }
}

#[test]
fn test_delete_of_referenced_list_member() {
    for (mut store, _dir) in stores() {
        let point = store.type_id("IfcCartesianPoint").unwrap();
        let shape = store.type_id("IfcShapeRepresentation").unwrap();
        let a = store.create(point).unwrap();
        let b = store.create(point).unwrap();
        let rep = store
            .insert(shape, vec![Value::List(vec![Value::Ref(a), Value::Ref(b), Value::Ref(a)])])
            .unwrap();
        assert_eq!(store.total_inverses(a).unwrap(), 2);

        store.delete(a).unwrap();
        assert_eq!(
            store.instance_by_id(rep).unwrap().attributes[0],
            Value::List(vec![Value::Ref(b)])
        );
        assert_eq!(collect(store.referencing_instances(b, None, None).unwrap()), vec![rep]);
        assert!(!store.contains(a).unwrap());
    }
}

#[test]
fn test_failed_mutations_leave_store_unchanged() {
    for (mut store, _dir) in stores() {
        let profile = store.type_id("IfcProfileDef").unwrap();
        let point = store.type_id("IfcCartesianPoint").unwrap();
        let p = store.create(point).unwrap();
        let pd = store.insert(profile, vec![Value::Null, Value::Ref(p)]).unwrap();

        let err = store.set_attribute(pd, 1, Value::Ref(id(999))).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.instance_by_id(pd).unwrap().attributes[1], Value::Ref(p));
        assert_eq!(collect(store.referencing_instances(p, None, None).unwrap()), vec![pd]);

        let err = store.insert(profile, vec![Value::Null]).unwrap_err();
        assert!(matches!(err, StoreError::MalformedRecord { .. }));
        assert_eq!(store.len().unwrap(), 2);
    }
}

#[test]
fn test_deleting_the_extrusion_clears_its_indices() {
    for (mut store, _dir) in stores() {
        let kind = store.backend_kind();
        let point = store.type_id("IfcCartesianPoint").unwrap();
        let profile = store.type_id("IfcProfileDef").unwrap();
        let solid = store.type_id("IfcExtrudedAreaSolid").unwrap();

        let origin = store.create(point).unwrap();
        let p = store
            .insert(profile, vec!["rect".into(), Value::Ref(origin)])
            .unwrap();
        let s = store
            .insert(solid, vec![Value::Ref(p), Value::Ref(origin), Value::Float(3.0)])
            .unwrap();

        store.delete(s).unwrap();
        assert_eq!(
            collect(store.referencing_instances(p, None, None).unwrap()),
            Vec::<InstanceId>::new(),
            "{kind:?}"
        );
        assert_eq!(store.instances_of_type(solid, false).unwrap().count(), 0, "{kind:?}");
        assert_eq!(collect(store.referencing_instances(origin, None, None).unwrap()), vec![p]);
        assert_eq!(store.instance_by_id(p).unwrap().attributes[1], Value::Ref(origin));
    }
}

#[test]
fn test_deleted_id_stays_deleted() {
    for (mut store, _dir) in stores() {
        let kind = store.backend_kind();
        let point = store.type_id("IfcCartesianPoint").unwrap();
        let first = store.create(point).unwrap();
        store.delete(first).unwrap();

        let err = store.load(first, point, vec![Value::Null]).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId(dup) if dup == first), "{kind:?}");
        assert!(!store.contains(first).unwrap(), "{kind:?}");
        assert_eq!(store.len().unwrap(), 0);
        assert_eq!(store.create(point).unwrap(), id(2));
    }
}
