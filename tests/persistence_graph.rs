//! Object-graph persistence: identity preservation, primitive round trips,
//! and lazy-load behavior, driven directly against the codec and session.

use std::cell::Cell;
use std::collections::BTreeMap;

use ember_vm::bytecode::{ClassFile, FieldDef};
use ember_vm::persistence::{GraphStore, InMemoryGraphStore, PersistenceSession, StorageFees};
use ember_vm::runtime::{
    ClassRegistry, Helper, LoaderState, ObjHandle, ObjectHeap, ShadowObject, ShadowValue,
};
use ember_vm::EnergySchedule;

fn class(name: &str, fields: Vec<(&str, &str, bool)>) -> ClassFile {
    ClassFile {
        name: name.to_string(),
        superclass: Some("ember/lang/Object".to_string()),
        interfaces: vec![],
        is_interface: false,
        manual_persistence: false,
        signature: None,
        fields: fields
            .into_iter()
            .map(|(n, d, is_static)| FieldDef {
                name: n.to_string(),
                descriptor: d.to_string(),
                is_static,
                is_synthetic: false,
            })
            .collect(),
        methods: vec![],
    }
}

fn graph_registry() -> ClassRegistry {
    let classes: BTreeMap<String, ClassFile> = [
        class(
            "app/Graph",
            vec![
                ("rootLeft", "Lapp/Node;", true),
                ("rootRight", "Lapp/Node;", true),
            ],
        ),
        class(
            "app/Node",
            vec![("value", "I", false), ("next", "Lapp/Node;", false)],
        ),
    ]
    .into_iter()
    .map(|c| (c.name.clone(), c))
    .collect();
    ClassRegistry::build(&classes).unwrap()
}

fn node(
    heap: &mut ObjectHeap,
    registry: &ClassRegistry,
    id: i64,
    value: i32,
) -> ObjHandle {
    let class = registry.id_of("app/Node").unwrap();
    heap.alloc(ShadowObject {
        class,
        instance_id: id,
        loader: LoaderState::Resident,
        fields: vec![ShadowValue::Int(value), ShadowValue::Ref(None)],
        payload: None,
        identity_hash: id as i32,
    })
}

fn link(heap: &mut ObjectHeap, from: ObjHandle, to: ObjHandle) {
    heap.get_mut(from).fields[1] = ShadowValue::Ref(Some(to));
}

/// Build the diamond R -> {A, B}; A -> C; B -> D; C -> E; D -> E and save
/// it, returning the flushed store.
fn save_diamond() -> InMemoryGraphStore {
    let registry = graph_registry();
    let mut heap = ObjectHeap::new();
    let a = node(&mut heap, &registry, 1, 0);
    let b = node(&mut heap, &registry, 2, 1);
    let c = node(&mut heap, &registry, 3, 2);
    let d = node(&mut heap, &registry, 4, 3);
    let e = node(&mut heap, &registry, 5, 4);
    link(&mut heap, a, c);
    link(&mut heap, b, d);
    link(&mut heap, c, e);
    link(&mut heap, d, e);
    let statics = vec![ShadowValue::Ref(Some(a)), ShadowValue::Ref(Some(b))];

    let schedule = EnergySchedule::default();
    let mut helper = Helper::new(1_000_000, 6, 6, 8);
    let mut fees = StorageFees::new(&mut helper, &schedule);
    let mut store = InMemoryGraphStore::new();
    let mut session = PersistenceSession::new();
    session
        .codec
        .save_statics(&heap, &registry, &mut store, &mut fees, &statics)
        .unwrap();
    store.flush_writes();
    store
}

/// Hydrate the statics and chase `slot.next.next`, faulting along the way.
fn chase<S: GraphStore>(
    session: &mut PersistenceSession,
    heap: &mut ObjectHeap,
    registry: &ClassRegistry,
    store: &S,
    fees: &mut StorageFees<'_>,
    root: ObjHandle,
) -> ObjHandle {
    let mut cursor = root;
    for _ in 0..2 {
        session
            .ensure_loaded(heap, registry, store, fees, cursor)
            .unwrap();
        cursor = match heap.get(cursor).fields[1] {
            ShadowValue::Ref(Some(next)) => next,
            other => panic!("chain broke at {:?}", other),
        };
    }
    session
        .ensure_loaded(heap, registry, store, fees, cursor)
        .unwrap();
    cursor
}

#[test]
fn test_diamond_reload_preserves_aliasing() {
    let store = save_diamond();

    // A fresh task: new heap, new session, same store.
    let registry = graph_registry();
    let mut heap = ObjectHeap::new();
    let mut session = PersistenceSession::new();
    let schedule = EnergySchedule::default();
    let mut helper = Helper::new(1_000_000, 100, 100, 8);
    let mut fees = StorageFees::new(&mut helper, &schedule);

    let mut statics = Vec::new();
    session
        .codec
        .hydrate_statics(&mut heap, &registry, &store, &mut fees, &mut statics)
        .unwrap();
    let left = statics[0].as_ref_handle().flatten().unwrap();
    let right = statics[1].as_ref_handle().flatten().unwrap();

    let via_left = chase(&mut session, &mut heap, &registry, &store, &mut fees, left);
    let via_right = chase(&mut session, &mut heap, &registry, &store, &mut fees, right);

    // The same instance, not two equal instances.
    assert_eq!(via_left, via_right);
    assert_eq!(heap.get(via_left).fields[0], ShadowValue::Int(4));
}

#[test]
fn test_primitive_fields_round_trip_exactly() {
    let classes: BTreeMap<String, ClassFile> = [class(
        "app/Prims",
        vec![
            ("root", "Lapp/Prims;", true),
            ("b", "B", false),
            ("s", "S", false),
            ("c", "C", false),
            ("i", "I", false),
            ("j", "J", false),
            ("f", "F", false),
            ("d", "D", false),
            ("z", "Z", false),
        ],
    )]
    .into_iter()
    .map(|c| (c.name.clone(), c))
    .collect();
    let registry = ClassRegistry::build(&classes).unwrap();
    let class_id = registry.id_of("app/Prims").unwrap();

    let values = vec![
        ShadowValue::Byte(-128),
        ShadowValue::Short(-32768),
        ShadowValue::Char(0xFFFE),
        ShadowValue::Int(i32::MIN),
        ShadowValue::Long(i64::MAX),
        ShadowValue::Float(-0.0),
        ShadowValue::Double(f64::MIN_POSITIVE),
        ShadowValue::Bool(true),
    ];

    let mut heap = ObjectHeap::new();
    let obj = heap.alloc(ShadowObject {
        class: class_id,
        instance_id: 1,
        loader: LoaderState::Resident,
        fields: values.clone(),
        payload: None,
        identity_hash: 1,
    });
    let statics = vec![ShadowValue::Ref(Some(obj))];

    let schedule = EnergySchedule::default();
    let mut helper = Helper::new(1_000_000, 2, 2, 8);
    let mut fees = StorageFees::new(&mut helper, &schedule);
    let mut store = InMemoryGraphStore::new();
    let mut session = PersistenceSession::new();
    session
        .codec
        .save_statics(&heap, &registry, &mut store, &mut fees, &statics)
        .unwrap();
    store.flush_writes();

    let mut heap2 = ObjectHeap::new();
    let mut session2 = PersistenceSession::new();
    let mut helper2 = Helper::new(1_000_000, 2, 2, 8);
    let mut fees2 = StorageFees::new(&mut helper2, &schedule);
    let mut statics2 = Vec::new();
    session2
        .codec
        .hydrate_statics(&mut heap2, &registry, &store, &mut fees2, &mut statics2)
        .unwrap();
    let reloaded = statics2[0].as_ref_handle().flatten().unwrap();
    session2
        .ensure_loaded(&mut heap2, &registry, &store, &mut fees2, reloaded)
        .unwrap();
    assert_eq!(heap2.get(reloaded).fields, values);
}

/// A store that counts reads, for the at-most-once lazy-load contract.
#[derive(Default)]
struct CountingStore {
    inner: InMemoryGraphStore,
    reads: Cell<usize>,
}

impl GraphStore for CountingStore {
    fn read(&self, key: u64) -> Option<Vec<u8>> {
        self.reads.set(self.reads.get() + 1);
        self.inner.read(key)
    }
    fn write(&mut self, key: u64, bytes: Vec<u8>) {
        self.inner.write(key, bytes)
    }
    fn flush_writes(&mut self) {
        self.inner.flush_writes()
    }
    fn discard_writes(&mut self) {
        self.inner.discard_writes()
    }
    fn simple_hash_code(&self) -> Vec<u8> {
        self.inner.simple_hash_code()
    }
}

#[test]
fn test_stub_faults_touch_the_store_at_most_once() {
    let store = CountingStore {
        inner: save_diamond(),
        reads: Cell::new(0),
    };
    let registry = graph_registry();
    let mut heap = ObjectHeap::new();
    let mut session = PersistenceSession::new();
    let schedule = EnergySchedule::default();
    let mut helper = Helper::new(1_000_000, 100, 100, 8);
    let mut fees = StorageFees::new(&mut helper, &schedule);

    let mut statics = Vec::new();
    session
        .codec
        .hydrate_statics(&mut heap, &registry, &store, &mut fees, &mut statics)
        .unwrap();
    assert_eq!(store.reads.get(), 1);

    let left = statics[0].as_ref_handle().flatten().unwrap();
    assert!(heap.is_stub(left));
    for _ in 0..5 {
        session
            .ensure_loaded(&mut heap, &registry, &store, &mut fees, left)
            .unwrap();
    }
    // One statics read plus one object fault, no matter how many accesses.
    assert_eq!(store.reads.get(), 2);
    assert!(!heap.is_stub(left));
}
