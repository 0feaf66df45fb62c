//! Identity guarantees of cross-compartment wrapping, driven through the
//! runtime API.

use ccbridge::{
    CollectReason, Color, CompartmentId, Error, GraphBuilder, NativeId, NodeId, Runtime,
    TraverseMode, Value,
};

fn object(value: Value) -> NodeId {
    match value {
        Value::Object(node) => node,
        other => panic!("expected an object, got {other:?}"),
    }
}

fn two_compartments(runtime: &Runtime) -> (CompartmentId, CompartmentId) {
    let heap = runtime.heap();
    let zone_a = heap.new_zone();
    let zone_b = heap.new_zone();
    let a = heap.new_compartment(zone_a, false);
    let b = heap.new_compartment(zone_b, false);
    heap.new_global(a).unwrap();
    heap.new_global(b).unwrap();
    (a, b)
}

#[test]
fn wrapping_is_idempotent_up_to_identity() {
    let runtime = Runtime::new();
    let (a, b) = two_compartments(&runtime);
    let node = runtime.heap().new_object(a).unwrap();

    // Wrapping an already-wrapped value back into its own source
    // compartment is a no-op.
    let wrapped = runtime.wrap(b, Value::Object(node)).unwrap();
    assert_eq!(runtime.wrap(a, wrapped), Ok(Value::Object(node)));

    // Two wraps of the same value into the same target return the same
    // pointer.
    assert_eq!(runtime.wrap(b, Value::Object(node)), Ok(wrapped));
}

#[test]
fn one_live_wrapper_per_value_and_target_pair() {
    let runtime = Runtime::new();
    let (a, b) = two_compartments(&runtime);
    let heap = runtime.heap();

    let proto = heap.new_object(a).unwrap();
    let node = heap.new_object(a).unwrap();
    heap.set_proto(node, Some(proto));

    // The first wrap creates wrappers for the whole prototype chain;
    // wrapping the prototype afterwards must reuse the chain's entry, not
    // mint a second wrapper.
    let wrapper = object(runtime.wrap(b, Value::Object(node)).unwrap());
    let proto_wrapper = heap.proto(wrapper).unwrap();
    assert_eq!(
        runtime.wrap(b, Value::Object(proto)),
        Ok(Value::Object(proto_wrapper))
    );

    // Reentrant wrapping of the same pair keeps returning it.
    for _ in 0..3 {
        assert_eq!(
            runtime.wrap(b, Value::Object(node)),
            Ok(Value::Object(wrapper))
        );
    }
}

#[test]
fn string_wrapping_copies_once_per_target() {
    let runtime = Runtime::new();
    let (a, b) = two_compartments(&runtime);
    let heap = runtime.heap();

    // A string already resident in the target compartment is returned
    // unchanged.
    let resident = heap.new_string(b).unwrap();
    assert_eq!(runtime.wrap(b, Value::String(resident)), Ok(Value::String(resident)));

    // A foreign string is copied, and the copy is stable across repeats.
    let foreign = heap.new_string(a).unwrap();
    let Value::String(copy) = runtime.wrap(b, Value::String(foreign)).unwrap() else {
        panic!("expected a string");
    };
    assert_ne!(copy, foreign);
    assert_eq!(runtime.wrap(b, Value::String(foreign)), Ok(Value::String(copy)));
}

#[test]
fn failed_wrap_leaves_no_reachable_wrapper() {
    // Room for the setup plus exactly one wrapper.
    let runtime = Runtime::with_heap_limit(5);
    let (a, b) = two_compartments(&runtime);
    let heap = runtime.heap();

    let proto = heap.new_object(a).unwrap();
    let node = heap.new_object(a).unwrap();
    heap.set_proto(node, Some(proto));

    // The prototype's wrapper is committed, then the node's own wrapper
    // allocation fails and the call aborts as a whole.
    assert_eq!(runtime.wrap(b, Value::Object(node)), Err(Error::OutOfMemory));
    assert_eq!(runtime.wrap(b, Value::Object(node)), Err(Error::OutOfMemory));

    // The committed prototype wrapper is complete and reusable on its own.
    let proto_wrapper = object(runtime.wrap(b, Value::Object(proto)).unwrap());
    assert_eq!(heap.wrapped_target(proto_wrapper), Some(proto));
}

#[test]
fn traverser_follows_wrappers_through_to_their_target() {
    let runtime = Runtime::new();
    let (a, b) = two_compartments(&runtime);
    let heap = runtime.heap();

    let target = heap.new_object(a).unwrap();
    let wrapper = object(runtime.wrap(b, Value::Object(target)).unwrap());

    heap.mark(wrapper, Color::Gray);
    heap.mark(target, Color::Gray);

    #[derive(Default)]
    struct Children(Vec<NodeId>);
    impl GraphBuilder for Children {
        fn describe_gc_node(&mut self, _is_marked: bool, _name: &str) {}
        fn describe_refcounted_node(&mut self, _refcount: u32, _name: &str) {}
        fn note_script_child(&mut self, node: NodeId) {
            self.0.push(node);
        }
        fn note_refcounted_child(&mut self, _native: NativeId) {}
        fn note_native_child(&mut self, _native: NativeId) {}
    }

    // The wrapper body is not opaque: its one script edge is the target,
    // so wrapper and target are never two unrelated live nodes.
    let mut cb = Children::default();
    runtime.traverse_node(wrapper, TraverseMode::Full, &mut cb);
    assert_eq!(cb.0, vec![target]);
}

#[test]
fn primitives_and_missing_globals() {
    let runtime = Runtime::new();
    let heap = runtime.heap();
    let zone = heap.new_zone();
    let bare = heap.new_compartment(zone, false);
    let node_zone = heap.new_zone();
    let source = heap.new_compartment(node_zone, false);
    let node = heap.new_object(source).unwrap();

    // Primitives cross any boundary untouched.
    assert_eq!(runtime.wrap(bare, Value::Null), Ok(Value::Null));
    assert_eq!(
        runtime.wrap(bare, Value::Boolean(true)),
        Ok(Value::Boolean(true))
    );

    // An object cannot be wrapped into a compartment with no global.
    assert_eq!(
        runtime.wrap(bare, Value::Object(node)),
        Err(Error::MissingGlobal)
    );
}

#[test]
fn wrappers_survive_collection_with_correct_colors() {
    let runtime = Runtime::new();
    let (a, b) = two_compartments(&runtime);
    let heap = runtime.heap();

    let target = heap.new_object(a).unwrap();
    heap.add_root(target);
    let wrapper = object(runtime.wrap(b, Value::Object(target)).unwrap());

    // Nothing roots the wrapper itself; the rooted target stays black.
    runtime.collect(CollectReason::ApiCall);
    assert_eq!(heap.color(target), Color::Black);
    assert_eq!(heap.color(wrapper), Color::White);
}
