//! Cross-compartment wrapping: what a "node" is at an isolation boundary.
//!
//! Wrapping determines node identity for the whole traversal: a wrapper
//! and its target are one value seen from two compartments, never two
//! unrelated live nodes. The traverser relies on the wrapper's structural
//! edge to its target to follow through.
//!
//! The prototype chain is wrapped with an explicit stack, unwound
//! innermost-proto first, so long chains cannot overflow the native stack.
//! A cache entry is published only after its wrapper is fully constructed;
//! the prototype slot is patched afterwards.

use crate::error::Error;
use crate::heap::{CompartmentId, NodeId, ObjectClass, ScriptHeap, Value, WrapKey};

pub(crate) struct WrapBridge<'a> {
    heap: &'a ScriptHeap,
}

impl<'a> WrapBridge<'a> {
    pub(crate) const fn new(heap: &'a ScriptHeap) -> Self {
        Self { heap }
    }

    /// Wrap `value` for use inside `target`.
    ///
    /// Fails with [`Error::OutOfMemory`] if any allocation along the way
    /// is refused; no partially constructed wrapper is left reachable.
    pub(crate) fn wrap(&self, target: CompartmentId, value: Value) -> Result<Value, Error> {
        // Only heap values have to be wrapped or copied.
        if !value.is_markable() {
            return Ok(value);
        }
        match value {
            Value::String(string) => self.wrap_string(target, string).map(Value::String),
            Value::Object(object) => self.wrap_object(target, object).map(Value::Object),
            other => Ok(other),
        }
    }

    fn wrap_string(&self, target: CompartmentId, string: NodeId) -> Result<NodeId, Error> {
        // Already resident, nothing to do.
        if self.heap.compartment_of(string) == target {
            return Ok(string);
        }
        // Atoms are shared process-wide and need no copy.
        if self.heap.is_atom(string) {
            debug_assert_eq!(
                self.heap.compartment_of(string),
                self.heap.atoms_compartment()
            );
            return Ok(string);
        }
        if let Some(copy) = self.heap.lookup_wrapper(target, WrapKey::String(string)) {
            return Ok(copy);
        }
        let copy = self.heap.clone_string_into(target, string)?;
        self.heap
            .insert_wrapper(target, WrapKey::String(string), copy);
        Ok(copy)
    }

    fn wrap_object(&self, target: CompartmentId, object: NodeId) -> Result<NodeId, Error> {
        let global = self.heap.global_of(target).ok_or(Error::MissingGlobal)?;

        let object = self.unwrap(object);
        if self.heap.compartment_of(object) == target {
            return Ok(object);
        }

        // Well-known singletons translate to the target's own instance
        // rather than getting wrapped.
        if self.heap.class(object) == ObjectClass::StopIteration {
            return self.heap.stop_iteration(target);
        }

        if let Some(wrapper) = self.heap.lookup_wrapper(target, WrapKey::Object(object)) {
            self.repair_parents(wrapper, global);
            return Ok(wrapper);
        }

        // Walk the prototype chain collecting every object that still
        // needs a wrapper, stopping at the first prototype that resolves
        // without creating one.
        let mut chain = vec![object];
        let mut wrapped_proto = None;
        loop {
            let Some(&deepest) = chain.last() else { break };
            let Some(proto) = self.heap.proto(deepest) else {
                break;
            };
            let proto = self.unwrap(proto);
            if self.heap.compartment_of(proto) == target {
                wrapped_proto = Some(proto);
                break;
            }
            if self.heap.class(proto) == ObjectClass::StopIteration {
                wrapped_proto = Some(self.heap.stop_iteration(target)?);
                break;
            }
            if let Some(wrapper) = self.heap.lookup_wrapper(target, WrapKey::Object(proto)) {
                self.repair_parents(wrapper, global);
                wrapped_proto = Some(wrapper);
                break;
            }
            chain.push(proto);
        }

        // Unwind: wrap prototypes before the objects that use them, so a
        // failure mid-chain leaves only complete, correctly linked cache
        // entries behind.
        while chain.len() > 1 {
            let Some(source) = chain.pop() else { break };
            let wrapper = self.heap.new_wrapper(target, source, global)?;
            self.heap
                .insert_wrapper(target, WrapKey::Object(source), wrapper);
            self.heap.set_proto(wrapper, wrapped_proto);
            wrapped_proto = Some(wrapper);
        }

        let wrapper = self.heap.new_wrapper(target, object, global)?;
        self.heap
            .insert_wrapper(target, WrapKey::Object(object), wrapper);
        self.heap.set_proto(wrapper, wrapped_proto);
        Ok(wrapper)
    }

    /// Follow an existing wrapper chain to the true target.
    fn unwrap(&self, mut object: NodeId) -> NodeId {
        while let Some(target) = self.heap.wrapped_target(object) {
            object = target;
        }
        object
    }

    /// A cached wrapper can have drifted away from the current global
    /// (wrapper-of-wrapper chains); reparent the chain back to it.
    fn repair_parents(&self, wrapper: NodeId, global: NodeId) {
        if self.heap.parent(wrapper) == Some(global) {
            return;
        }
        let mut current = Some(wrapper);
        while let Some(node) = current {
            if self.heap.class(node) != ObjectClass::Wrapper {
                break;
            }
            self.heap.set_parent(node, Some(global));
            current = self.heap.proto(node);
        }
    }
}
