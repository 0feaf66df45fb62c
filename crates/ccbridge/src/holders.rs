//! Registry of native holders that keep script-heap nodes alive.
//!
//! A holder is registered with the native identity that owns it and an
//! enumeration capability (its [`Trace`] implementation). The registry owns
//! the holder for the registered lifetime; the native side controls that
//! lifetime through explicit add/remove or the RAII [`HolderGuard`].
//!
//! Discipline: the set is never mutated while it is being enumerated, with
//! one exemption for the single holder currently being unlinked by the
//! cycle collector.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rustc_hash::FxHashMap;

use crate::heap::NativeId;
use crate::trace::{Trace, Visitor};

// ============================================================================
// Process-lifetime token
// ============================================================================

/// Process-wide count of registered holders, across all runtimes.
///
/// While nonzero, shared infrastructure the holders depend on must stay
/// alive; the first registration acquires the token, the last removal
/// releases it.
static REGISTERED_HOLDERS: AtomicUsize = AtomicUsize::new(0);

fn acquire_process_token() {
    REGISTERED_HOLDERS.fetch_add(1, Ordering::Relaxed);
}

fn release_process_token() {
    let previous = REGISTERED_HOLDERS.fetch_sub(1, Ordering::Relaxed);
    debug_assert!(previous > 0, "process token released more than acquired");
}

/// Whether any holder is registered anywhere in the process.
#[must_use]
pub fn process_token_held() -> bool {
    REGISTERED_HOLDERS.load(Ordering::Relaxed) > 0
}

// ============================================================================
// HolderRegistry
// ============================================================================

pub(crate) struct HolderRegistry {
    holders: RefCell<FxHashMap<NativeId, Rc<dyn Trace>>>,
    enumerating: Cell<bool>,
    unlinking: Cell<Option<NativeId>>,
}

impl HolderRegistry {
    pub(crate) fn new() -> Self {
        Self {
            holders: RefCell::new(FxHashMap::default()),
            enumerating: Cell::new(false),
            unlinking: Cell::new(None),
        }
    }

    pub(crate) fn add(&self, native: NativeId, holder: Rc<dyn Trace>) {
        debug_assert!(
            !self.enumerating.get(),
            "holder registered while the registry is being enumerated"
        );
        let mut holders = self.holders.borrow_mut();
        let was_empty = holders.is_empty();
        let previous = holders.insert(native, holder);
        debug_assert!(previous.is_none(), "holder registered twice");
        if was_empty {
            acquire_process_token();
        }
    }

    pub(crate) fn remove(&self, native: NativeId) {
        debug_assert!(
            !self.enumerating.get(),
            "holder removed while the registry is being enumerated"
        );
        #[cfg(debug_assertions)]
        if self.unlinking.get() != Some(native) {
            self.assert_nothing_reachable(native);
        }
        let mut holders = self.holders.borrow_mut();
        let had_one = holders.len() == 1;
        let removed = holders.remove(&native);
        debug_assert!(removed.is_some(), "holder removed twice");
        if had_one && holders.is_empty() && removed.is_some() {
            release_process_token();
        }
    }

    pub(crate) fn contains(&self, native: NativeId) -> bool {
        self.holders.borrow().contains_key(&native)
    }

    pub(crate) fn count(&self) -> usize {
        self.holders.borrow().len()
    }

    /// Mark `native` as exempt from the empty-trace check on removal while
    /// the cycle collector unlinks it.
    pub(crate) fn begin_unlink(&self, native: NativeId) {
        debug_assert!(
            self.unlinking.get().is_none(),
            "a holder is already being unlinked"
        );
        self.unlinking.set(Some(native));
    }

    pub(crate) fn end_unlink(&self) {
        self.unlinking.set(None);
    }

    /// Invoke `f` once per registered holder.
    pub(crate) fn enumerate(&self, f: &mut dyn FnMut(NativeId, &Rc<dyn Trace>)) {
        debug_assert!(!self.enumerating.get(), "registry enumeration re-entered");
        let snapshot: Vec<(NativeId, Rc<dyn Trace>)> = self
            .holders
            .borrow()
            .iter()
            .map(|(&id, holder)| (id, Rc::clone(holder)))
            .collect();
        self.enumerating.set(true);
        for (native, holder) in &snapshot {
            f(*native, holder);
        }
        self.enumerating.set(false);
    }

    /// Trace every registered holder into `visitor`.
    pub(crate) fn trace_all(&self, visitor: &mut dyn Visitor) {
        self.enumerate(&mut |_, holder| holder.trace(visitor));
    }

    /// Advisory pre-collection pass: let each holder unmark itself as
    /// skippable.
    pub(crate) fn unmark_skippable(&self) {
        self.enumerate(&mut |_, holder| {
            let _ = holder.can_skip(true);
        });
    }

    #[cfg(debug_assertions)]
    fn assert_nothing_reachable(&self, native: NativeId) {
        struct AssertEmpty;
        impl Visitor for AssertEmpty {
            fn visit_node(&mut self, node: crate::heap::NodeId, name: &'static str) {
                panic!("holder removed while still tracing {node:?} via {name:?}");
            }
        }
        if let Some(holder) = self.holders.borrow().get(&native) {
            holder.trace(&mut AssertEmpty);
        }
    }
}

// ============================================================================
// RAII registration
// ============================================================================

/// Owning handle for a holder registration; deregisters on drop.
///
/// Holding the registration in a guard removes the trace-after-remove risk
/// class by construction: the registry entry cannot outlive the guard, and
/// the guard is dropped with the native object that owns the slots.
pub struct HolderGuard {
    registry: Rc<HolderRegistry>,
    native: NativeId,
}

impl HolderGuard {
    pub(crate) fn new(registry: Rc<HolderRegistry>, native: NativeId) -> Self {
        Self { registry, native }
    }

    /// The native identity this registration belongs to.
    #[must_use]
    pub fn native(&self) -> NativeId {
        self.native
    }
}

impl Drop for HolderGuard {
    fn drop(&mut self) {
        self.registry.remove(self.native);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{NodeId, ScriptHeap};
    use crate::trace::ScriptSlot;

    struct SlotHolder {
        slot: ScriptSlot,
    }

    impl Trace for SlotHolder {
        fn trace(&self, visitor: &mut dyn Visitor) {
            self.slot.trace(visitor);
        }
    }

    fn gray_target(heap: &ScriptHeap) -> NodeId {
        let zone = heap.new_zone();
        let compartment = heap.new_compartment(zone, false);
        heap.new_object(compartment).unwrap()
    }

    #[test]
    fn add_remove_round_trip() {
        let registry = HolderRegistry::new();
        let holder = Rc::new(SlotHolder {
            slot: ScriptSlot::new(),
        });
        registry.add(NativeId(1), holder);
        assert!(registry.contains(NativeId(1)));
        assert_eq!(registry.count(), 1);
        assert!(process_token_held());

        registry.remove(NativeId(1));
        assert!(!registry.contains(NativeId(1)));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "holder removed while still tracing")]
    fn remove_with_occupied_slot_is_flagged() {
        let heap = ScriptHeap::new();
        let node = gray_target(&heap);

        let registry = HolderRegistry::new();
        let holder = Rc::new(SlotHolder {
            slot: ScriptSlot::new(),
        });
        holder.slot.set(node);
        registry.add(NativeId(2), holder);
        registry.remove(NativeId(2));
    }

    #[test]
    fn unlink_exemption_allows_occupied_removal() {
        let heap = ScriptHeap::new();
        let node = gray_target(&heap);

        let registry = HolderRegistry::new();
        let holder = Rc::new(SlotHolder {
            slot: ScriptSlot::new(),
        });
        holder.slot.set(node);
        registry.add(NativeId(3), holder);

        registry.begin_unlink(NativeId(3));
        registry.remove(NativeId(3));
        registry.end_unlink();
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn guard_deregisters_on_drop() {
        let registry = Rc::new(HolderRegistry::new());
        let holder = Rc::new(SlotHolder {
            slot: ScriptSlot::new(),
        });
        {
            registry.add(NativeId(4), holder);
            let _guard = HolderGuard::new(Rc::clone(&registry), NativeId(4));
            assert!(registry.contains(NativeId(4)));
        }
        assert!(!registry.contains(NativeId(4)));
    }
}
