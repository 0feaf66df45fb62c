//! The bridge runtime: composition of the marking passes, the holder
//! registry, the traversal bridges, and the thread hand-off bookkeeping.

use std::cell::Cell;
use std::rc::Rc;

use parking_lot::Mutex;

use crate::callback::{GraphBuilder, NativeRoot, RootBuilder};
use crate::error::Error;
use crate::heap::{CompartmentId, ContextId, NativeId, NodeId, ScriptHeap, Value, ZoneId};
use crate::holders::{HolderGuard, HolderRegistry};
use crate::mark::{self, CollectPhase, MarkController};
use crate::metrics::PassMetrics;
use crate::trace::{Trace, Visitor};
use crate::traverse::{TraverseMode, Traverser};
use crate::weakmap::WeakMapBridge;
use crate::wrap::WrapBridge;
use crate::zone;

#[cfg(feature = "tracing")]
use crate::tracing as trc;

// ============================================================================
// Collection reasons
// ============================================================================

/// Why a collection attempt was requested. Created and consumed within one
/// call, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectReason {
    /// An explicit API request.
    ApiCall,
    /// The host reported memory pressure.
    MemoryPressure,
    /// An allocation threshold was crossed.
    AllocTrigger,
    /// The runtime is shutting down.
    Shutdown,
    /// The cycle collector needs fresh colors.
    CcForced,
}

impl CollectReason {
    #[cfg(feature = "tracing")]
    const fn label(self) -> &'static str {
        match self {
            Self::ApiCall => "api_call",
            Self::MemoryPressure => "memory_pressure",
            Self::AllocTrigger => "alloc_trigger",
            Self::Shutdown => "shutdown",
            Self::CcForced => "cc_forced",
        }
    }
}

// ============================================================================
// Thread affinity
// ============================================================================

/// Which thread currently owns the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    Main,
    Collector,
    Detached,
}

struct ThreadAffinity {
    state: Mutex<Owner>,
}

impl ThreadAffinity {
    fn new() -> Self {
        Self {
            state: Mutex::new(Owner::Main),
        }
    }

    fn leave_main(&self) {
        let mut state = self.state.lock();
        debug_assert_eq!(*state, Owner::Main);
        *state = Owner::Detached;
    }

    fn enter_main(&self) {
        let mut state = self.state.lock();
        debug_assert_eq!(*state, Owner::Detached);
        *state = Owner::Main;
    }

    fn enter_collector(&self) {
        let mut state = self.state.lock();
        debug_assert_eq!(*state, Owner::Detached);
        *state = Owner::Collector;
    }

    fn leave_collector(&self) {
        let mut state = self.state.lock();
        debug_assert_eq!(*state, Owner::Collector);
        *state = Owner::Detached;
    }

    fn is_main(&self) -> bool {
        *self.state.lock() == Owner::Main
    }
}

// ============================================================================
// Runtime
// ============================================================================

/// A script runtime with cross-heap cycle-collection support.
///
/// Owns the modeled script heap, the native holder registry, and the
/// coloring state. All operations run on the thread that currently owns
/// the runtime; ownership can be handed to a collector thread for the
/// duration of a cycle-collection pass.
pub struct Runtime {
    heap: ScriptHeap,
    holders: Rc<HolderRegistry>,
    controller: MarkController,
    affinity: ThreadAffinity,
    collections: Cell<u64>,
    metrics: Cell<PassMetrics>,
}

impl Runtime {
    /// Create a runtime with an unbounded script heap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_heap(ScriptHeap::new())
    }

    /// Create a runtime whose heap refuses to grow past `max_nodes`.
    #[must_use]
    pub fn with_heap_limit(max_nodes: usize) -> Self {
        Self::with_heap(ScriptHeap::with_limit(max_nodes))
    }

    fn with_heap(heap: ScriptHeap) -> Self {
        Self {
            heap,
            holders: Rc::new(HolderRegistry::new()),
            controller: MarkController::new(),
            affinity: ThreadAffinity::new(),
            collections: Cell::new(0),
            metrics: Cell::new(PassMetrics::new()),
        }
    }

    /// The engine-side heap surface.
    #[must_use]
    pub const fn heap(&self) -> &ScriptHeap {
        &self.heap
    }

    /// Current phase of the collection state machine.
    #[must_use]
    pub fn phase(&self) -> CollectPhase {
        self.controller.phase()
    }

    /// Collection passes completed so far.
    #[must_use]
    pub fn collection_count(&self) -> u64 {
        self.collections.get()
    }

    /// Statistics from the most recent passes.
    #[must_use]
    pub fn last_pass_metrics(&self) -> PassMetrics {
        self.metrics.get()
    }

    // ------------------------------------------------------------------
    // Collection
    // ------------------------------------------------------------------

    /// Run a full collection: black roots, then gray roots, then weak-map
    /// propagation. Recomputes every node's color.
    pub fn collect(&self, reason: CollectReason) {
        #[cfg(not(feature = "tracing"))]
        let _ = reason;
        #[cfg(feature = "tracing")]
        let _span = trc::span_collection(reason.label(), self.collections.get() + 1);

        // An in-progress incremental collection is force-finished so the
        // cycle collector never observes a half-marked heap.
        if self.heap.incremental_in_progress() {
            self.heap.finish_incremental_mark();
        }

        self.controller.begin_black();
        self.heap.clear_colors();
        let mut marked_black = self.heap.mark_roots_black();
        marked_black += mark::mark_black_roots(&self.heap);

        self.controller.begin_gray();
        let marked_gray = mark::mark_gray_roots(&self.heap, &self.holders);
        self.heap.propagate_weak_marks();
        self.controller.finish_marking();

        self.heap.set_gray_bits_valid(true);
        self.collections.set(self.collections.get() + 1);

        let mut metrics = self.metrics.get();
        metrics.collections = self.collections.get();
        metrics.marked_black = marked_black;
        metrics.marked_gray = marked_gray;
        self.metrics.set(metrics);

        #[cfg(feature = "tracing")]
        trc::log_marked(marked_black, marked_gray);
    }

    /// Whether node colors are stale and a collection must run before the
    /// next cycle-collection pass.
    #[must_use]
    pub fn needs_collect(&self) -> bool {
        !self.heap.gray_bits_valid()
    }

    /// Repair gray bits left stale by incremental marking. Returns the
    /// number of nodes recolored.
    ///
    /// # Panics
    ///
    /// Panics if an incremental collection increment is in flight;
    /// coloring is only meaningful at a mark-complete boundary.
    pub fn fix_gray_bits(&self) -> usize {
        let recolored = WeakMapBridge::new(&self.heap).fix_gray_bits();
        let mut metrics = self.metrics.get();
        metrics.gray_repaired = recolored;
        self.metrics.set(metrics);
        #[cfg(feature = "tracing")]
        trc::log_gray_repair(recolored);
        recolored
    }

    // ------------------------------------------------------------------
    // Cycle collection
    // ------------------------------------------------------------------

    /// Feed the cycle collector its roots: contexts whose default global
    /// is gray, holders that reach at least one gray node, and all
    /// relevant weak mappings.
    ///
    /// # Errors
    ///
    /// [`Error::CollectionRequired`] if no collection has completed or the
    /// colors no longer reflect the heap.
    pub fn begin_cycle_collection(&self, cb: &mut dyn RootBuilder) -> Result<(), Error> {
        if self.heap.incremental_in_progress() {
            self.heap.finish_incremental_mark();
            self.heap.set_gray_bits_valid(false);
        }
        if self.collections.get() == 0 || !self.heap.gray_bits_valid() {
            return Err(Error::CollectionRequired);
        }

        #[cfg(feature = "tracing")]
        let _span = trc::span_graph_build(self.collections.get());

        self.controller.begin_traversal();

        let mut native_roots = 0;

        // Contexts whose global was not marked by the engine need their
        // native side in the graph for the global to be colored correctly.
        for context in self.heap.contexts() {
            if let Some(global) = self.heap.context_global(context) {
                if self.heap.is_gray(global) {
                    cb.note_native_root(NativeRoot::Context(context));
                    native_roots += 1;
                }
            }
        }

        // Holders participate only when their trace reaches something the
        // collector can represent and collect.
        let heap = &self.heap;
        self.holders.enumerate(&mut |native, holder| {
            let mut check = ParticipationCheck {
                heap,
                participates: false,
            };
            holder.trace(&mut check);
            if check.participates {
                cb.note_native_root(NativeRoot::Holder(native));
                native_roots += 1;
            }
        });

        let weak_mappings = WeakMapBridge::new(&self.heap).report_mappings(cb);

        let zones_merged = zone::should_merge(&self.heap);
        let mut metrics = self.metrics.get();
        metrics.native_roots = native_roots;
        metrics.weak_mappings = weak_mappings;
        metrics.zones_merged = zones_merged;
        self.metrics.set(metrics);

        #[cfg(feature = "tracing")]
        trc::log_graph(native_roots, weak_mappings, zones_merged);

        Ok(())
    }

    /// End the traversal stage started by
    /// [`Self::begin_cycle_collection`].
    pub fn finish_cycle_collection(&self) {
        self.controller.finish_traversal();
    }

    /// Whether the collector should consume zones as merged synthetic
    /// nodes this pass.
    #[must_use]
    pub fn should_merge_zones(&self) -> bool {
        zone::should_merge(&self.heap)
    }

    /// Report one node to the collector.
    pub fn traverse_node(&self, node: NodeId, mode: TraverseMode, cb: &mut dyn GraphBuilder) {
        Traverser::new(&self.heap).traverse(node, mode, cb);
    }

    /// Report one context to the collector.
    pub fn traverse_context(&self, context: ContextId, cb: &mut dyn GraphBuilder) {
        Traverser::new(&self.heap).traverse_context(context, cb);
    }

    /// Report a whole zone as one synthetic node.
    pub fn traverse_zone(&self, zone: ZoneId, cb: &mut dyn GraphBuilder) {
        zone::traverse_zone(&self.heap, zone, cb);
    }

    // ------------------------------------------------------------------
    // Wrapping
    // ------------------------------------------------------------------

    /// Wrap `value` for use inside `target`.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfMemory`] if wrapper or copy allocation fails;
    /// [`Error::MissingGlobal`] if `target` has no global to parent a
    /// wrapper to. No partially constructed wrapper is left reachable.
    pub fn wrap(&self, target: CompartmentId, value: Value) -> Result<Value, Error> {
        WrapBridge::new(&self.heap).wrap(target, value)
    }

    // ------------------------------------------------------------------
    // Holders
    // ------------------------------------------------------------------

    /// Register `holder` as the enumeration capability for `native`.
    pub fn add_holder(&self, native: NativeId, holder: Rc<dyn Trace>) {
        self.holders.add(native, holder);
    }

    /// Deregister the holder for `native`. In debug builds the holder's
    /// trace must report nothing unless `native` is currently being
    /// unlinked.
    pub fn remove_holder(&self, native: NativeId) {
        self.holders.remove(native);
    }

    /// Register `holder` and receive a guard that deregisters it on drop.
    pub fn register_holder(&self, native: NativeId, holder: Rc<dyn Trace>) -> HolderGuard {
        self.holders.add(native, holder);
        HolderGuard::new(Rc::clone(&self.holders), native)
    }

    /// Whether a holder is registered for `native`.
    #[must_use]
    pub fn is_holder_registered(&self, native: NativeId) -> bool {
        self.holders.contains(native)
    }

    /// Number of registered holders.
    #[must_use]
    pub fn holder_count(&self) -> usize {
        self.holders.count()
    }

    /// Exempt `native` from the empty-trace removal check while the cycle
    /// collector unlinks it.
    pub fn begin_unlink(&self, native: NativeId) {
        self.holders.begin_unlink(native);
    }

    /// End the unlink exemption.
    pub fn end_unlink(&self) {
        self.holders.end_unlink();
    }

    /// Advisory pre-collection pass over all holders.
    pub fn unmark_skippable_holders(&self) {
        self.holders.unmark_skippable();
    }

    // ------------------------------------------------------------------
    // Thread hand-off
    // ------------------------------------------------------------------

    /// Release the runtime from the main thread so a collector thread can
    /// take it. Refuses while any context has outstanding script
    /// execution.
    #[must_use]
    pub fn leave_main_thread(&self) -> bool {
        if !self.affinity.is_main() || self.heap.any_context_active() {
            return false;
        }
        self.affinity.leave_main();
        true
    }

    /// Re-take the runtime on the main thread.
    pub fn enter_main_thread(&self) {
        self.affinity.enter_main();
    }

    /// Take the runtime on the collector thread for the duration of a
    /// cycle-collection pass.
    pub fn enter_collector_thread(&self) {
        self.affinity.enter_collector();
    }

    /// Release the runtime from the collector thread.
    pub fn leave_collector_thread(&self) {
        self.affinity.leave_collector();
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

/// Does a holder's trace reach anything the collector can represent?
struct ParticipationCheck<'a> {
    heap: &'a ScriptHeap,
    participates: bool,
}

impl Visitor for ParticipationCheck<'_> {
    fn visit_node(&mut self, node: NodeId, _name: &'static str) {
        if !self.participates
            && self.heap.kind(node).is_colorable()
            && self.heap.is_gray(node)
        {
            self.participates = true;
        }
    }
}
