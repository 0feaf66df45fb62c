//! Collection phases and the two-color root marking passes.
//!
//! Script nodes fall into three root categories:
//!
//! 1. roots held by the engine itself — marked black by the engine's own
//!    root marking;
//! 2. roots held by native code that is guaranteed alive (a context's
//!    global while that context has outstanding work) — marked black by
//!    [`mark_black_roots`];
//! 3. all other native-held roots (registered holders, remaining context
//!    globals) — marked gray by [`mark_gray_roots`].
//!
//! A node in more than one category ends up black: gray marking is
//! mark-if-unmarked and never demotes. Black marking must be exhaustive; a
//! missing edge there is a use-after-free hazard in the engine's sweeper.

use std::cell::Cell;

use crate::heap::{Color, NodeId, ScriptHeap};
use crate::holders::HolderRegistry;
use crate::trace::Visitor;

// ============================================================================
// Phase state machine
// ============================================================================

/// Phase of the current collection attempt.
///
/// Coloring state is written only during the named phase; the controller
/// replaces call-order discipline with checked transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectPhase {
    /// No collection attempt in flight.
    Idle,
    /// Black roots are being marked.
    BlackMarking,
    /// Gray roots are being marked. Black marking has completed in full.
    GrayMarking,
    /// The cycle collector is consuming the colored graph.
    Traversing,
    /// Marking is complete; colors are valid.
    Done,
}

pub(crate) struct MarkController {
    phase: Cell<CollectPhase>,
}

impl MarkController {
    pub(crate) const fn new() -> Self {
        Self {
            phase: Cell::new(CollectPhase::Idle),
        }
    }

    pub(crate) fn phase(&self) -> CollectPhase {
        self.phase.get()
    }

    pub(crate) fn begin_black(&self) {
        debug_assert!(
            matches!(self.phase.get(), CollectPhase::Idle | CollectPhase::Done),
            "collection attempt started during {:?}",
            self.phase.get()
        );
        self.phase.set(CollectPhase::BlackMarking);
    }

    pub(crate) fn begin_gray(&self) {
        debug_assert_eq!(
            self.phase.get(),
            CollectPhase::BlackMarking,
            "gray marking must follow black marking"
        );
        self.phase.set(CollectPhase::GrayMarking);
    }

    pub(crate) fn finish_marking(&self) {
        debug_assert_eq!(self.phase.get(), CollectPhase::GrayMarking);
        self.phase.set(CollectPhase::Done);
    }

    pub(crate) fn begin_traversal(&self) {
        debug_assert_eq!(
            self.phase.get(),
            CollectPhase::Done,
            "traversal requires completed marking"
        );
        self.phase.set(CollectPhase::Traversing);
    }

    pub(crate) fn finish_traversal(&self) {
        debug_assert_eq!(self.phase.get(), CollectPhase::Traversing);
        self.phase.set(CollectPhase::Done);
    }
}

// ============================================================================
// Root marking passes
// ============================================================================

/// Mark category-2 roots black: the default global of every context with
/// outstanding script execution. Returns nodes newly marked.
pub(crate) fn mark_black_roots(heap: &ScriptHeap) -> usize {
    let mut marked = 0;
    for context in heap.contexts() {
        if !heap.is_rooted_by_active_execution(context) {
            continue;
        }
        if let Some(global) = heap.context_global(context) {
            marked += heap.mark_transitive(global, Color::Black);
        }
    }
    marked
}

struct GrayMarkingVisitor<'a> {
    heap: &'a ScriptHeap,
    marked: usize,
}

impl Visitor for GrayMarkingVisitor<'_> {
    fn visit_node(&mut self, node: NodeId, _name: &'static str) {
        self.marked += self.heap.mark_transitive(node, Color::Gray);
    }
}

/// Mark category-3 roots gray: context globals not rooted by active
/// execution, then every registered holder. Returns nodes newly marked.
pub(crate) fn mark_gray_roots(heap: &ScriptHeap, holders: &HolderRegistry) -> usize {
    let mut marked = 0;
    for context in heap.contexts() {
        if heap.is_rooted_by_active_execution(context) {
            continue;
        }
        if let Some(global) = heap.context_global(context) {
            marked += heap.mark_transitive(global, Color::Gray);
        }
    }
    let mut visitor = GrayMarkingVisitor { heap, marked: 0 };
    holders.trace_all(&mut visitor);
    marked + visitor.marked
}

/// Recolor a gray node black, together with everything reachable from it.
///
/// Used when a gray node is proven live outside the marking passes (a
/// weak-mapping delegate or value implied live by a black peer). Iterative;
/// long shape or prototype chains cannot overflow the stack. Returns the
/// number of nodes recolored.
pub(crate) fn unmark_gray(heap: &ScriptHeap, node: NodeId) -> usize {
    let mut recolored = 0;
    let mut worklist = vec![node];
    while let Some(current) = worklist.pop() {
        if heap.color(current) != Color::Gray {
            continue;
        }
        heap.mark(current, Color::Black);
        recolored += 1;
        heap.trace_children(current, &mut |child, _| worklist.push(child));
    }
    recolored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_progress_in_order() {
        let controller = MarkController::new();
        assert_eq!(controller.phase(), CollectPhase::Idle);
        controller.begin_black();
        controller.begin_gray();
        controller.finish_marking();
        assert_eq!(controller.phase(), CollectPhase::Done);
        controller.begin_traversal();
        controller.finish_traversal();
        controller.begin_black();
        assert_eq!(controller.phase(), CollectPhase::BlackMarking);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "gray marking must follow black marking")]
    fn gray_before_black_is_rejected() {
        let controller = MarkController::new();
        controller.begin_gray();
    }

    #[test]
    fn active_context_globals_are_black_roots() {
        let heap = ScriptHeap::new();
        let zone = heap.new_zone();
        let compartment = heap.new_compartment(zone, false);
        let global = heap.new_global(compartment).unwrap();
        let reachable = heap.new_object(compartment).unwrap();
        heap.add_slot(global, reachable);

        let context = heap.new_context(Some(global));
        heap.begin_request(context);

        assert_eq!(mark_black_roots(&heap), 2);
        assert_eq!(heap.color(global), Color::Black);
        assert_eq!(heap.color(reachable), Color::Black);

        // The same global contributes nothing to the gray pass.
        let holders = HolderRegistry::new();
        assert_eq!(mark_gray_roots(&heap, &holders), 0);
    }

    #[test]
    fn idle_context_globals_are_gray_roots() {
        let heap = ScriptHeap::new();
        let zone = heap.new_zone();
        let compartment = heap.new_compartment(zone, false);
        let global = heap.new_global(compartment).unwrap();
        let context = heap.new_context(Some(global));
        let _ = context;

        assert_eq!(mark_black_roots(&heap), 0);
        let holders = HolderRegistry::new();
        assert_eq!(mark_gray_roots(&heap, &holders), 1);
        assert_eq!(heap.color(global), Color::Gray);
    }

    #[test]
    fn unmark_gray_recolors_reachable_subgraph() {
        let heap = ScriptHeap::new();
        let zone = heap.new_zone();
        let compartment = heap.new_compartment(zone, false);
        let a = heap.new_object(compartment).unwrap();
        let b = heap.new_object(compartment).unwrap();
        let c = heap.new_object(compartment).unwrap();
        heap.add_slot(a, b);
        heap.add_slot(b, c);
        heap.mark(a, Color::Gray);
        heap.mark(b, Color::Gray);
        heap.mark(c, Color::Black);

        assert_eq!(unmark_gray(&heap, a), 2);
        assert_eq!(heap.color(a), Color::Black);
        assert_eq!(heap.color(b), Color::Black);
        assert_eq!(heap.color(c), Color::Black);

        // Fixed point: a second call finds nothing gray.
        assert_eq!(unmark_gray(&heap, a), 0);
    }
}
