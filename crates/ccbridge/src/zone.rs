//! Zone merging: representing all of a zone's gray nodes as one synthetic
//! graph node.
//!
//! Merging trades precision for graph size. Intra-zone script-to-script
//! edges cannot hide a native-visible leak because native code never
//! refcounts script nodes directly; the only cost is that a genuinely dead
//! sub-cycle entirely inside the zone is conservatively reported as
//! reachable. The synthetic node's out-edges are the zone's gray
//! cross-compartment wrapper targets plus the native children of every
//! gray object in the zone. Native objects are never merged: their
//! refcounts could not survive the loss of precision.

use crate::callback::GraphBuilder;
use crate::heap::{EdgeLabel, ScriptHeap, ZoneId};
use crate::traverse::{TraverseMode, Traverser};

/// Whether this pass should merge zones: true if any context's default
/// global is gray and lives outside a trusted system compartment.
///
/// A single hit disables per-zone precision for the whole pass, not just
/// for the offending zone.
pub(crate) fn should_merge(heap: &ScriptHeap) -> bool {
    heap.contexts().into_iter().any(|context| {
        heap.context_global(context).is_some_and(|global| {
            heap.is_gray(global) && !heap.is_system_compartment(heap.compartment_of(global))
        })
    })
}

/// Report `zone` as one synthetic node.
pub(crate) fn traverse_zone(heap: &ScriptHeap, zone: ZoneId, cb: &mut dyn GraphBuilder) {
    // Merging assumes non-gray nodes need no edges; an all-traces
    // collector must use per-node traversal instead.
    debug_assert!(
        !cb.want_all_traces(),
        "zone merging is incompatible with all-traces collection"
    );

    // The zone is treated as gray. Non-gray nodes inside it contribute no
    // edges: the black-gray invariant covers their script children, and
    // omitting the edge to their native children keeps those alive.
    cb.describe_gc_node(false, "Script Zone");

    let traverser = Traverser::new(heap);

    // Every script child of everything in the zone is either in the zone
    // or behind a cross-compartment wrapper; only the wrapper targets need
    // representing.
    let targets = heap
        .wrapper_targets_of_zone(zone)
        .into_iter()
        .map(|target| (target, EdgeLabel::Name("wrapper target")))
        .collect();
    traverser.report_filtered_children(targets, cb);

    // Only objects can have native children.
    for object in heap.gray_objects_of_zone(zone) {
        traverser.traverse(object, TraverseMode::ChildrenOnly, cb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{Color, NativeId, NodeId};

    #[derive(Default)]
    struct Recording {
        described: Vec<(bool, String)>,
        script_children: Vec<NodeId>,
        refcounted_children: Vec<NativeId>,
    }

    impl GraphBuilder for Recording {
        fn describe_gc_node(&mut self, is_marked: bool, name: &str) {
            self.described.push((is_marked, name.to_owned()));
        }
        fn describe_refcounted_node(&mut self, _refcount: u32, _name: &str) {}
        fn note_script_child(&mut self, node: NodeId) {
            self.script_children.push(node);
        }
        fn note_refcounted_child(&mut self, native: NativeId) {
            self.refcounted_children.push(native);
        }
        fn note_native_child(&mut self, _native: NativeId) {}
    }

    #[test]
    fn merge_decision_requires_gray_untrusted_global() {
        let heap = ScriptHeap::new();
        let zone = heap.new_zone();
        let content = heap.new_compartment(zone, false);
        let system = heap.new_compartment(zone, true);

        let content_global = heap.new_global(content).unwrap();
        let system_global = heap.new_global(system).unwrap();
        heap.new_context(Some(content_global));
        heap.new_context(Some(system_global));

        assert!(!should_merge(&heap));

        // A gray system global does not trigger merging.
        heap.mark(system_global, Color::Gray);
        assert!(!should_merge(&heap));

        heap.mark(content_global, Color::Gray);
        assert!(should_merge(&heap));
    }

    #[test]
    fn merged_zone_reports_wrapper_targets_and_native_children() {
        let heap = ScriptHeap::new();
        let zone_a = heap.new_zone();
        let zone_b = heap.new_zone();
        let inside = heap.new_compartment(zone_a, false);
        let outside = heap.new_compartment(zone_b, false);

        let global = heap.new_global(inside).unwrap();
        let foreign = heap.new_object(outside).unwrap();
        let wrapper = heap.new_wrapper(inside, foreign, global).unwrap();
        heap.insert_wrapper(inside, crate::heap::WrapKey::Object(foreign), wrapper);

        let native_backed = heap.new_object(inside).unwrap();
        heap.set_private_native(native_backed, NativeId(42));

        // Intra-zone structure that must NOT be reported.
        let local = heap.new_object(inside).unwrap();
        heap.add_slot(native_backed, local);

        heap.mark(foreign, Color::Gray);
        heap.mark(wrapper, Color::Gray);
        heap.mark(native_backed, Color::Gray);
        heap.mark(local, Color::Gray);

        let mut cb = Recording::default();
        traverse_zone(&heap, zone_a, &mut cb);

        assert_eq!(cb.described, vec![(false, "Script Zone".to_owned())]);
        assert_eq!(cb.script_children, vec![foreign]);
        assert_eq!(cb.refcounted_children, vec![NativeId(42)]);
    }

    #[test]
    fn non_gray_objects_contribute_no_edges_to_a_merged_zone() {
        let heap = ScriptHeap::new();
        let zone = heap.new_zone();
        let compartment = heap.new_compartment(zone, false);
        let black = heap.new_object(compartment).unwrap();
        heap.set_private_native(black, NativeId(5));
        heap.mark(black, Color::Black);

        let mut cb = Recording::default();
        traverse_zone(&heap, zone, &mut cb);
        assert!(cb.refcounted_children.is_empty());
    }
}
