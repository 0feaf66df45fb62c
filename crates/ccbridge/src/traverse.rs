//! Per-node traversal: the decision of what the cycle collector gets to
//! see for each heap node.
//!
//! A black node's children are never reported (outside of debugging): the
//! black-cannot-point-to-gray invariant means they are already accounted
//! for as live, so walking them is pure cost with no effect on the verdict.
//! Gray nodes have their script children enumerated through the engine
//! tracer and their native children resolved from the object itself.

use rustc_hash::FxHashSet;

use crate::callback::{note_edge, GraphBuilder};
use crate::heap::{
    ContextId, EdgeLabel, NativeEdge, NodeId, ObjectClass, ScriptHeap, TraceKind,
};

/// How much of a node the collector wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraverseMode {
    /// Describe the node and report both script and native children.
    Full,
    /// Report native children only. Used when a whole zone is merged into
    /// one synthetic node and intra-zone script edges are irrelevant.
    ChildrenOnly,
}

pub(crate) struct Traverser<'a> {
    heap: &'a ScriptHeap,
}

impl<'a> Traverser<'a> {
    pub(crate) const fn new(heap: &'a ScriptHeap) -> Self {
        Self { heap }
    }

    /// Report `node` to the collector according to `mode`.
    pub(crate) fn traverse(&self, node: NodeId, mode: TraverseMode, cb: &mut dyn GraphBuilder) {
        let kind = self.heap.kind(node);
        let is_marked = !self.heap.is_gray(node);

        if mode == TraverseMode::Full {
            self.describe(node, kind, is_marked, cb);
        }

        if is_marked && !cb.want_all_traces() {
            return;
        }

        if mode == TraverseMode::Full {
            let mut seed = Vec::new();
            self.heap
                .trace_children(node, &mut |child, label| seed.push((child, label)));
            self.report_filtered_children(seed, cb);
        }

        if kind == TraceKind::Object {
            self.note_native_children(node, cb);
        }
    }

    /// Report the context to the collector: refcount 1, or 2 while script
    /// is executing on it, plus an unconditional edge to its default
    /// global.
    pub(crate) fn traverse_context(&self, context: ContextId, cb: &mut dyn GraphBuilder) {
        let refcount = if self.heap.is_rooted_by_active_execution(context) {
            2
        } else {
            1
        };
        cb.describe_refcounted_node(refcount, "ScriptContext");
        if let Some(global) = self.heap.context_global(context) {
            note_edge(cb, &EdgeLabel::Name("[global object]"));
            cb.note_script_child(global);
        }
    }

    /// Filter and report a batch of candidate children.
    ///
    /// Colorable children are reported directly. Non-colorable structural
    /// children (shape and ancestor chains, type metadata) are expanded
    /// through an explicit worklist so that arbitrarily long chains cannot
    /// overflow the native stack; strings terminate expansion.
    pub(crate) fn report_filtered_children(
        &self,
        seed: Vec<(NodeId, EdgeLabel)>,
        cb: &mut dyn GraphBuilder,
    ) {
        let mut pending: Vec<NodeId> = Vec::new();
        let mut seen: FxHashSet<NodeId> = FxHashSet::default();

        for (child, label) in seed {
            self.filter_child(child, &label, cb, &mut pending, &mut seen);
        }
        while let Some(node) = pending.pop() {
            let mut children = Vec::new();
            self.heap
                .trace_children(node, &mut |child, label| children.push((child, label)));
            for (child, label) in children {
                self.filter_child(child, &label, cb, &mut pending, &mut seen);
            }
        }
    }

    fn filter_child(
        &self,
        child: NodeId,
        label: &EdgeLabel,
        cb: &mut dyn GraphBuilder,
        pending: &mut Vec<NodeId>,
        seen: &mut FxHashSet<NodeId>,
    ) {
        if !self.heap.is_gray(child) && !cb.want_all_traces() {
            return;
        }
        let kind = self.heap.kind(child);
        if kind.is_colorable() {
            note_edge(cb, label);
            cb.note_script_child(child);
        } else if kind != TraceKind::String && seen.insert(child) {
            pending.push(child);
        }
    }

    fn note_native_children(&self, node: NodeId, cb: &mut dyn GraphBuilder) {
        match self.heap.native_edge(node) {
            Some(NativeEdge::RefCounted(native)) => {
                note_edge(cb, &EdgeLabel::Name("private"));
                cb.note_refcounted_child(native);
            }
            Some(NativeEdge::Traced(native)) => {
                note_edge(cb, &EdgeLabel::Name("unwrapped"));
                cb.note_native_child(native);
            }
            None => {}
        }
    }

    fn describe(&self, node: NodeId, kind: TraceKind, is_marked: bool, cb: &mut dyn GraphBuilder) {
        if !cb.want_debug_info() {
            cb.describe_gc_node(is_marked, "Script Object");
            return;
        }
        let name = if kind == TraceKind::Object {
            match self.heap.class(node) {
                ObjectClass::Plain => "Script Object".to_owned(),
                ObjectClass::Global => "Script Object (Global)".to_owned(),
                ObjectClass::Function => "Script Object (Function)".to_owned(),
                ObjectClass::Wrapper => "Script Object (Wrapper)".to_owned(),
                ObjectClass::StopIteration => "Script Object (StopIteration)".to_owned(),
                ObjectClass::Binding => "Script Object (Binding)".to_owned(),
            }
        } else {
            format!("Script {}", kind.name())
        };
        cb.describe_gc_node(is_marked, &name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::GraphBuilder;
    use crate::heap::{Color, NativeId};

    #[derive(Default)]
    struct Recording {
        described: Vec<(bool, String)>,
        refcounted: Vec<(u32, String)>,
        script_children: Vec<NodeId>,
        refcounted_children: Vec<NativeId>,
        native_children: Vec<NativeId>,
        edge_names: Vec<String>,
        all_traces: bool,
        debug_info: bool,
    }

    impl GraphBuilder for Recording {
        fn describe_gc_node(&mut self, is_marked: bool, name: &str) {
            self.described.push((is_marked, name.to_owned()));
        }
        fn describe_refcounted_node(&mut self, refcount: u32, name: &str) {
            self.refcounted.push((refcount, name.to_owned()));
        }
        fn note_script_child(&mut self, node: NodeId) {
            self.script_children.push(node);
        }
        fn note_refcounted_child(&mut self, native: NativeId) {
            self.refcounted_children.push(native);
        }
        fn note_native_child(&mut self, native: NativeId) {
            self.native_children.push(native);
        }
        fn note_edge_name(&mut self, name: &str) {
            self.edge_names.push(name.to_owned());
        }
        fn want_all_traces(&self) -> bool {
            self.all_traces
        }
        fn want_debug_info(&self) -> bool {
            self.debug_info
        }
    }

    #[test]
    fn black_nodes_are_described_but_not_expanded() {
        let heap = ScriptHeap::new();
        let zone = heap.new_zone();
        let compartment = heap.new_compartment(zone, false);
        let node = heap.new_object(compartment).unwrap();
        let child = heap.new_object(compartment).unwrap();
        heap.add_slot(node, child);
        heap.mark(node, Color::Black);
        heap.mark(child, Color::Gray);

        let mut cb = Recording::default();
        Traverser::new(&heap).traverse(node, TraverseMode::Full, &mut cb);
        assert_eq!(cb.described, vec![(true, "Script Object".to_owned())]);
        assert!(cb.script_children.is_empty());
    }

    #[test]
    fn gray_children_are_reported_and_shape_chains_are_walked() {
        let heap = ScriptHeap::new();
        let zone = heap.new_zone();
        let compartment = heap.new_compartment(zone, false);
        let node = heap.new_object(compartment).unwrap();

        // A long shape ancestor chain ending in a gray getter object.
        let mut shape = heap.new_shape(compartment).unwrap();
        heap.add_slot(node, shape);
        for _ in 0..64 {
            let ancestor = heap.new_shape(compartment).unwrap();
            heap.set_parent(shape, Some(ancestor));
            shape = ancestor;
        }
        let getter = heap.new_function(compartment).unwrap();
        heap.add_slot(shape, getter);

        heap.mark_transitive(node, Color::Gray);

        let mut cb = Recording::default();
        Traverser::new(&heap).traverse(node, TraverseMode::Full, &mut cb);
        assert_eq!(cb.script_children, vec![getter]);
    }

    #[test]
    fn native_children_are_split_by_participation() {
        let heap = ScriptHeap::new();
        let zone = heap.new_zone();
        let compartment = heap.new_compartment(zone, false);

        let holder_backed = heap.new_object(compartment).unwrap();
        heap.set_private_native(holder_backed, NativeId(7));
        heap.mark(holder_backed, Color::Gray);

        let binding = heap.new_binding(compartment, NativeId(8)).unwrap();
        heap.mark(binding, Color::Gray);

        let mut cb = Recording::default();
        let traverser = Traverser::new(&heap);
        traverser.traverse(holder_backed, TraverseMode::Full, &mut cb);
        traverser.traverse(binding, TraverseMode::Full, &mut cb);
        assert_eq!(cb.refcounted_children, vec![NativeId(7)]);
        assert_eq!(cb.native_children, vec![NativeId(8)]);
    }

    #[test]
    fn children_only_mode_skips_script_edges() {
        let heap = ScriptHeap::new();
        let zone = heap.new_zone();
        let compartment = heap.new_compartment(zone, false);
        let node = heap.new_object(compartment).unwrap();
        let child = heap.new_object(compartment).unwrap();
        heap.add_slot(node, child);
        heap.set_private_native(node, NativeId(9));
        heap.mark(node, Color::Gray);
        heap.mark(child, Color::Gray);

        let mut cb = Recording::default();
        Traverser::new(&heap).traverse(node, TraverseMode::ChildrenOnly, &mut cb);
        assert!(cb.described.is_empty());
        assert!(cb.script_children.is_empty());
        assert_eq!(cb.refcounted_children, vec![NativeId(9)]);
    }

    #[test]
    fn debug_info_synthesizes_names_and_edge_labels() {
        let heap = ScriptHeap::new();
        let zone = heap.new_zone();
        let compartment = heap.new_compartment(zone, false);
        let function = heap.new_function(compartment).unwrap();
        let child = heap.new_object(compartment).unwrap();
        heap.add_slot(function, child);
        heap.mark(function, Color::Gray);
        heap.mark(child, Color::Gray);

        let mut cb = Recording {
            debug_info: true,
            ..Recording::default()
        };
        Traverser::new(&heap).traverse(function, TraverseMode::Full, &mut cb);
        assert_eq!(
            cb.described,
            vec![(false, "Script Object (Function)".to_owned())]
        );
        assert_eq!(cb.edge_names, vec!["slot[0]".to_owned()]);
    }

    #[test]
    fn context_reports_execution_refcount_and_global_unconditionally() {
        let heap = ScriptHeap::new();
        let zone = heap.new_zone();
        let compartment = heap.new_compartment(zone, false);
        let global = heap.new_global(compartment).unwrap();
        heap.mark(global, Color::Black);

        let context = heap.new_context(Some(global));
        heap.begin_request(context);

        let mut cb = Recording::default();
        Traverser::new(&heap).traverse_context(context, &mut cb);
        assert_eq!(cb.refcounted, vec![(2, "ScriptContext".to_owned())]);
        // The global is reported even though it is black.
        assert_eq!(cb.script_children, vec![global]);

        heap.end_request(context);
        let mut cb = Recording::default();
        Traverser::new(&heap).traverse_context(context, &mut cb);
        assert_eq!(cb.refcounted, vec![(1, "ScriptContext".to_owned())]);
    }
}
