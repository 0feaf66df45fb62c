//! Callback traits through which the external cycle collector consumes the
//! colored graph.
//!
//! The collector builds its graph in two stages: a root-reporting stage
//! ([`RootBuilder`], fed once per pass) and a per-node traversal stage
//! ([`GraphBuilder`], fed once per node the collector decides to expand).

use crate::heap::{ContextId, EdgeLabel, NativeId, NodeId};

/// A native root reported to the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeRoot {
    /// A script execution context whose default global is gray.
    Context(ContextId),
    /// A registered holder that reaches at least one gray node.
    Holder(NativeId),
}

/// Receives roots and weak mappings at the start of a cycle-collection
/// pass.
pub trait RootBuilder {
    /// A native object that must appear in the graph for its gray script
    /// children to be colored correctly.
    fn note_native_root(&mut self, root: NativeRoot);

    /// A weak-map association whose key, key delegate, or value is gray.
    fn note_weak_mapping(
        &mut self,
        map: Option<NodeId>,
        key: Option<NodeId>,
        delegate: Option<NodeId>,
        value: Option<NodeId>,
    );

    /// Whether the collector wants every edge regardless of color
    /// (debugging mode).
    fn want_all_traces(&self) -> bool {
        false
    }
}

/// Receives one node's description and out-edges during traversal.
pub trait GraphBuilder {
    /// Describe a garbage-collected node. `is_marked` is true when the
    /// node's liveness is already proven by a direct root.
    fn describe_gc_node(&mut self, is_marked: bool, name: &str);

    /// Describe a refcounted native node with its current refcount.
    fn describe_refcounted_node(&mut self, refcount: u32, name: &str);

    /// A script-heap out-edge.
    fn note_script_child(&mut self, node: NodeId);

    /// A native out-edge kept alive through plain refcounting.
    fn note_refcounted_child(&mut self, native: NativeId);

    /// A native out-edge with its own traversal participant.
    fn note_native_child(&mut self, native: NativeId);

    /// Advisory label for the next reported edge. Only called when
    /// [`Self::want_debug_info`] returns true.
    fn note_edge_name(&mut self, name: &str) {
        let _ = name;
    }

    /// Whether the collector wants every edge regardless of color.
    fn want_all_traces(&self) -> bool {
        false
    }

    /// Whether the collector wants node names and edge labels.
    fn want_debug_info(&self) -> bool {
        false
    }
}

/// Report an edge label if the collector asked for debug info.
pub(crate) fn note_edge(cb: &mut dyn GraphBuilder, label: &EdgeLabel) {
    if cb.want_debug_info() {
        cb.note_edge_name(&label.to_string());
    }
}
