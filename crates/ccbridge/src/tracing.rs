//! Structured-logging support, compiled in with the `tracing` feature.

use tracing::{debug, debug_span, span};

/// Span covering one collection attempt.
pub fn span_collection(reason: &'static str, pass: u64) -> span::EnteredSpan {
    debug_span!("collect", reason = reason, pass = pass).entered()
}

/// Log the marking totals of a completed collection.
pub fn log_marked(black: usize, gray: usize) {
    debug!(marked_black = black, marked_gray = gray, "mark_complete");
}

/// Span covering one cycle-collection graph build.
pub fn span_graph_build(pass: u64) -> span::EnteredSpan {
    debug_span!("cycle_collection", pass = pass).entered()
}

/// Log what a graph build reported.
pub fn log_graph(native_roots: usize, weak_mappings: usize, zones_merged: bool) {
    debug!(
        native_roots = native_roots,
        weak_mappings = weak_mappings,
        zones_merged = zones_merged,
        "graph_built"
    );
}

/// Log a gray-bit repair.
pub fn log_gray_repair(recolored: usize) {
    debug!(recolored = recolored, "gray_bits_repaired");
}
