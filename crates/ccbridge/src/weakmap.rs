//! Weak-map entries reinterpreted as collector graph edges.
//!
//! The collector can only reason about a weak mapping if its key is
//! representable in the graph; a value of a non-representable kind is
//! expanded child-by-child and each representable descendant is attributed
//! to the `(map, key)` pair instead, so a representability gap never hides
//! a real edge.

use crate::callback::RootBuilder;
use crate::heap::{NodeId, ScriptHeap, TraceKind};
use crate::mark::unmark_gray;

pub(crate) struct WeakMapBridge<'a> {
    heap: &'a ScriptHeap,
}

impl<'a> WeakMapBridge<'a> {
    pub(crate) const fn new(heap: &'a ScriptHeap) -> Self {
        Self { heap }
    }

    fn gray(&self, node: Option<NodeId>) -> bool {
        node.is_some_and(|n| self.heap.is_gray(n))
    }

    /// Report every weak mapping that could keep a gray node alive.
    /// Returns the number of mappings reported.
    pub(crate) fn report_mappings(&self, cb: &mut dyn RootBuilder) -> usize {
        let mut reported = 0;
        for mapping in self.heap.weak_mappings() {
            let delegate = mapping.key.and_then(|k| self.heap.weak_key_delegate(k));
            let value_gray = mapping
                .value
                .is_some_and(|v| self.heap.is_gray(v) && self.heap.kind(v) != TraceKind::String);

            // Nothing this entry could hold alive is gray.
            if !self.gray(mapping.key)
                && !self.gray(delegate)
                && !value_gray
                && !cb.want_all_traces()
            {
                continue;
            }

            // A non-representable key cannot be reasoned about; treat the
            // entry as unconditionally held rather than hiding the binding.
            let key = mapping
                .key
                .filter(|&k| self.heap.kind(k).is_colorable());

            match mapping.value {
                Some(value) if self.heap.kind(value).is_colorable() => {
                    cb.note_weak_mapping(mapping.map, key, delegate, Some(value));
                    reported += 1;
                }
                value => {
                    reported += self.expand_value(mapping.map, key, delegate, value, cb);
                }
            }
        }
        reported
    }

    /// Attribute the representable descendants of a non-representable
    /// value to `(map, key)`. If nothing was reported and the key is gray
    /// with a live delegate, report a delegate-only mapping: the delegate
    /// could hold the key alive by itself.
    fn expand_value(
        &self,
        map: Option<NodeId>,
        key: Option<NodeId>,
        delegate: Option<NodeId>,
        value: Option<NodeId>,
        cb: &mut dyn RootBuilder,
    ) -> usize {
        let mut reported = 0;
        if let Some(value) = value {
            if self.heap.kind(value) != TraceKind::String {
                let mut worklist = vec![value];
                while let Some(node) = worklist.pop() {
                    let mut children = Vec::new();
                    self.heap
                        .trace_children(node, &mut |child, _| children.push(child));
                    for child in children {
                        let kind = self.heap.kind(child);
                        if kind == TraceKind::String {
                            continue;
                        }
                        if !self.heap.is_gray(child) && !cb.want_all_traces() {
                            continue;
                        }
                        if kind.is_colorable() {
                            cb.note_weak_mapping(map, key, delegate, Some(child));
                            reported += 1;
                        } else {
                            worklist.push(child);
                        }
                    }
                }
            }
        }
        if reported == 0 && self.gray(key) && delegate.is_some() {
            cb.note_weak_mapping(map, key, delegate, None);
            reported += 1;
        }
        reported
    }

    /// Repair gray bits left stale by incremental marking: a key whose
    /// delegate is already live cannot be collected, and neither can a
    /// value whose map and key are both live. Re-scans until a pass
    /// changes nothing; unmarking is monotone, so termination is
    /// guaranteed. Returns the number of nodes recolored.
    ///
    /// # Panics
    ///
    /// Panics if an incremental collection increment is in flight:
    /// coloring is only meaningful at a mark-complete boundary.
    pub(crate) fn fix_gray_bits(&self) -> usize {
        assert!(
            !self.heap.incremental_in_progress(),
            "gray bits can only be repaired at a mark-complete boundary"
        );
        let mut total = 0;
        loop {
            let mut recolored = 0;
            for mapping in self.heap.weak_mappings() {
                let delegate_might_need_marking = self.gray(mapping.key);
                let value_might_need_marking = mapping.value.is_some_and(|v| {
                    self.heap.is_gray(v) && self.heap.kind(v) != TraceKind::String
                });
                if !delegate_might_need_marking && !value_might_need_marking {
                    continue;
                }

                if delegate_might_need_marking {
                    if let Some(key) = mapping.key {
                        if let Some(delegate) = self.heap.weak_key_delegate(key) {
                            if !self.heap.is_gray(delegate) {
                                recolored += unmark_gray(self.heap, key);
                            }
                        }
                    }
                }

                if let Some(value) = mapping.value {
                    if self.heap.is_gray(value)
                        && !self.gray(mapping.key)
                        && !self.gray(mapping.map)
                        && self.heap.kind(value) != TraceKind::Shape
                    {
                        recolored += unmark_gray(self.heap, value);
                    }
                }
            }
            total += recolored;
            if recolored == 0 {
                break;
            }
        }
        total
    }
}
