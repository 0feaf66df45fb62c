//! In-process model of the script engine heap.
//!
//! The bridge never allocates or frees script objects on the engine's
//! behalf; it colors them and reports them. This module owns everything the
//! bridge consumes from the engine: a node arena with a configurable
//! capacity limit, structural-child tracing, mark-if-unmarked marking in two
//! colors, compartment/zone/context bookkeeping, weak mappings, and the
//! per-compartment cross-compartment wrapper caches.
//!
//! Nodes are created and mutated through `&self` methods; interior
//! mutability keeps the arena shareable with tracer callbacks. No borrow is
//! held across a callback invocation.

// Every fallible constructor fails the same way: the node limit was hit.
#![allow(clippy::missing_errors_doc)]

use std::cell::{Cell, RefCell};
use std::fmt;

use rustc_hash::FxHashMap;

use crate::error::Error;

// ============================================================================
// Identifiers
// ============================================================================

/// Index of a node in the script heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identity of a native (host-language) object, assigned by the embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeId(pub u64);

/// A security/isolation grouping of script objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompartmentId(u32);

impl CompartmentId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A collector-scheduling grouping of one or more compartments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ZoneId(u32);

/// A script execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u32);

impl ContextId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

// ============================================================================
// Node classification
// ============================================================================

/// Structural category of a heap node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceKind {
    /// An ordinary object.
    Object,
    /// A string. Strings have no children and never appear in the
    /// collector graph.
    String,
    /// A compiled script.
    Script,
    /// A property-layout node. Shapes form long ancestor chains.
    Shape,
    /// The shared part of a shape.
    BaseShape,
    /// Type inference metadata.
    TypeInfo,
}

impl TraceKind {
    /// Whether nodes of this kind are representable in the collector graph.
    ///
    /// Only objects and scripts participate in cross-heap collection; other
    /// kinds are structural and are traversed through.
    #[must_use]
    pub const fn is_colorable(self) -> bool {
        matches!(self, Self::Object | Self::Script)
    }

    pub(crate) const fn name(self) -> &'static str {
        match self {
            Self::Object => "Object",
            Self::String => "String",
            Self::Script => "Script",
            Self::Shape => "Shape",
            Self::BaseShape => "BaseShape",
            Self::TypeInfo => "TypeInfo",
        }
    }
}

/// Behavioral class of an `Object` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClass {
    /// A plain object.
    Plain,
    /// A compartment's global object.
    Global,
    /// A function object.
    Function,
    /// A cross-compartment wrapper standing in for a value from another
    /// compartment.
    Wrapper,
    /// The well-known per-compartment stop-iteration singleton.
    StopIteration,
    /// A binding instance reflecting a native object into script.
    Binding,
}

/// Liveness color of a node. Valid only during and after a collection pass.
///
/// The ordering is significant: marking is monotone, a node's color only
/// ever increases within a pass (mark-if-unmarked).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Color {
    /// Not reached by any root.
    White,
    /// Reached only from holder/gray roots; liveness is contingent on
    /// cycle analysis.
    Gray,
    /// Reached from a root that guarantees liveness.
    Black,
}

/// How a native child of an object participates in cycle collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeEdge {
    /// A reserved-slot native kept alive through plain refcounting.
    RefCounted(NativeId),
    /// A binding-instance native with its own traversal participant.
    Traced(NativeId),
}

impl NativeEdge {
    /// The native identity this edge points at.
    #[must_use]
    pub const fn native(self) -> NativeId {
        match self {
            Self::RefCounted(id) | Self::Traced(id) => id,
        }
    }
}

/// A script value as seen at a compartment boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// The undefined value.
    Undefined,
    /// The null value.
    Null,
    /// A boolean.
    Boolean(bool),
    /// A number.
    Number(f64),
    /// A heap-allocated string.
    String(NodeId),
    /// An object.
    Object(NodeId),
}

impl Value {
    /// Whether this value refers to the heap and therefore has to be
    /// wrapped or copied when crossing a compartment boundary.
    #[must_use]
    pub const fn is_markable(&self) -> bool {
        matches!(self, Self::String(_) | Self::Object(_))
    }
}

/// Label of a structural edge, reported to the collector only when it asks
/// for debug info.
#[derive(Debug, Clone, Copy)]
pub enum EdgeLabel {
    /// A named edge.
    Name(&'static str),
    /// An indexed edge such as a slot.
    Indexed(&'static str, usize),
}

impl fmt::Display for EdgeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Indexed(name, index) => write!(f, "{name}[{index}]"),
        }
    }
}

/// One key → value association in a weak map.
///
/// The mapping does not by itself root the key. The key's delegate (the
/// unwrapped form of a wrapper key) is derived, not stored.
#[derive(Debug, Clone, Copy)]
pub struct WeakMapping {
    /// The owning map, if it is itself a heap object.
    pub map: Option<NodeId>,
    /// The key.
    pub key: Option<NodeId>,
    /// The value.
    pub value: Option<NodeId>,
}

// ============================================================================
// Internal tables
// ============================================================================

struct NodeData {
    kind: TraceKind,
    class: ObjectClass,
    compartment: CompartmentId,
    color: Cell<Color>,
    atom: bool,
    proto: Cell<Option<NodeId>>,
    parent: Cell<Option<NodeId>>,
    /// Target of a cross-compartment wrapper.
    wrapped: Cell<Option<NodeId>>,
    native: Cell<Option<NativeEdge>>,
    slots: RefCell<Vec<NodeId>>,
}

/// Cache key for a cross-compartment wrapper: the unwrapped identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum WrapKey {
    Object(NodeId),
    String(NodeId),
}

impl WrapKey {
    pub(crate) const fn target(self) -> NodeId {
        match self {
            Self::Object(n) | Self::String(n) => n,
        }
    }
}

struct CompartmentData {
    zone: ZoneId,
    system: bool,
    global: Cell<Option<NodeId>>,
    stop_iteration: Cell<Option<NodeId>>,
    wrappers: RefCell<FxHashMap<WrapKey, NodeId>>,
}

struct ContextData {
    global: Cell<Option<NodeId>>,
    outstanding: Cell<u32>,
}

// ============================================================================
// ScriptHeap
// ============================================================================

/// The modeled script engine heap.
///
/// Compartment 0 is the system atoms compartment, created up front; atoms
/// always live there. The heap never frees nodes; sweeping belongs to the
/// engine and is out of scope here.
pub struct ScriptHeap {
    nodes: RefCell<Vec<NodeData>>,
    compartments: RefCell<Vec<CompartmentData>>,
    zone_count: Cell<u32>,
    contexts: RefCell<Vec<ContextData>>,
    weak_mappings: RefCell<Vec<WeakMapping>>,
    roots: RefCell<Vec<NodeId>>,
    limit: usize,
    incremental: Cell<bool>,
    gray_bits_valid: Cell<bool>,
}

impl ScriptHeap {
    /// Create a heap with no node limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// Create a heap that refuses to allocate more than `limit` nodes.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        let heap = Self {
            nodes: RefCell::new(Vec::new()),
            compartments: RefCell::new(Vec::new()),
            zone_count: Cell::new(0),
            contexts: RefCell::new(Vec::new()),
            weak_mappings: RefCell::new(Vec::new()),
            roots: RefCell::new(Vec::new()),
            limit,
            incremental: Cell::new(false),
            gray_bits_valid: Cell::new(false),
        };
        // The atoms compartment is always present and always system.
        let atoms_zone = heap.new_zone();
        let atoms = heap.new_compartment(atoms_zone, true);
        debug_assert_eq!(atoms, CompartmentId(0));
        heap
    }

    /// The compartment all interned atoms live in.
    #[must_use]
    pub const fn atoms_compartment(&self) -> CompartmentId {
        CompartmentId(0)
    }

    // ------------------------------------------------------------------
    // Zones, compartments, contexts
    // ------------------------------------------------------------------

    /// Create a new zone.
    pub fn new_zone(&self) -> ZoneId {
        let id = ZoneId(self.zone_count.get());
        self.zone_count.set(self.zone_count.get() + 1);
        id
    }

    /// Create a new compartment in `zone`.
    pub fn new_compartment(&self, zone: ZoneId, system: bool) -> CompartmentId {
        let mut compartments = self.compartments.borrow_mut();
        let id = CompartmentId(u32::try_from(compartments.len()).unwrap_or(u32::MAX));
        compartments.push(CompartmentData {
            zone,
            system,
            global: Cell::new(None),
            stop_iteration: Cell::new(None),
            wrappers: RefCell::new(FxHashMap::default()),
        });
        id
    }

    /// Whether `compartment` is a trusted system compartment.
    #[must_use]
    pub fn is_system_compartment(&self, compartment: CompartmentId) -> bool {
        self.compartments.borrow()[compartment.index()].system
    }

    /// The zone `compartment` belongs to.
    #[must_use]
    pub fn zone_of_compartment(&self, compartment: CompartmentId) -> ZoneId {
        self.compartments.borrow()[compartment.index()].zone
    }

    /// The zone `node` belongs to.
    #[must_use]
    pub fn zone_of(&self, node: NodeId) -> ZoneId {
        self.zone_of_compartment(self.compartment_of(node))
    }

    /// The global of `compartment`, if one has been created.
    #[must_use]
    pub fn global_of(&self, compartment: CompartmentId) -> Option<NodeId> {
        self.compartments.borrow()[compartment.index()].global.get()
    }

    /// Create a new context with `global` as its default global.
    pub fn new_context(&self, global: Option<NodeId>) -> ContextId {
        let mut contexts = self.contexts.borrow_mut();
        let id = ContextId(u32::try_from(contexts.len()).unwrap_or(u32::MAX));
        contexts.push(ContextData {
            global: Cell::new(global),
            outstanding: Cell::new(0),
        });
        id
    }

    /// All live contexts.
    #[must_use]
    pub fn contexts(&self) -> Vec<ContextId> {
        (0..self.contexts.borrow().len())
            .map(|i| ContextId(u32::try_from(i).unwrap_or(u32::MAX)))
            .collect()
    }

    /// The context's default global.
    #[must_use]
    pub fn context_global(&self, context: ContextId) -> Option<NodeId> {
        self.contexts.borrow()[context.index()].global.get()
    }

    /// Replace the context's default global.
    pub fn set_context_global(&self, context: ContextId, global: Option<NodeId>) {
        self.contexts.borrow()[context.index()].global.set(global);
    }

    /// Record that `context` started executing script.
    pub fn begin_request(&self, context: ContextId) {
        let cell = &self.contexts.borrow()[context.index()].outstanding;
        cell.set(cell.get() + 1);
    }

    /// Record that `context` finished executing script.
    pub fn end_request(&self, context: ContextId) {
        let cell = &self.contexts.borrow()[context.index()].outstanding;
        debug_assert!(cell.get() > 0, "unbalanced end_request");
        cell.set(cell.get().saturating_sub(1));
    }

    /// Whether outstanding script execution roots this context's global.
    #[must_use]
    pub fn is_rooted_by_active_execution(&self, context: ContextId) -> bool {
        self.contexts.borrow()[context.index()].outstanding.get() > 0
    }

    /// Whether any context has outstanding script execution.
    #[must_use]
    pub fn any_context_active(&self) -> bool {
        self.contexts
            .borrow()
            .iter()
            .any(|ctx| ctx.outstanding.get() > 0)
    }

    // ------------------------------------------------------------------
    // Node creation
    // ------------------------------------------------------------------

    fn create(
        &self,
        compartment: CompartmentId,
        kind: TraceKind,
        class: ObjectClass,
        atom: bool,
    ) -> Result<NodeId, Error> {
        let mut nodes = self.nodes.borrow_mut();
        if nodes.len() >= self.limit {
            return Err(Error::OutOfMemory);
        }
        let id = NodeId(u32::try_from(nodes.len()).map_err(|_| Error::OutOfMemory)?);
        nodes.push(NodeData {
            kind,
            class,
            compartment,
            color: Cell::new(Color::White),
            atom,
            proto: Cell::new(None),
            parent: Cell::new(None),
            wrapped: Cell::new(None),
            native: Cell::new(None),
            slots: RefCell::new(Vec::new()),
        });
        self.gray_bits_valid.set(false);
        Ok(id)
    }

    /// Create a plain object.
    pub fn new_object(&self, compartment: CompartmentId) -> Result<NodeId, Error> {
        self.create(compartment, TraceKind::Object, ObjectClass::Plain, false)
    }

    /// Create a function object.
    pub fn new_function(&self, compartment: CompartmentId) -> Result<NodeId, Error> {
        self.create(compartment, TraceKind::Object, ObjectClass::Function, false)
    }

    /// Create the compartment's global object and install it.
    pub fn new_global(&self, compartment: CompartmentId) -> Result<NodeId, Error> {
        let global = self.create(compartment, TraceKind::Object, ObjectClass::Global, false)?;
        self.compartments.borrow()[compartment.index()]
            .global
            .set(Some(global));
        Ok(global)
    }

    /// Create a binding instance reflecting `native` into script.
    pub fn new_binding(
        &self,
        compartment: CompartmentId,
        native: NativeId,
    ) -> Result<NodeId, Error> {
        let node = self.create(compartment, TraceKind::Object, ObjectClass::Binding, false)?;
        self.nodes.borrow()[node.index()]
            .native
            .set(Some(NativeEdge::Traced(native)));
        Ok(node)
    }

    /// Create a string in `compartment`.
    pub fn new_string(&self, compartment: CompartmentId) -> Result<NodeId, Error> {
        self.create(compartment, TraceKind::String, ObjectClass::Plain, false)
    }

    /// Create an interned atom. Atoms live in the atoms compartment.
    pub fn new_atom(&self) -> Result<NodeId, Error> {
        self.create(
            self.atoms_compartment(),
            TraceKind::String,
            ObjectClass::Plain,
            true,
        )
    }

    /// Create a compiled-script node.
    pub fn new_script(&self, compartment: CompartmentId) -> Result<NodeId, Error> {
        self.create(compartment, TraceKind::Script, ObjectClass::Plain, false)
    }

    /// Create a shape node. Chain shapes together with [`Self::set_parent`].
    pub fn new_shape(&self, compartment: CompartmentId) -> Result<NodeId, Error> {
        self.create(compartment, TraceKind::Shape, ObjectClass::Plain, false)
    }

    /// Create a base-shape node.
    pub fn new_base_shape(&self, compartment: CompartmentId) -> Result<NodeId, Error> {
        self.create(compartment, TraceKind::BaseShape, ObjectClass::Plain, false)
    }

    /// Create a type-inference metadata node.
    pub fn new_type_info(&self, compartment: CompartmentId) -> Result<NodeId, Error> {
        self.create(compartment, TraceKind::TypeInfo, ObjectClass::Plain, false)
    }

    pub(crate) fn new_wrapper(
        &self,
        compartment: CompartmentId,
        target: NodeId,
        global: NodeId,
    ) -> Result<NodeId, Error> {
        let wrapper = self.create(compartment, TraceKind::Object, ObjectClass::Wrapper, false)?;
        let nodes = self.nodes.borrow();
        nodes[wrapper.index()].wrapped.set(Some(target));
        nodes[wrapper.index()].parent.set(Some(global));
        Ok(wrapper)
    }

    pub(crate) fn clone_string_into(
        &self,
        compartment: CompartmentId,
        _source: NodeId,
    ) -> Result<NodeId, Error> {
        self.new_string(compartment)
    }

    /// The compartment's well-known stop-iteration singleton, created on
    /// first use.
    pub fn stop_iteration(&self, compartment: CompartmentId) -> Result<NodeId, Error> {
        if let Some(existing) = self.compartments.borrow()[compartment.index()]
            .stop_iteration
            .get()
        {
            return Ok(existing);
        }
        let node = self.create(
            compartment,
            TraceKind::Object,
            ObjectClass::StopIteration,
            false,
        )?;
        self.compartments.borrow()[compartment.index()]
            .stop_iteration
            .set(Some(node));
        Ok(node)
    }

    // ------------------------------------------------------------------
    // Node structure
    // ------------------------------------------------------------------

    /// The node's trace kind.
    #[must_use]
    pub fn kind(&self, node: NodeId) -> TraceKind {
        self.nodes.borrow()[node.index()].kind
    }

    /// The object class of `node`.
    #[must_use]
    pub fn class(&self, node: NodeId) -> ObjectClass {
        self.nodes.borrow()[node.index()].class
    }

    /// The compartment `node` belongs to. Never changes for the node's
    /// lifetime.
    #[must_use]
    pub fn compartment_of(&self, node: NodeId) -> CompartmentId {
        self.nodes.borrow()[node.index()].compartment
    }

    /// Whether `node` is an interned atom.
    #[must_use]
    pub fn is_atom(&self, node: NodeId) -> bool {
        self.nodes.borrow()[node.index()].atom
    }

    /// Add a strong slot edge from `parent` to `child`.
    pub fn add_slot(&self, parent: NodeId, child: NodeId) {
        self.nodes.borrow()[parent.index()]
            .slots
            .borrow_mut()
            .push(child);
        self.gray_bits_valid.set(false);
    }

    /// Set the node's prototype link.
    pub fn set_proto(&self, node: NodeId, proto: Option<NodeId>) {
        self.nodes.borrow()[node.index()].proto.set(proto);
        self.gray_bits_valid.set(false);
    }

    /// The node's prototype link.
    #[must_use]
    pub fn proto(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.borrow()[node.index()].proto.get()
    }

    /// Set the node's parent (scope or shape-ancestor) link.
    pub fn set_parent(&self, node: NodeId, parent: Option<NodeId>) {
        self.nodes.borrow()[node.index()].parent.set(parent);
        self.gray_bits_valid.set(false);
    }

    /// The node's parent link.
    #[must_use]
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.borrow()[node.index()].parent.get()
    }

    /// Install a refcounted native in the node's reserved slot.
    pub fn set_private_native(&self, node: NodeId, native: NativeId) {
        self.nodes.borrow()[node.index()]
            .native
            .set(Some(NativeEdge::RefCounted(native)));
        self.gray_bits_valid.set(false);
    }

    /// The node's native child, if any.
    #[must_use]
    pub fn native_edge(&self, node: NodeId) -> Option<NativeEdge> {
        self.nodes.borrow()[node.index()].native.get()
    }

    /// The target of a cross-compartment wrapper.
    #[must_use]
    pub fn wrapped_target(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.borrow()[node.index()].wrapped.get()
    }

    /// Invoke `f` once per structural child of `node`.
    ///
    /// Child order is wrapper target, prototype, parent, then slots. No
    /// arena borrow is held while `f` runs.
    pub fn trace_children(&self, node: NodeId, f: &mut dyn FnMut(NodeId, EdgeLabel)) {
        let (wrapped, proto, parent, slots) = {
            let nodes = self.nodes.borrow();
            let data = &nodes[node.index()];
            let slots = data.slots.borrow().clone();
            (
                data.wrapped.get(),
                data.proto.get(),
                data.parent.get(),
                slots,
            )
        };
        if let Some(target) = wrapped {
            f(target, EdgeLabel::Name("wrapped"));
        }
        if let Some(proto) = proto {
            f(proto, EdgeLabel::Name("proto"));
        }
        if let Some(parent) = parent {
            f(parent, EdgeLabel::Name("parent"));
        }
        for (index, slot) in slots.into_iter().enumerate() {
            f(slot, EdgeLabel::Indexed("slot", index));
        }
    }

    // ------------------------------------------------------------------
    // Roots and weak mappings
    // ------------------------------------------------------------------

    /// Root `node` in the engine's own root set. Roots are marked black.
    pub fn add_root(&self, node: NodeId) {
        self.roots.borrow_mut().push(node);
        self.gray_bits_valid.set(false);
    }

    /// Remove `node` from the engine root set.
    pub fn remove_root(&self, node: NodeId) {
        let mut roots = self.roots.borrow_mut();
        if let Some(pos) = roots.iter().position(|&r| r == node) {
            roots.swap_remove(pos);
        }
        self.gray_bits_valid.set(false);
    }

    /// Record a weak-map association.
    pub fn add_weak_mapping(&self, map: Option<NodeId>, key: Option<NodeId>, value: Option<NodeId>) {
        self.weak_mappings
            .borrow_mut()
            .push(WeakMapping { map, key, value });
        self.gray_bits_valid.set(false);
    }

    /// Snapshot of all weak mappings.
    #[must_use]
    pub fn weak_mappings(&self) -> Vec<WeakMapping> {
        self.weak_mappings.borrow().clone()
    }

    /// The delegate of a weak-map key: a cross-compartment wrapper key
    /// delegates to its wrapped target, which can keep the entry's value
    /// alive on its own.
    #[must_use]
    pub fn weak_key_delegate(&self, key: NodeId) -> Option<NodeId> {
        if self.kind(key) == TraceKind::Object {
            self.wrapped_target(key)
        } else {
            None
        }
    }

    // ------------------------------------------------------------------
    // Wrapper caches
    // ------------------------------------------------------------------

    pub(crate) fn lookup_wrapper(&self, compartment: CompartmentId, key: WrapKey) -> Option<NodeId> {
        self.compartments.borrow()[compartment.index()]
            .wrappers
            .borrow()
            .get(&key)
            .copied()
    }

    pub(crate) fn insert_wrapper(&self, compartment: CompartmentId, key: WrapKey, wrapper: NodeId) {
        let previous = self.compartments.borrow()[compartment.index()]
            .wrappers
            .borrow_mut()
            .insert(key, wrapper);
        debug_assert!(
            previous.is_none(),
            "a live wrapper already exists for this value in this compartment"
        );
    }

    /// Unwrapped targets of every cross-compartment wrapper whose wrapper
    /// lives in `zone`.
    #[must_use]
    pub fn wrapper_targets_of_zone(&self, zone: ZoneId) -> Vec<NodeId> {
        let compartments = self.compartments.borrow();
        let mut targets = Vec::new();
        for data in compartments.iter().filter(|c| c.zone == zone) {
            targets.extend(data.wrappers.borrow().keys().map(|key| key.target()));
        }
        targets
    }

    // ------------------------------------------------------------------
    // Marking
    // ------------------------------------------------------------------

    /// The node's current color.
    #[must_use]
    pub fn color(&self, node: NodeId) -> Color {
        self.nodes.borrow()[node.index()].color.get()
    }

    /// Whether the node's liveness is contingent on cycle analysis.
    #[must_use]
    pub fn is_gray(&self, node: NodeId) -> bool {
        self.color(node) == Color::Gray
    }

    /// Mark a single node with `color` under mark-if-unmarked semantics:
    /// a node already at least as dark is left untouched.
    pub fn mark(&self, node: NodeId, color: Color) {
        let cell = &self.nodes.borrow()[node.index()].color;
        if cell.get() < color {
            cell.set(color);
        }
    }

    pub(crate) fn clear_colors(&self) {
        for node in self.nodes.borrow().iter() {
            node.color.set(Color::White);
        }
    }

    /// Mark `root` and everything reachable from it with `color`,
    /// iteratively. Returns the number of nodes whose color changed.
    pub(crate) fn mark_transitive(&self, root: NodeId, color: Color) -> usize {
        let mut marked = 0;
        let mut worklist = vec![root];
        while let Some(node) = worklist.pop() {
            if self.color(node) >= color {
                continue;
            }
            self.nodes.borrow()[node.index()].color.set(color);
            marked += 1;
            self.trace_children(node, &mut |child, _| worklist.push(child));
        }
        marked
    }

    /// Mark the engine's own root set black, transitively.
    pub(crate) fn mark_roots_black(&self) -> usize {
        let roots = self.roots.borrow().clone();
        roots
            .into_iter()
            .map(|root| self.mark_transitive(root, Color::Black))
            .sum()
    }

    /// Propagate marks through weak mappings to a fixed point: a value is
    /// as live as the weaker of its map and key.
    pub(crate) fn propagate_weak_marks(&self) {
        loop {
            let mut changed = false;
            for mapping in self.weak_mappings() {
                let Some(value) = mapping.value else { continue };
                let map_color = mapping.map.map_or(Color::Black, |m| self.color(m));
                let key_color = mapping.key.map_or(Color::Black, |k| self.color(k));
                let implied = map_color.min(key_color);
                if implied > self.color(value) && self.mark_transitive(value, implied) > 0 {
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Gray objects of `zone`, in allocation order.
    #[must_use]
    pub fn gray_objects_of_zone(&self, zone: ZoneId) -> Vec<NodeId> {
        let count = self.nodes.borrow().len();
        (0..count)
            .map(|i| NodeId(u32::try_from(i).unwrap_or(u32::MAX)))
            .filter(|&n| {
                self.kind(n) == TraceKind::Object
                    && self.is_gray(n)
                    && self.zone_of(n) == zone
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Collection bookkeeping
    // ------------------------------------------------------------------

    /// Whether an incremental collection increment is in flight.
    #[must_use]
    pub fn incremental_in_progress(&self) -> bool {
        self.incremental.get()
    }

    /// Record that the engine started an incremental collection.
    pub fn begin_incremental_mark(&self) {
        self.incremental.set(true);
        self.gray_bits_valid.set(false);
    }

    /// Record that the engine finished (or was forced to finish) the
    /// incremental collection.
    pub fn finish_incremental_mark(&self) {
        self.incremental.set(false);
    }

    /// Whether node colors reflect the current heap shape.
    #[must_use]
    pub fn gray_bits_valid(&self) -> bool {
        self.gray_bits_valid.get()
    }

    pub(crate) fn set_gray_bits_valid(&self, valid: bool) {
        self.gray_bits_valid.set(valid);
    }
}

impl Default for ScriptHeap {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
