//! A cross-heap cycle-collector bridge.
//!
//! `ccbridge` sits between two independently managed memory models inside a
//! scripting-language host: a tracing garbage collector for script-heap
//! nodes and a reference-counted graph of native host objects. Reference
//! cycles that span both heaps are invisible to either collector alone.
//! Once per collection attempt this crate computes a liveness color for
//! every heap node — **black** (proven live by a direct root), **gray**
//! (liveness contingent on cycle analysis) — and exposes the node/edge
//! traversal contract an external cycle collector consumes to find and
//! break such cross-heap cycles.
//!
//! # Quick start
//!
//! ```ignore
//! use std::rc::Rc;
//! use ccbridge::{CollectReason, NativeId, Runtime, ScriptSlot, Trace};
//!
//! #[derive(Trace)]
//! struct EventListener {
//!     callback: ScriptSlot,
//! }
//!
//! let runtime = Runtime::new();
//! let heap = runtime.heap();
//! let zone = heap.new_zone();
//! let compartment = heap.new_compartment(zone, false);
//! let callback = heap.new_function(compartment)?;
//!
//! // A native object keeps a script function alive.
//! let listener = Rc::new(EventListener { callback: ScriptSlot::new() });
//! listener.callback.set(callback);
//! let _registration = runtime.register_holder(NativeId(1), listener);
//!
//! // Color the heap, then feed the external cycle collector.
//! runtime.collect(CollectReason::ApiCall);
//! runtime.begin_cycle_collection(&mut my_graph_builder)?;
//! ```
//!
//! # Design notes
//!
//! - The script engine's allocator and sweeper are out of scope; the
//!   [`ScriptHeap`] model owns node storage, colors, and structure, and
//!   never frees anything.
//! - Every chain walk — marking, traversal of shape ancestor chains,
//!   prototype-chain wrapping, gray-bit repair — is iterative over an
//!   explicit worklist.
//! - The runtime is single-owner-threaded; ownership can be handed to a
//!   collector thread for the duration of a pass, never shared.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod callback;
mod error;
mod holders;
mod mark;
mod metrics;
mod runtime;
mod trace;
mod traverse;
mod weakmap;
mod wrap;
mod zone;

/// Script-heap model internals.
///
/// This module is public as the engine-side surface: embedders (and tests)
/// build compartments, nodes, contexts, and weak mappings through it.
pub mod heap;

#[cfg(feature = "tracing")]
mod tracing;

// Re-export public API
pub use callback::{GraphBuilder, NativeRoot, RootBuilder};
pub use error::Error;
pub use heap::{
    Color, CompartmentId, ContextId, EdgeLabel, NativeEdge, NativeId, NodeId, ObjectClass,
    ScriptHeap, TraceKind, Value, WeakMapping, ZoneId,
};
pub use holders::{process_token_held, HolderGuard};
pub use mark::CollectPhase;
pub use metrics::PassMetrics;
pub use runtime::{CollectReason, Runtime};
pub use trace::{ScriptSlot, Trace, Visitor};
pub use traverse::TraverseMode;

// Re-export derive macro when the feature is enabled
#[cfg(feature = "derive")]
pub use ccbridge_derive::Trace;
