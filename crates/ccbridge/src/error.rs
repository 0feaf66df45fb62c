//! Error taxonomy for bridge operations.
//!
//! Invariant violations (double-remove, trace-after-remove, mutating the
//! holder set mid-enumeration) are debug assertions, not errors: once the
//! color invariant is broken there is no sound local recovery. Threading
//! preconditions are reported as boolean results on the hand-off calls.

use thiserror::Error;

/// A failed bridge operation.
///
/// All variants degrade to a deferred collection attempt: the caller is
/// expected to retry on a later tick.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The script heap refused a bookkeeping allocation.
    ///
    /// Surfaced by wrapping (wrapper or string-copy creation) when the heap
    /// has reached its configured node limit. The whole operation is
    /// aborted; no partially constructed wrapper is left reachable.
    #[error("script heap is out of memory")]
    OutOfMemory,

    /// The target compartment has no global to parent a wrapper to.
    #[error("target compartment has no global object")]
    MissingGlobal,

    /// Cycle collection was requested before a completed collection pass,
    /// so node colors are meaningless.
    #[error("cycle collection requires a completed collection pass")]
    CollectionRequired,
}
