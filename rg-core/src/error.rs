//! Error types surfaced by the render-graph compiler.

use std::string::String;
use std::vec::Vec;

use thiserror::Error;

use crate::identifier::ResourceIdentifier;

/// Result alias used throughout the render-graph crates.
pub type Result<T> = core::result::Result<T, Error>;

/// A directed edge `(from, to)` reported as part of a cycle.
pub type Edge = (usize, usize);

/// Compile/runtime failures produced by the compiler.
///
/// Variants map directly onto the failure kinds in the error-handling table:
/// access-control violations and DAG cycles are synchronous, non-recoverable
/// compile failures; stale handles and out-of-range subresources degrade to
/// warnings unless the caller asks for strict failure.
#[derive(Debug, Error)]
pub enum Error {
    /// A pass tried to touch an identifier it never declared.
    #[error("access denied: `{requested}` is not covered by any declared prefix ({declared:?})")]
    AccessDenied {
        requested: ResourceIdentifier,
        declared: Vec<ResourceIdentifier>,
    },

    /// The pass DAG contains a cycle; compilation cannot produce a schedule.
    #[error("cycle detected in pass dependency graph: {edges:?}")]
    CycleDetected { edges: Vec<Edge> },

    /// Two transitions in the same barrier batch disagree on the subresource's
    /// post-transition state.
    #[error(
        "conflicting transitions on resource {resource} subresource range {range:?}: \
         {first_state:?} vs {second_state:?}"
    )]
    ConflictingTransitions {
        resource: u64,
        range: (u32, u32, u32, u32),
        first_state: String,
        second_state: String,
    },

    /// A handle resolved against a registry whose slot generation moved on.
    #[error("stale handle: resource {resource:?} no longer matches registry generation")]
    StaleHandle { resource: u64 },

    /// A resolver's dynamic cast/type check failed while resolving a resource.
    #[error("type mismatch resolving identifier `{identifier}`")]
    TypeMismatch { identifier: ResourceIdentifier },

    /// Materialization failed because the backing allocator is out of memory.
    #[error("allocation failure materializing resource {resource}: {reason}")]
    AllocationFailure { resource: u64, reason: String },

    /// A pass attempted to use an identifier that was never interned.
    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(ResourceIdentifier),
}
