//! # rg-sync
//!
//! Timeline-semaphore primitives shared between the compiler (which
//! allocates fence values while building the schedule) and the executor
//! (which actually signals and waits on them).

pub mod timeline;

pub use timeline::{PipelineTimeline, QueueKind, TimelineSemaphore};
