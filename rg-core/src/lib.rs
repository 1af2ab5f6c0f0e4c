//! # rg-core
//!
//! Shared primitives for the render-graph compiler: generational handles,
//! resource identifiers, range algebra, process-wide settings, and the crate's
//! error type.
//!
//! This crate has no rendering-API dependency — it is pure compiler
//! bookkeeping, reused by `rg-sync` (timeline synchronization) and
//! `rg-compiler` (the graph itself).

pub mod error;
pub mod handle;
pub mod identifier;
pub mod range;
pub mod settings;

pub use error::{Error, Result};
pub use handle::{Handle, HandleAllocator};
pub use identifier::ResourceIdentifier;
pub use range::{Bound, RangeSpec, SubresourceRange};
pub use settings::{AutoAliasMode, AutoAliasPackingStrategy, Settings};
