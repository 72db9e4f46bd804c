//! Atomic per-namespace sequence ids.

mod allocator;
mod namespace;

pub use allocator::*;
pub use namespace::*;
