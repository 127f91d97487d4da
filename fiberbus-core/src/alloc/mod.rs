//! ## fiberbus-core::alloc
//! **Bounded node storage for the event queue**
//!
//! Queue nodes are taken from a slab sized once at bus construction, so
//! enqueueing from interrupt context never reaches the heap allocator.

pub mod slab;

pub use slab::NodeSlab;
