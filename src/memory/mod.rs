//! # Node Memory Management
//!
//! This module provides the allocation seam for node-sized buffers. The
//! bucket tree never allocates behind the caller's back: every buffer (the
//! pinned L1 node owned by the tree, and each visitor's entry-set buffer)
//! comes from an injected [`NodeAllocator`].
//!
//! ## Allocation Model
//!
//! A tree owns exactly one node-sized buffer for its lifetime (the L1
//! node). Each visitor owns at most one buffer of `entry_size + node_size`
//! bytes, allocated lazily on its first `find` and released when the
//! visitor is dropped. There are no pools, background tasks, or shared
//! caches; refusal is immediate and surfaces as `TreeError::OutOfMemory`.
//!
//! ## Alignment
//!
//! Node buffers are allocated with 8-byte alignment so their payloads can
//! be viewed as arrays of little-endian 64-bit offsets without fixups.
//!
//! ## Budget Enforcement
//!
//! [`BudgetAllocator`] wraps another allocator with a hard byte limit:
//! allocations that would exceed the budget are refused rather than
//! deferred. Embedded callers use it to cap how much memory an index may
//! pin; tests use it to drive the out-of-memory paths deterministically.

mod alloc;
mod node_buffer;

pub use alloc::{BudgetAllocator, GlobalNodeAllocator, NodeAllocator, NODE_ALIGNMENT};
pub use node_buffer::NodeBuffer;
