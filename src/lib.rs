//! # bktr - Bucket Tree Index
//!
//! An immutable, two-level on-disk index that maps a virtual address
//! within `[start, end)` to a variable-sized entry describing how that
//! region is materialized: where to read the underlying bytes from,
//! which algorithm to apply, and so on. Sparse, indirect, and compressed
//! storage overlays use a bucket tree as their lookup spine.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use bktr::{BucketTree, GlobalNodeAllocator, MmapStorage, SubStorage};
//!
//! let file = Arc::new(MmapStorage::open("./overlay.bktr")?);
//! let nodes = SubStorage::new(file.clone(), node_region, node_len)?;
//! let entries = SubStorage::new(file, entry_region, entry_len)?;
//!
//! let mut tree = BucketTree::new(
//!     Arc::new(GlobalNodeAllocator),
//!     nodes,
//!     entries,
//!     16384, // node_size
//!     16,    // entry_size
//!     entry_count,
//! )?;
//! tree.set_end_offset(16384, overlay_len)?;
//!
//! let mut visitor = tree.find(virtual_address)?;
//! let entry = visitor.get(); // leading 8 bytes: entry's start address
//! while visitor.can_move_next() {
//!     visitor.move_next()?;
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │   Overlay storage (sparse / indirect / …) │   out of scope
//! ├───────────────────────────────────────────┤
//! │   BucketTree + Visitor          [`tree`]  │   find / move / scan
//! ├──────────────────────┬────────────────────┤
//! │  Storage  [`storage`]│ Memory  [`memory`] │   injected seams
//! └──────────────────────┴────────────────────┘
//! ```
//!
//! The tree consumes two injected [`Storage`]s (offset nodes and entry
//! sets; byte layouts validated in full, nothing trusted) and one
//! injected [`NodeAllocator`] (every buffer is accounted for; the tree
//! pins exactly one node, each visitor owns at most one buffer).
//!
//! ## Design Points
//!
//! - **Read-only.** Indexes are built offline; this crate only answers
//!   queries against them.
//! - **Minimal I/O.** The L1 node is pinned at initialization; a point
//!   query costs at most one node-storage read (only when an L2 level
//!   exists) plus one entry-storage read. Cursor movement within an entry
//!   set is free; crossing a set boundary costs one read.
//! - **Untrusted input.** Every on-disk descriptor is verified; each
//!   invariant violation maps to a distinct, testable [`TreeError`] kind.
//! - **No internal locking.** One tree and its visitors form a
//!   single-threaded cooperative unit; the borrow checker enforces the
//!   one mutable operation ([`BucketTree::invalidate_cache`]) exclusively.
//!
//! ## Module Overview
//!
//! - [`tree`]: the index itself (descriptors, geometry, tree, visitor)
//! - [`storage`]: the consumed storage abstraction, windows, mmap backend
//! - [`memory`]: the allocator seam and node buffers
//! - [`error`]: the failure taxonomy

pub mod error;
pub mod memory;
pub mod storage;
pub mod tree;

pub use error::TreeError;
pub use memory::{BudgetAllocator, GlobalNodeAllocator, NodeAllocator, NodeBuffer};
pub use storage::{MmapStorage, Storage, SubStorage};
pub use tree::{
    query_entry_storage_size, query_header_storage_size, query_node_storage_size, BucketTree,
    ContinuousEntry, ContinuousReadingInfo, Header, NodeHeader, Visitor, BKTR_MAGIC,
    FORMAT_VERSION, HEADER_SIZE, NODE_HEADER_SIZE, NODE_SIZE_MAX, NODE_SIZE_MIN,
};
