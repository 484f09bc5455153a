//! # Bucket Tree Index
//!
//! An immutable, two-level on-disk index mapping a virtual address in
//! `[start, end)` to the variable-sized entry describing how that region
//! is materialized. Overlay storages (sparse, indirect, compressed views
//! over a flat storage) use it as their lookup spine, so everything here
//! sits on the hot read path.
//!
//! ## Shape
//!
//! Entries live in fixed-capacity leaf buckets ("entry sets"), one
//! node-sized slot each, in entry storage. Node storage holds the offset
//! level above them: an L1 node pinned in memory for the tree's lifetime,
//! plus L2 nodes only when the entry-set keys outgrow the L1 payload.
//! Lookup is two binary searches (three with L2) and at most two storage
//! reads, of which the L1 access is always free.
//!
//! ## Pieces
//!
//! - [`Header`] / [`NodeHeader`]: the 16-byte on-disk descriptors and
//!   their verification.
//! - Geometry ([`query_node_storage_size`] and friends): pure sizing
//!   arithmetic for provisioning backing storage before a build.
//! - [`BucketTree`]: owns the storages and the pinned L1 node.
//! - [`Visitor`]: the cursor. `find`, `move_next`, `move_prev`, and the
//!   continuous-reading look-ahead.
//! - [`ContinuousReadingInfo`] / [`ContinuousEntry`]: the look-ahead's
//!   contract with the enclosing storage.
//!
//! ## Trust
//!
//! The index is untrusted input: every descriptor field read from storage
//! is verified before use, and any inconsistency refuses the operation
//! with a distinct [`TreeError`](crate::TreeError) kind rather than
//! returning a wrong entry.

mod continuous;
mod geometry;
mod header;
#[allow(clippy::module_inception)]
mod tree;
mod visitor;

pub use continuous::{ContinuousEntry, ContinuousReadingInfo};
pub use geometry::{
    query_entry_storage_size, query_header_storage_size, query_node_storage_size, NODE_SIZE_MAX,
    NODE_SIZE_MIN,
};
pub use header::{
    Header, NodeHeader, BKTR_MAGIC, FORMAT_VERSION, HEADER_SIZE, NODE_HEADER_SIZE,
};
pub use tree::BucketTree;
pub use visitor::Visitor;
