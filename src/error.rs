//! Error taxonomy for bucket tree operations.
//!
//! All fallible APIs in this crate return [`eyre::Result`]. Failures that
//! correspond to a format or usage violation carry a [`TreeError`] as the
//! root cause of the report, so callers (and tests) can tell the kinds
//! apart with `Report::downcast_ref`:
//!
//! ```ignore
//! match err.downcast_ref::<TreeError>() {
//!     Some(TreeError::InvalidOffset { .. }) => { /* address out of range */ }
//!     Some(TreeError::InvalidNodeHeader { .. }) => { /* refuse the index */ }
//!     _ => { /* propagate */ }
//! }
//! ```
//!
//! Nothing is retried internally; every error is surfaced to the immediate
//! caller and leaves no observable partial state behind.

use thiserror::Error;

/// Distinct failure kinds surfaced by tree, visitor, and header operations.
#[derive(Debug, Error)]
pub enum TreeError {
    /// A queried virtual address lies outside `[start, end)`, or a cursor
    /// movement ran past either end of the tree.
    #[error("offset {offset} outside tree range [{start}, {end})")]
    InvalidOffset { offset: i64, start: i64, end: i64 },

    /// The 16-byte top-level header failed its magic, version, or entry
    /// count check.
    #[error("invalid bucket tree header: {reason}")]
    InvalidHeader { reason: &'static str },

    /// A node header's index, count, or offset violates the on-disk
    /// format invariants.
    #[error("invalid node header (node {index}): {reason}")]
    InvalidNodeHeader { index: i32, reason: &'static str },

    /// Internal consistency failure: the entries do not cover the range
    /// the node level promised.
    #[error("bucket tree entries do not cover the expected range")]
    OutOfRange,

    /// The injected allocator refused a node allocation.
    #[error("node allocation of {size} bytes failed")]
    OutOfMemory { size: usize },

    /// Node or entry geometry is out of range, or a backing storage is
    /// too small for the configured tree.
    #[error("invalid bucket tree size: {reason}")]
    InvalidSize { reason: &'static str },

    /// A read from an injected storage failed.
    #[error("storage read failed: {0}")]
    Storage(eyre::Report),

    /// API misuse, e.g. moving an invalid visitor.
    #[error("precondition violated: {0}")]
    PreconditionViolation(&'static str),
}
