//! # Node Geometry
//!
//! Pure arithmetic mapping a tree configuration `(node_size, entry_size,
//! entry_count)` to fan-outs and backing storage sizes. Everything here is
//! a total function of its arguments; nothing touches storage.
//!
//! ## Fan-Out
//!
//! Every node spends 16 bytes on its [`NodeHeader`](super::NodeHeader);
//! the rest is payload:
//!
//! ```text
//! entries_per_node = (node_size - 16) / entry_size   (entry sets)
//! offsets_per_node = (node_size - 16) / 8            (offset nodes)
//! entry_set_count  = ceil(entry_count / entries_per_node)
//! ```
//!
//! ## When A Second Level Is Needed
//!
//! The L1 node holds one key per entry set. Once `entry_set_count`
//! outgrows `offsets_per_node`, the overflow spills into L2 nodes, but
//! every L2 node consumes one L1 slot for its own key, shrinking the room
//! left for direct entry-set keys. [`node_l2_count`] resolves that
//! feedback with the two-step form used by the on-disk format: a first
//! approximation ignoring the displaced slots, then a recount with the
//! approximation's slots reserved. The result satisfies
//!
//! ```text
//! (offsets_per_node - l2) + l2 * offsets_per_node >= entry_set_count
//! ```
//!
//! with the smallest possible `l2`, which the unit tests check against an
//! exhaustive packing simulation.

use eyre::Result;

use super::header::NODE_HEADER_SIZE;
use crate::error::TreeError;

/// Smallest supported node size.
pub const NODE_SIZE_MIN: usize = 1024;

/// Largest supported node size.
pub const NODE_SIZE_MAX: usize = 512 * 1024;

fn divide_up(value: i64, divisor: i64) -> i64 {
    debug_assert!(value >= 0);
    debug_assert!(divisor > 0);
    (value + divisor - 1) / divisor
}

/// Entries that fit in one entry set.
pub(crate) fn entries_per_node(node_size: usize, entry_size: usize) -> i32 {
    ((node_size - NODE_HEADER_SIZE) / entry_size) as i32
}

/// 64-bit keys that fit in one offset node.
pub(crate) fn offsets_per_node(node_size: usize) -> i32 {
    ((node_size - NODE_HEADER_SIZE) / 8) as i32
}

/// Entry sets required to hold `entry_count` entries.
pub(crate) fn entry_set_count(node_size: usize, entry_size: usize, entry_count: i32) -> i32 {
    let per_node = entries_per_node(node_size, entry_size);
    divide_up(entry_count as i64, per_node as i64) as i32
}

/// L2 nodes required, zero when the L1 node holds every entry-set key.
///
/// Callers validate the configuration first (see [`validate_config`]);
/// the arithmetic itself assumes the tree is representable.
pub(crate) fn node_l2_count(node_size: usize, entry_size: usize, entry_count: i32) -> i32 {
    let offset_count = offsets_per_node(node_size) as i64;
    let set_count = entry_set_count(node_size, entry_size, entry_count) as i64;

    if set_count <= offset_count {
        return 0;
    }

    let approx = divide_up(set_count, offset_count);
    debug_assert!(approx <= offset_count);

    divide_up(set_count - (offset_count - (approx - 1)), offset_count) as i32
}

/// Rejects configurations the format cannot represent.
pub(crate) fn validate_config(
    node_size: usize,
    entry_size: usize,
    entry_count: i32,
) -> Result<()> {
    if entry_size < 8 {
        return Err(TreeError::InvalidSize {
            reason: "entry size below the 8-byte key prefix",
        }
        .into());
    }
    if node_size < entry_size + NODE_HEADER_SIZE {
        return Err(TreeError::InvalidSize {
            reason: "node size cannot hold a header and one entry",
        }
        .into());
    }
    if !(NODE_SIZE_MIN..=NODE_SIZE_MAX).contains(&node_size) {
        return Err(TreeError::InvalidSize {
            reason: "node size outside [1 KiB, 512 KiB]",
        }
        .into());
    }
    if !node_size.is_power_of_two() {
        return Err(TreeError::InvalidSize {
            reason: "node size is not a power of two",
        }
        .into());
    }
    if entry_count < 0 {
        return Err(TreeError::InvalidSize {
            reason: "negative entry count",
        }
        .into());
    }

    if entry_count > 0 {
        let offset_count = offsets_per_node(node_size) as i64;
        let set_count = entry_set_count(node_size, entry_size, entry_count) as i64;
        if set_count > offset_count && divide_up(set_count, offset_count) > offset_count {
            return Err(TreeError::InvalidSize {
                reason: "entry count exceeds two-level capacity",
            }
            .into());
        }
    }

    Ok(())
}

/// Bytes of header storage a tree needs; constant.
pub fn query_header_storage_size() -> i64 {
    super::header::HEADER_SIZE as i64
}

/// Bytes of node storage a tree built for this configuration occupies.
pub fn query_node_storage_size(node_size: usize, entry_size: usize, entry_count: i32) -> Result<i64> {
    validate_config(node_size, entry_size, entry_count)?;

    if entry_count == 0 {
        return Ok(0);
    }
    let l2 = node_l2_count(node_size, entry_size, entry_count) as i64;
    Ok((1 + l2) * node_size as i64)
}

/// Bytes of entry storage a tree built for this configuration occupies.
pub fn query_entry_storage_size(
    node_size: usize,
    entry_size: usize,
    entry_count: i32,
) -> Result<i64> {
    validate_config(node_size, entry_size, entry_count)?;

    if entry_count == 0 {
        return Ok(0);
    }
    Ok(entry_set_count(node_size, entry_size, entry_count) as i64 * node_size as i64)
}
