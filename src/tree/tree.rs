//! # BucketTree
//!
//! The tree proper: owner of the two backing storages and the pinned L1
//! node, and the factory for [`Visitor`]s.
//!
//! ## On-Disk Shape
//!
//! ```text
//! node storage                          entry storage
//! +--------------------+               +--------------------+
//! | L1 node            |               | entry set 0        |
//! |  header            |               |  header            |
//! |  key[0..]          |  each key --> |  entry * count     |
//! +--------------------+               +--------------------+
//! | L2 node 0 (opt.)   |               | entry set 1        |
//! | L2 node 1 (opt.)   |               | ...                |
//! | ...                |               +--------------------+
//! +--------------------+
//! ```
//!
//! Keys are the start virtual addresses of entry sets, sorted. While all
//! of them fit in the L1 node, the L1 payload is just that sorted array.
//! Once they outgrow it, the payload splits in two:
//!
//! ```text
//! payload[0 .. count]              one key per L2 node ("head")
//! payload[count .. offsets_per_node]   direct keys for the first
//!                                      offsets_per_node - count sets ("tail")
//! ```
//!
//! so L2 node `n` at payload index `i` resolves to entry set
//! `(offsets_per_node - count) + offsets_per_node * n + i`. The tail is
//! what keeps every L1 slot useful: each L2 node displaces exactly one
//! direct key.
//!
//! ## Pinned L1
//!
//! The L1 node is read once at construction into an owned, 8-byte-aligned
//! buffer and stays pinned for the tree's lifetime: it is touched on
//! every `find`, and re-reading it would defeat the index. The only way
//! to refresh it is [`BucketTree::invalidate_cache`], which takes
//! `&mut self` and therefore cannot race any outstanding visitor.
//!
//! ## Trust Model
//!
//! Both storages are untrusted input. Geometry is validated before any
//! read; every node header read is verified against its expected
//! position and capacity; L1 key ordering is validated at construction;
//! inconsistencies discovered during a search surface as
//! `TreeError::OutOfRange` instead of wrong answers.

use std::sync::Arc;

use eyre::{Result, WrapErr};
use zerocopy::little_endian::I64;
use zerocopy::FromBytes;

use super::geometry;
use super::header::{NodeHeader, NODE_HEADER_SIZE};
use super::visitor::Visitor;
use crate::error::TreeError;
use crate::memory::{NodeAllocator, NodeBuffer};
use crate::storage::Storage;

/// Immutable two-level index from virtual addresses to entries.
///
/// `NS` holds the offset nodes, `ES` the entry sets; see the module docs
/// for the byte layout of each.
pub struct BucketTree<NS, ES> {
    allocator: Arc<dyn NodeAllocator>,
    node_storage: NS,
    entry_storage: ES,
    node_l1: Option<NodeBuffer>,
    node_size: usize,
    entry_size: usize,
    entry_count: i32,
    offset_count: i32,
    entry_set_count: i32,
    l1_count: i32,
    start_offset: i64,
    end_offset: i64,
    last_entry_offset: i64,
}

impl<NS: Storage, ES: Storage> BucketTree<NS, ES> {
    /// Builds a tree over `node_storage` and `entry_storage`.
    ///
    /// Validates the configuration, bounds-checks both storages, pins and
    /// verifies the L1 node, and probes the first and last entry sets to
    /// learn the covered range. The logical end offset starts at the last
    /// entry's address; callers complete initialization with
    /// [`set_end_offset`](Self::set_end_offset).
    ///
    /// `entry_count == 0` yields an empty tree without touching either
    /// storage.
    pub fn new(
        allocator: Arc<dyn NodeAllocator>,
        node_storage: NS,
        entry_storage: ES,
        node_size: usize,
        entry_size: usize,
        entry_count: i32,
    ) -> Result<Self> {
        geometry::validate_config(node_size, entry_size, entry_count)
            .wrap_err("bucket tree configuration rejected")?;

        let offset_count = geometry::offsets_per_node(node_size);

        if entry_count == 0 {
            return Ok(Self {
                allocator,
                node_storage,
                entry_storage,
                node_l1: None,
                node_size,
                entry_size,
                entry_count: 0,
                offset_count,
                entry_set_count: 0,
                l1_count: 0,
                start_offset: 0,
                end_offset: 0,
                last_entry_offset: 0,
            });
        }

        let set_count = geometry::entry_set_count(node_size, entry_size, entry_count);

        let needed = geometry::query_node_storage_size(node_size, entry_size, entry_count)?;
        let available = node_storage.size().map_err(TreeError::Storage)?;
        if available < needed {
            return Err(TreeError::InvalidSize {
                reason: "node storage too small for the configured tree",
            })
            .wrap_err_with(|| format!("need {} bytes, have {}", needed, available));
        }

        let needed = geometry::query_entry_storage_size(node_size, entry_size, entry_count)?;
        let available = entry_storage.size().map_err(TreeError::Storage)?;
        if available < needed {
            return Err(TreeError::InvalidSize {
                reason: "entry storage too small for the configured tree",
            })
            .wrap_err_with(|| format!("need {} bytes, have {}", needed, available));
        }

        let mut node_l1 = NodeBuffer::allocate(allocator.clone(), node_size)?;
        node_storage
            .read(0, node_l1.as_mut_slice())
            .map_err(TreeError::Storage)
            .wrap_err("failed to read L1 node")?;

        let (l1_count, start_offset) =
            validate_l1(node_l1.as_slice(), node_size, entry_size, entry_count)?;

        // Probe the first entry set; its header offset is the tree start.
        let first = read_set_header(&entry_storage, 0, node_size, entry_size)?;
        if first.offset() != start_offset {
            return Err(TreeError::InvalidNodeHeader {
                index: 0,
                reason: "first entry set does not start at the tree start",
            }
            .into());
        }

        // Probe the last entry set and its last entry for the end of the
        // covered range.
        let last_index = set_count - 1;
        let last = read_set_header(&entry_storage, last_index, node_size, entry_size)?;
        let per_node = geometry::entries_per_node(node_size, entry_size);
        let expected_count = entry_count - per_node * last_index;
        if last.count() != expected_count {
            return Err(TreeError::InvalidNodeHeader {
                index: last_index,
                reason: "last entry set count does not match the entry count",
            }
            .into());
        }
        if last.offset() < start_offset {
            return Err(TreeError::InvalidNodeHeader {
                index: last_index,
                reason: "last entry set starts before the tree start",
            }
            .into());
        }

        let entry_offset = last_index as i64 * node_size as i64
            + NODE_HEADER_SIZE as i64
            + (last.count() - 1) as i64 * entry_size as i64;
        let mut raw = [0u8; 8];
        entry_storage
            .read(entry_offset, &mut raw)
            .map_err(TreeError::Storage)
            .wrap_err("failed to read the last entry")?;
        let last_entry_offset = i64::from_le_bytes(raw);
        if last_entry_offset < last.offset() {
            return Err(TreeError::InvalidNodeHeader {
                index: last_index,
                reason: "last entry precedes its entry set",
            }
            .into());
        }

        Ok(Self {
            allocator,
            node_storage,
            entry_storage,
            node_l1: Some(node_l1),
            node_size,
            entry_size,
            entry_count,
            offset_count,
            entry_set_count: set_count,
            l1_count,
            start_offset,
            end_offset: last_entry_offset,
            last_entry_offset,
        })
    }

    /// Re-seats the logical end offset; the companion to [`new`](Self::new).
    ///
    /// The on-disk format records where every entry starts but not where
    /// the last one ends, so the exclusive end of the covered range comes
    /// from the caller (who knows the size of the overlaid storage).
    pub fn set_end_offset(&mut self, node_size: usize, end_offset: i64) -> Result<()> {
        if node_size != self.node_size {
            return Err(TreeError::PreconditionViolation(
                "node size does not match the tree",
            )
            .into());
        }
        if self.is_empty() {
            if end_offset <= 0 {
                return Err(
                    TreeError::PreconditionViolation("end offset must be positive").into(),
                );
            }
        } else if end_offset <= self.last_entry_offset {
            return Err(TreeError::PreconditionViolation(
                "end offset does not cover the last entry",
            )
            .into());
        }
        self.end_offset = end_offset;
        Ok(())
    }

    /// Positions a fresh [`Visitor`] on the entry containing `va`.
    pub fn find(&self, virtual_address: i64) -> Result<Visitor<'_, NS, ES>> {
        let mut visitor = Visitor::new(self);
        visitor.find(virtual_address)?;
        Ok(visitor)
    }

    /// Re-reads and re-verifies the pinned L1 node, for callers whose
    /// storage layer dropped its own caches underneath the tree.
    ///
    /// Taking `&mut self` means no visitor can be alive across the call.
    /// On error the tree should be discarded; the pinned node may no
    /// longer match what was validated.
    pub fn invalidate_cache(&mut self) -> Result<()> {
        let Some(node_l1) = self.node_l1.as_mut() else {
            return Ok(());
        };

        self.node_storage
            .read(0, node_l1.as_mut_slice())
            .map_err(TreeError::Storage)
            .wrap_err("failed to re-read L1 node")?;

        let (l1_count, start_offset) = validate_l1(
            node_l1.as_slice(),
            self.node_size,
            self.entry_size,
            self.entry_count,
        )?;
        if l1_count != self.l1_count || start_offset != self.start_offset {
            return Err(TreeError::InvalidNodeHeader {
                index: 0,
                reason: "L1 node changed under the tree",
            }
            .into());
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    pub fn entry_count(&self) -> i32 {
        self.entry_count
    }

    pub fn node_size(&self) -> usize {
        self.node_size
    }

    pub fn entry_size(&self) -> usize {
        self.entry_size
    }

    /// Smallest virtual address the tree covers.
    pub fn start(&self) -> i64 {
        self.start_offset
    }

    /// Exclusive end of the covered range.
    pub fn end(&self) -> i64 {
        self.end_offset
    }

    pub fn size(&self) -> i64 {
        self.end_offset - self.start_offset
    }

    pub fn includes(&self, offset: i64) -> bool {
        self.start_offset <= offset && offset < self.end_offset
    }

    /// Whether `[offset, offset + size)` lies inside the covered range;
    /// written overflow-free.
    pub fn includes_range(&self, offset: i64, size: i64) -> bool {
        size > 0 && self.start_offset <= offset && size <= self.end_offset - offset
    }

    pub fn allocator(&self) -> &Arc<dyn NodeAllocator> {
        &self.allocator
    }

    pub(crate) fn entry_set_count(&self) -> i32 {
        self.entry_set_count
    }

    pub(crate) fn offset_count(&self) -> i32 {
        self.offset_count
    }

    pub(crate) fn l1_count(&self) -> i32 {
        self.l1_count
    }

    pub(crate) fn has_l2(&self) -> bool {
        self.offset_count < self.entry_set_count
    }

    /// Full L1 key payload (`offsets_per_node` slots; see the module docs
    /// for which slots are meaningful in each layout).
    pub(crate) fn l1_keys(&self) -> &[I64] {
        let node = self
            .node_l1
            .as_ref()
            .expect("empty trees have no node level");
        let payload = &node.as_slice()[NODE_HEADER_SIZE..][..self.offset_count as usize * 8];
        <[I64]>::ref_from_bytes(payload).expect("payload length is a multiple of 8")
    }

    /// Absolute entry-set index for payload slot `offset_index` of L2
    /// node `node_index`.
    pub(crate) fn entry_set_index(&self, node_index: i32, offset_index: i32) -> i32 {
        (self.offset_count - self.l1_count) + self.offset_count * node_index + offset_index
    }

    /// Exclusive end of entry set `set_index`, when the next set's start
    /// key is reachable without I/O: from the pinned L1, or the tree end
    /// for the last set. `None` when the key lives inside an L2 node.
    pub(crate) fn entry_set_end_hint(&self, set_index: i32) -> Option<i64> {
        let next = set_index + 1;
        if next >= self.entry_set_count {
            return Some(self.end_offset);
        }

        let keys = self.l1_keys();
        if !self.has_l2() {
            return Some(keys[next as usize].get());
        }

        let tail_len = self.offset_count - self.l1_count;
        if next < tail_len {
            return Some(keys[(self.l1_count + next) as usize].get());
        }
        let relative = next - tail_len;
        let node_index = relative / self.offset_count;
        let offset_index = relative % self.offset_count;
        (offset_index == 0).then(|| keys[node_index as usize].get())
    }

    pub(crate) fn read_l2_node(&self, node_index: i32, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.node_size);
        let offset = (1 + node_index as i64) * self.node_size as i64;
        self.node_storage
            .read(offset, buf)
            .map_err(TreeError::Storage)
            .wrap_err_with(|| format!("failed to read L2 node {}", node_index))
    }

    pub(crate) fn read_entry_set(&self, set_index: i32, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.node_size);
        let offset = set_index as i64 * self.node_size as i64;
        self.entry_storage
            .read(offset, buf)
            .map_err(TreeError::Storage)
            .wrap_err_with(|| format!("failed to read entry set {}", set_index))
    }
}

impl<NS, ES> std::fmt::Debug for BucketTree<NS, ES> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketTree")
            .field("node_size", &self.node_size)
            .field("entry_size", &self.entry_size)
            .field("entry_count", &self.entry_count)
            .field("entry_set_count", &self.entry_set_count)
            .field("start", &self.start_offset)
            .field("end", &self.end_offset)
            .finish()
    }
}

/// Verifies the pinned L1 node: header, count for the configured
/// geometry, and key ordering. Returns the header count and the tree
/// start offset.
fn validate_l1(
    bytes: &[u8],
    node_size: usize,
    entry_size: usize,
    entry_count: i32,
) -> Result<(i32, i64)> {
    let offset_count = geometry::offsets_per_node(node_size);
    let set_count = geometry::entry_set_count(node_size, entry_size, entry_count);

    let header = NodeHeader::from_bytes(bytes)?;
    header.verify(0, node_size, 8).wrap_err("L1 node rejected")?;

    let count = header.count();
    if set_count <= offset_count {
        if count != set_count {
            return Err(TreeError::InvalidNodeHeader {
                index: 0,
                reason: "L1 count does not match the entry set count",
            }
            .into());
        }
    } else {
        let l2_count = geometry::node_l2_count(node_size, entry_size, entry_count);
        if count != l2_count {
            return Err(TreeError::InvalidNodeHeader {
                index: 0,
                reason: "L1 count does not match the L2 node count",
            }
            .into());
        }
    }

    let payload = &bytes[NODE_HEADER_SIZE..][..offset_count as usize * 8];
    let keys = <[I64]>::ref_from_bytes(payload).expect("payload length is a multiple of 8");

    if header.offset() != keys[0].get() {
        return Err(TreeError::InvalidNodeHeader {
            index: 0,
            reason: "L1 offset does not match its first key",
        }
        .into());
    }

    let strictly_increasing = |range: &[I64]| range.windows(2).all(|w| w[0].get() < w[1].get());

    let start_offset;
    if set_count <= offset_count {
        let used = &keys[..count as usize];
        if !strictly_increasing(used) {
            return Err(TreeError::InvalidNodeHeader {
                index: 0,
                reason: "L1 keys out of order",
            }
            .into());
        }
        start_offset = used[0].get();
    } else {
        let head = &keys[..count as usize];
        let tail = &keys[count as usize..];
        if !strictly_increasing(head) || !strictly_increasing(tail) {
            return Err(TreeError::InvalidNodeHeader {
                index: 0,
                reason: "L1 keys out of order",
            }
            .into());
        }
        // Tail keys index the earliest entry sets; every one of them
        // precedes the first L2-covered set.
        if let (Some(last_tail), Some(first_head)) = (tail.last(), head.first()) {
            if last_tail.get() >= first_head.get() {
                return Err(TreeError::InvalidNodeHeader {
                    index: 0,
                    reason: "L1 keys out of order",
                }
                .into());
            }
        }
        start_offset = if count < offset_count {
            keys[count as usize].get()
        } else {
            keys[0].get()
        };
    }

    Ok((count, start_offset))
}

/// Reads and verifies the header of entry set `set_index`.
fn read_set_header<ES: Storage>(
    entry_storage: &ES,
    set_index: i32,
    node_size: usize,
    entry_size: usize,
) -> Result<NodeHeader> {
    let mut raw = [0u8; NODE_HEADER_SIZE];
    entry_storage
        .read(set_index as i64 * node_size as i64, &mut raw)
        .map_err(TreeError::Storage)
        .wrap_err_with(|| format!("failed to read entry set {} header", set_index))?;
    let header = *NodeHeader::from_bytes(&raw)?;
    header.verify(set_index, node_size, entry_size)?;
    Ok(header)
}
