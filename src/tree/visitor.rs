//! # Visitor
//!
//! The stateful cursor over a tree's entries: point lookup
//! ([`find`](Visitor::find)), bidirectional movement, and the
//! continuous-reading look-ahead.
//!
//! ## Buffering
//!
//! A visitor owns one buffer of `entry_size + node_size` bytes from its
//! tree's allocator, acquired lazily on the first `find`:
//!
//! ```text
//! +------------+--------------------------------------+
//! | entry copy | current entry set                    |
//! | entry_size |  node_size (also L2 scratch in find) |
//! +------------+--------------------------------------+
//! ```
//!
//! The leading region holds a stable copy of the current entry, so
//! [`get`](Visitor::get) stays valid while the set region is reused for
//! an L2 node during a re-`find`. Moving within the current entry set
//! touches no storage; crossing a set boundary costs exactly one
//! entry-storage read.
//!
//! ## Validity
//!
//! `entry_index < 0` marks the visitor invalid: freshly created, or the
//! survivor of a failed operation. Every I/O failure during `find` or a
//! boundary crossing invalidates; a movement refused at the tree's ends
//! (`InvalidOffset`, no I/O attempted) leaves the cursor positioned.

use eyre::Result;
use zerocopy::little_endian::I64;
use zerocopy::FromBytes;

use super::continuous::{ContinuousEntry, ContinuousReadingInfo};
use super::header::{NodeHeader, NODE_HEADER_SIZE};
use super::tree::BucketTree;
use crate::error::TreeError;
use crate::memory::NodeBuffer;
use crate::storage::Storage;

/// Decoded header of the currently buffered entry set, plus the derived
/// virtual-address range of the set. `end` is `None` only when the next
/// set's start key was not reachable without I/O (see
/// `BucketTree::entry_set_end_hint`).
#[derive(Debug, Clone, Copy)]
struct EntrySetHeader {
    index: i32,
    count: i32,
    start: i64,
    end: Option<i64>,
}

impl EntrySetHeader {
    const INVALID: Self = Self {
        index: -1,
        count: 0,
        start: 0,
        end: None,
    };
}

/// Cursor over the entries of a [`BucketTree`].
///
/// Borrows its tree immutably, so visitors cannot outlive the tree and
/// any number of them may search concurrently.
pub struct Visitor<'a, NS, ES> {
    tree: &'a BucketTree<NS, ES>,
    buffer: Option<NodeBuffer>,
    entry_index: i32,
    entry_set_count: i32,
    entry_set: EntrySetHeader,
}

impl<'a, NS: Storage, ES: Storage> Visitor<'a, NS, ES> {
    pub(crate) fn new(tree: &'a BucketTree<NS, ES>) -> Self {
        Self {
            tree,
            buffer: None,
            entry_index: -1,
            entry_set_count: tree.entry_set_count(),
            entry_set: EntrySetHeader::INVALID,
        }
    }

    pub fn tree(&self) -> &'a BucketTree<NS, ES> {
        self.tree
    }

    pub fn is_valid(&self) -> bool {
        self.entry_index >= 0
    }

    pub fn can_move_next(&self) -> bool {
        self.is_valid()
            && (self.entry_index + 1 < self.entry_set.count
                || self.entry_set.index + 1 < self.entry_set_count)
    }

    pub fn can_move_prev(&self) -> bool {
        self.is_valid() && (self.entry_index > 0 || self.entry_set.index > 0)
    }

    /// Raw bytes of the current entry.
    ///
    /// Panics when the visitor is invalid; check [`is_valid`](Self::is_valid)
    /// after a failed operation before touching the entry.
    pub fn get(&self) -> &[u8] {
        assert!(self.is_valid(), "visitor is not positioned on an entry");
        &self.buffer().as_slice()[..self.tree.entry_size()]
    }

    /// Decodes the current entry as `E`, which must be exactly entry-sized.
    pub fn get_as<E: FromBytes>(&self) -> Result<E> {
        if !self.is_valid() {
            return Err(
                TreeError::PreconditionViolation("visitor is not positioned on an entry").into(),
            );
        }
        if std::mem::size_of::<E>() != self.tree.entry_size() {
            return Err(TreeError::InvalidSize {
                reason: "entry type size does not match the tree entry size",
            }
            .into());
        }
        E::read_from_bytes(self.get()).map_err(|_| {
            TreeError::InvalidSize {
                reason: "entry type size does not match the tree entry size",
            }
            .into()
        })
    }

    /// Positions the visitor on the entry containing `virtual_address`.
    ///
    /// At most one node-storage read (when routing through L2) and one
    /// entry-storage read. Any failure leaves the visitor invalid.
    pub fn find(&mut self, virtual_address: i64) -> Result<()> {
        self.entry_index = -1;
        self.entry_set = EntrySetHeader::INVALID;

        let tree = self.tree;
        if tree.is_empty() || !tree.includes(virtual_address) {
            return Err(TreeError::InvalidOffset {
                offset: virtual_address,
                start: tree.start(),
                end: tree.end(),
            }
            .into());
        }

        self.ensure_buffer()?;

        let (set_index, end_hint) = self.find_entry_set(virtual_address)?;
        self.load_entry_set(set_index, end_hint)?;
        self.find_entry(virtual_address)?;
        Ok(())
    }

    /// Advances to the next entry in virtual-address order.
    pub fn move_next(&mut self) -> Result<()> {
        if !self.is_valid() {
            return Err(TreeError::PreconditionViolation("cannot move an invalid visitor").into());
        }

        if self.entry_index + 1 < self.entry_set.count {
            self.entry_index += 1;
            self.copy_current_entry();
            return Ok(());
        }

        let next_set = self.entry_set.index + 1;
        if next_set >= self.entry_set_count {
            return Err(TreeError::InvalidOffset {
                offset: self.tree.end(),
                start: self.tree.start(),
                end: self.tree.end(),
            }
            .into());
        }

        let end_hint = self.tree.entry_set_end_hint(next_set);
        if let Err(err) = self.load_entry_set(next_set, end_hint) {
            self.entry_index = -1;
            return Err(err);
        }
        self.entry_index = 0;
        self.copy_current_entry();
        Ok(())
    }

    /// Steps back to the previous entry in virtual-address order.
    pub fn move_prev(&mut self) -> Result<()> {
        if !self.is_valid() {
            return Err(TreeError::PreconditionViolation("cannot move an invalid visitor").into());
        }

        if self.entry_index > 0 {
            self.entry_index -= 1;
            self.copy_current_entry();
            return Ok(());
        }

        let prev_set = self.entry_set.index - 1;
        if prev_set < 0 {
            return Err(TreeError::InvalidOffset {
                offset: self.tree.start() - 1,
                start: self.tree.start(),
                end: self.tree.end(),
            }
            .into());
        }

        // The abandoned set's start is exactly the previous set's end.
        let end_hint = Some(self.entry_set.start);
        if let Err(err) = self.load_entry_set(prev_set, end_hint) {
            self.entry_index = -1;
            return Err(err);
        }
        self.entry_index = self.entry_set.count - 1;
        self.copy_current_entry();
        Ok(())
    }

    /// Looks ahead across consecutive entries of the current set for the
    /// longest physically contiguous run satisfying `[offset, offset + size)`.
    ///
    /// Pure look-ahead: performs no I/O and does not move the visitor.
    pub fn scan_continuous_reading<E: ContinuousEntry>(
        &self,
        offset: i64,
        size: usize,
    ) -> Result<ContinuousReadingInfo> {
        if !self.is_valid() {
            return Err(
                TreeError::PreconditionViolation("visitor is not positioned on an entry").into(),
            );
        }
        let tree = self.tree;
        if std::mem::size_of::<E>() != tree.entry_size() {
            return Err(TreeError::InvalidSize {
                reason: "entry type size does not match the tree entry size",
            }
            .into());
        }

        let mut info = ContinuousReadingInfo::default();
        if size == 0 {
            return Ok(info);
        }
        if !tree.includes_range(offset, size as i64) {
            return Err(TreeError::InvalidOffset {
                offset,
                start: tree.start(),
                end: tree.end(),
            }
            .into());
        }

        let first: E = self.decode_entry_at(self.entry_index)?;
        if !first.is_continuous() {
            return Ok(info);
        }
        if first.virtual_offset() > offset {
            return Err(TreeError::OutOfRange.into());
        }

        let target_end = offset + size as i64;
        let Some(mut covered_end) = self.entry_extent_end(self.entry_index) else {
            return Ok(info);
        };

        let mut skip_count = 0;
        let mut index = self.entry_index;
        while covered_end < target_end && index + 1 < self.entry_set.count {
            let next: E = self.decode_entry_at(index + 1)?;
            if !next.is_continuous() {
                break;
            }
            let expected = first.physical_offset() + (next.virtual_offset() - first.virtual_offset());
            if next.physical_offset() != expected {
                break;
            }
            let Some(next_end) = self.entry_extent_end(index + 1) else {
                break;
            };
            index += 1;
            skip_count += 1;
            covered_end = next_end;
        }

        let read_end = covered_end.min(target_end);
        if read_end > offset {
            let done = read_end == target_end;
            info = ContinuousReadingInfo::new((read_end - offset) as usize, skip_count, done);
        }
        Ok(info)
    }

    /// Step 1 of `find`: the entry set containing `va`, plus the exclusive
    /// end of that set when the search path revealed it.
    fn find_entry_set(&mut self, va: i64) -> Result<(i32, Option<i64>)> {
        let tree = self.tree;
        let keys = tree.l1_keys();
        let l1_count = tree.l1_count() as usize;

        if !tree.has_l2() {
            let used = &keys[..l1_count];
            let pos = upper_bound(used, va);
            if pos == 0 {
                return Err(TreeError::OutOfRange.into());
            }
            let end_hint = match used.get(pos) {
                Some(key) => Some(key.get()),
                None => Some(tree.end()),
            };
            return Ok(((pos - 1) as i32, end_hint));
        }

        let offset_count = tree.offset_count() as usize;
        let tail_len = offset_count - l1_count;

        if tail_len > 0 && va < keys[0].get() {
            // The earliest entry sets keep their keys directly on L1.
            let tail = &keys[l1_count..offset_count];
            let pos = upper_bound(tail, va);
            if pos == 0 {
                return Err(TreeError::OutOfRange.into());
            }
            let end_hint = match tail.get(pos) {
                Some(key) => Some(key.get()),
                None => Some(keys[0].get()),
            };
            return Ok(((pos - 1) as i32, end_hint));
        }

        let head = &keys[..l1_count];
        let pos = upper_bound(head, va);
        if pos == 0 {
            return Err(TreeError::OutOfRange.into());
        }
        let node_end_hint = match head.get(pos) {
            Some(key) => Some(key.get()),
            None => Some(tree.end()),
        };
        self.find_entry_set_in_l2(va, (pos - 1) as i32, node_end_hint)
    }

    /// L2 leg of step 1: reads L2 node `node_index` into the set region
    /// and resolves the absolute entry-set index.
    fn find_entry_set_in_l2(
        &mut self,
        va: i64,
        node_index: i32,
        node_end_hint: Option<i64>,
    ) -> Result<(i32, Option<i64>)> {
        let tree = self.tree;
        let node_size = tree.node_size();
        let routed_key = tree.l1_keys()[node_index as usize].get();

        let scratch = self.set_bytes_mut();
        tree.read_l2_node(node_index, scratch)?;

        let header = *NodeHeader::from_bytes(scratch)?;
        header.verify(node_index, node_size, 8)?;
        if header.offset() != routed_key {
            return Err(TreeError::InvalidNodeHeader {
                index: node_index,
                reason: "L2 offset does not match its key on L1",
            }
            .into());
        }

        let count = header.count() as usize;
        let payload = &self.set_bytes()[NODE_HEADER_SIZE..][..count * 8];
        let keys = <[I64]>::ref_from_bytes(payload).expect("payload length is a multiple of 8");
        if keys[0].get() != header.offset() {
            return Err(TreeError::InvalidNodeHeader {
                index: node_index,
                reason: "L2 offset does not match its first key",
            }
            .into());
        }

        let pos = upper_bound(keys, va);
        if pos == 0 {
            return Err(TreeError::OutOfRange.into());
        }

        let set_index = tree.entry_set_index(node_index, (pos - 1) as i32);
        if set_index >= self.entry_set_count {
            return Err(TreeError::OutOfRange.into());
        }
        let end_hint = match keys.get(pos) {
            Some(key) => Some(key.get()),
            None => node_end_hint,
        };
        Ok((set_index, end_hint))
    }

    /// Step 2 of `find` (and the boundary-crossing leg of the moves):
    /// reads entry set `set_index` into the buffer and verifies it.
    fn load_entry_set(&mut self, set_index: i32, end: Option<i64>) -> Result<()> {
        let tree = self.tree;
        let node_size = tree.node_size();
        let entry_size = tree.entry_size();

        let bytes = self.set_bytes_mut();
        tree.read_entry_set(set_index, bytes)?;

        let header = *NodeHeader::from_bytes(bytes)?;
        header.verify(set_index, node_size, entry_size)?;

        let start = header.offset();
        if start < tree.start() {
            return Err(TreeError::InvalidNodeHeader {
                index: set_index,
                reason: "entry set starts before the tree start",
            }
            .into());
        }
        if let Some(end) = end {
            if start >= end {
                return Err(TreeError::InvalidNodeHeader {
                    index: set_index,
                    reason: "entry set covers an empty range",
                }
                .into());
            }
        }
        if entry_virtual_offset(self.set_bytes(), entry_size, 0) != start {
            return Err(TreeError::InvalidNodeHeader {
                index: set_index,
                reason: "entry set offset does not match its first entry",
            }
            .into());
        }

        self.entry_set = EntrySetHeader {
            index: set_index,
            count: header.count(),
            start,
            end,
        };
        Ok(())
    }

    /// Step 3 of `find`: predecessor search over the set's entries.
    fn find_entry(&mut self, va: i64) -> Result<()> {
        let tree = self.tree;
        let entry_size = tree.entry_size();
        let set = self.entry_set;
        let count = set.count as usize;

        // Predecessor search: first position whose entry address exceeds va.
        let bytes = self.set_bytes();
        let mut lo = 0usize;
        let mut hi = count;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if entry_virtual_offset(bytes, entry_size, mid) <= va {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let pos = lo;
        if pos == 0 {
            return Err(TreeError::OutOfRange.into());
        }
        let index = pos - 1;

        if entry_virtual_offset(bytes, entry_size, index) < tree.start() {
            return Err(TreeError::OutOfRange.into());
        }
        // The predecessor search guarantees va < the next entry's address;
        // for the set's last entry the bound is the set end (tree end when
        // unknown).
        if pos == count {
            let bound = set.end.unwrap_or(tree.end());
            if va >= bound {
                return Err(TreeError::OutOfRange.into());
            }
        }

        self.entry_index = index as i32;
        self.copy_current_entry();
        Ok(())
    }

    /// Exclusive end of the extent of entry `index` within the current
    /// set, when known.
    fn entry_extent_end(&self, index: i32) -> Option<i64> {
        if index + 1 < self.entry_set.count {
            Some(entry_virtual_offset(
                self.set_bytes(),
                self.tree.entry_size(),
                (index + 1) as usize,
            ))
        } else {
            self.entry_set.end
        }
    }

    fn decode_entry_at<E: ContinuousEntry>(&self, index: i32) -> Result<E> {
        debug_assert!(0 <= index && index < self.entry_set.count);
        let entry_size = self.tree.entry_size();
        let offset = NODE_HEADER_SIZE + index as usize * entry_size;
        let bytes = &self.set_bytes()[offset..offset + entry_size];
        E::read_from_bytes(bytes).map_err(|_| {
            TreeError::InvalidSize {
                reason: "entry type size does not match the tree entry size",
            }
            .into()
        })
    }

    fn ensure_buffer(&mut self) -> Result<()> {
        if self.buffer.is_none() {
            let size = self.tree.entry_size() + self.tree.node_size();
            let buffer = NodeBuffer::allocate(self.tree.allocator().clone(), size)?;
            self.buffer = Some(buffer);
        }
        Ok(())
    }

    fn buffer(&self) -> &NodeBuffer {
        self.buffer.as_ref().expect("visitor buffer not allocated")
    }

    fn set_bytes(&self) -> &[u8] {
        &self.buffer().as_slice()[self.tree.entry_size()..]
    }

    fn set_bytes_mut(&mut self) -> &mut [u8] {
        let entry_size = self.tree.entry_size();
        let buffer = self.buffer.as_mut().expect("visitor buffer not allocated");
        &mut buffer.as_mut_slice()[entry_size..]
    }

    /// Copies the entry at `entry_index` into the stable entry region.
    fn copy_current_entry(&mut self) {
        let entry_size = self.tree.entry_size();
        let offset = NODE_HEADER_SIZE + self.entry_index as usize * entry_size;
        let buffer = self.buffer.as_mut().expect("visitor buffer not allocated");
        let (entry, set) = buffer.as_mut_slice().split_at_mut(entry_size);
        entry.copy_from_slice(&set[offset..offset + entry_size]);
    }
}

impl<NS: Storage, ES: Storage> std::fmt::Debug for Visitor<'_, NS, ES> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Visitor")
            .field("entry_index", &self.entry_index)
            .field("entry_set", &self.entry_set.index)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// Leading 8 bytes of entry `index` in a buffered entry set.
fn entry_virtual_offset(set_bytes: &[u8], entry_size: usize, index: usize) -> i64 {
    let offset = NODE_HEADER_SIZE + index * entry_size;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&set_bytes[offset..offset + 8]);
    i64::from_le_bytes(raw)
}

/// Number of keys `<= va`; keys are strictly increasing.
fn upper_bound(keys: &[I64], va: i64) -> usize {
    keys.partition_point(|key| key.get() <= va)
}
