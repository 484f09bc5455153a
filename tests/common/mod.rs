//! Shared test support: an offline image builder for bucket tree
//! storages, a read-counting storage wrapper, and a simple mapping entry
//! type.
//!
//! The crate itself never writes an index (building happens offline, by
//! another tool); this module plays that tool for the tests, laying out
//! node storage and entry storage byte-for-byte as the format prescribes.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use eyre::Result;
use zerocopy::little_endian::I64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use bktr::{
    query_entry_storage_size, query_node_storage_size, BucketTree, ContinuousEntry,
    GlobalNodeAllocator, NodeHeader, Storage, NODE_HEADER_SIZE,
};

/// Entry type used throughout the tests: a leading virtual address plus
/// the physical offset its data lives at. A negative physical offset
/// marks a hole (not eligible for bulk reads).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct MapEntry {
    pub virt: I64,
    pub phys: I64,
}

pub const MAP_ENTRY_SIZE: usize = std::mem::size_of::<MapEntry>();

impl MapEntry {
    pub fn new(virt: i64, phys: i64) -> Self {
        Self {
            virt: I64::new(virt),
            phys: I64::new(phys),
        }
    }

    pub fn hole(virt: i64) -> Self {
        Self::new(virt, -1)
    }
}

impl ContinuousEntry for MapEntry {
    fn virtual_offset(&self) -> i64 {
        self.virt.get()
    }

    fn physical_offset(&self) -> i64 {
        self.phys.get()
    }

    fn is_continuous(&self) -> bool {
        self.phys.get() >= 0
    }
}

/// Serialized node and entry storage for one tree.
pub struct TreeImage {
    pub node_size: usize,
    pub entry_size: usize,
    pub entry_count: i32,
    pub node_storage: Vec<u8>,
    pub entry_storage: Vec<u8>,
}

impl TreeImage {
    /// Lays out storage images for `entries` (raw records of
    /// `entry_size` bytes each, leading 8 bytes the entry's virtual
    /// address, strictly increasing).
    pub fn build(node_size: usize, entry_size: usize, entries: &[Vec<u8>]) -> Self {
        assert!(entry_size >= 8);
        for entry in entries {
            assert_eq!(entry.len(), entry_size);
        }

        let entry_count = entries.len() as i32;
        let node_bytes = query_node_storage_size(node_size, entry_size, entry_count)
            .expect("valid test geometry") as usize;
        let entry_bytes = query_entry_storage_size(node_size, entry_size, entry_count)
            .expect("valid test geometry") as usize;

        let mut image = Self {
            node_size,
            entry_size,
            entry_count,
            node_storage: vec![0u8; node_bytes],
            entry_storage: vec![0u8; entry_bytes],
        };
        if entry_count == 0 {
            return image;
        }

        let per_node = (node_size - NODE_HEADER_SIZE) / entry_size;
        let offset_count = (node_size - NODE_HEADER_SIZE) / 8;
        let set_count = entry_bytes / node_size;
        let l2_count = node_bytes / node_size - 1;

        // Entry sets: one node-sized slot each, fully packed in order.
        let mut keys = Vec::with_capacity(set_count);
        for (set_index, chunk) in entries.chunks(per_node).enumerate() {
            let start = virtual_offset_of(&chunk[0]);
            keys.push(start);

            let slot = &mut image.entry_storage[set_index * node_size..][..node_size];
            let header = NodeHeader::new(set_index as i32, chunk.len() as i32, start);
            slot[..NODE_HEADER_SIZE].copy_from_slice(header.as_bytes());
            for (i, entry) in chunk.iter().enumerate() {
                slot[NODE_HEADER_SIZE + i * entry_size..][..entry_size].copy_from_slice(entry);
            }
        }
        assert_eq!(keys.len(), set_count);

        // Offset level.
        if l2_count == 0 {
            let node = &mut image.node_storage[..node_size];
            let header = NodeHeader::new(0, set_count as i32, keys[0]);
            node[..NODE_HEADER_SIZE].copy_from_slice(header.as_bytes());
            write_keys(&mut node[NODE_HEADER_SIZE..], &keys);
        } else {
            // The L1 payload is split: one key per L2 node up front, then
            // direct keys for the earliest entry sets in the remaining
            // slots. L2 node n covers sets tail_len + offset_count * n ...
            let tail_len = offset_count - l2_count;
            let head: Vec<i64> = (0..l2_count)
                .map(|n| keys[tail_len + offset_count * n])
                .collect();

            let node = &mut image.node_storage[..node_size];
            let header = NodeHeader::new(0, l2_count as i32, head[0]);
            node[..NODE_HEADER_SIZE].copy_from_slice(header.as_bytes());
            write_keys(&mut node[NODE_HEADER_SIZE..], &head);
            write_keys(
                &mut node[NODE_HEADER_SIZE + l2_count * 8..],
                &keys[..tail_len],
            );

            for n in 0..l2_count {
                let from = tail_len + offset_count * n;
                let to = (from + offset_count).min(set_count);
                let node = &mut image.node_storage[(1 + n) * node_size..][..node_size];
                let header = NodeHeader::new(n as i32, (to - from) as i32, keys[from]);
                node[..NODE_HEADER_SIZE].copy_from_slice(header.as_bytes());
                write_keys(&mut node[NODE_HEADER_SIZE..], &keys[from..to]);
            }
        }

        image
    }

    /// Builds a 16-byte-entry image from `(virtual, physical)` pairs.
    pub fn build_map(node_size: usize, entries: &[MapEntry]) -> Self {
        let raw: Vec<Vec<u8>> = entries.iter().map(|e| e.as_bytes().to_vec()).collect();
        Self::build(node_size, MAP_ENTRY_SIZE, &raw)
    }

    /// Opens a tree over clones of the images and seats its end offset.
    pub fn open(&self, end_offset: i64) -> Result<BucketTree<Vec<u8>, Vec<u8>>> {
        let mut tree = BucketTree::new(
            Arc::new(GlobalNodeAllocator),
            self.node_storage.clone(),
            self.entry_storage.clone(),
            self.node_size,
            self.entry_size,
            self.entry_count,
        )?;
        tree.set_end_offset(self.node_size, end_offset)?;
        Ok(tree)
    }

    /// Opens a tree over read-counting wrappers of the images.
    pub fn open_counting(
        &self,
        end_offset: i64,
    ) -> Result<(
        BucketTree<CountingStorage<Vec<u8>>, CountingStorage<Vec<u8>>>,
        ReadCounters,
    )> {
        let nodes = CountingStorage::new(self.node_storage.clone());
        let entries = CountingStorage::new(self.entry_storage.clone());
        let counters = ReadCounters {
            node_reads: nodes.counter(),
            entry_reads: entries.counter(),
        };
        let mut tree = BucketTree::new(
            Arc::new(GlobalNodeAllocator),
            nodes,
            entries,
            self.node_size,
            self.entry_size,
            self.entry_count,
        )?;
        tree.set_end_offset(self.node_size, end_offset)?;
        Ok((tree, counters))
    }
}

fn virtual_offset_of(entry: &[u8]) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&entry[..8]);
    i64::from_le_bytes(raw)
}

fn write_keys(payload: &mut [u8], keys: &[i64]) {
    for (i, key) in keys.iter().enumerate() {
        payload[i * 8..][..8].copy_from_slice(&key.to_le_bytes());
    }
}

/// `Storage` wrapper counting every read, for asserting the exact I/O
/// cost of lookups and cursor movement.
pub struct CountingStorage<S> {
    inner: S,
    reads: Arc<AtomicU64>,
}

impl<S> CountingStorage<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            reads: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn counter(&self) -> Arc<AtomicU64> {
        self.reads.clone()
    }
}

impl<S: Storage> Storage for CountingStorage<S> {
    fn read(&self, offset: i64, buf: &mut [u8]) -> Result<()> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.inner.read(offset, buf)
    }

    fn size(&self) -> Result<i64> {
        self.inner.size()
    }
}

/// Shared read counters for a tree opened via
/// [`TreeImage::open_counting`].
pub struct ReadCounters {
    pub node_reads: Arc<AtomicU64>,
    pub entry_reads: Arc<AtomicU64>,
}

impl ReadCounters {
    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.node_reads.load(Ordering::Relaxed),
            self.entry_reads.load(Ordering::Relaxed),
        )
    }
}

/// `count` map entries at virtual addresses `0, stride, 2 * stride, ...`,
/// physically contiguous from physical offset 0.
pub fn contiguous_map(count: usize, stride: i64) -> Vec<MapEntry> {
    (0..count)
        .map(|i| MapEntry::new(i as i64 * stride, i as i64 * stride))
        .collect()
}
