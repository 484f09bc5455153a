//! # On-Disk Descriptors
//!
//! Two fixed 16-byte descriptors make up the entire metadata surface of a
//! bucket tree:
//!
//! ```text
//! Header (16 bytes, one per tree)
//! Offset  Size  Field        Description
//! ------  ----  -----------  ----------------------------------------
//! 0       4     magic        b"BKTR"
//! 4       4     version      Format version, currently 1
//! 8       4     entry_count  Total entries in the tree (>= 0)
//! 12      4     reserved     Ignored on read
//!
//! NodeHeader (16 bytes, at the start of every node and entry set)
//! Offset  Size  Field        Description
//! ------  ----  -----------  ----------------------------------------
//! 0       4     index        Zero-based position within the level
//! 4       4     count        Valid payload items in this node
//! 8       8     offset       Smallest virtual address covered (entry
//!                            sets) / first key (offset nodes)
//! ```
//!
//! Both structs are parsed in place with zerocopy: every multi-byte field
//! is little-endian and the layout is pinned by compile-time size asserts.
//! Everything on disk is untrusted; [`Header::verify`] and
//! [`NodeHeader::verify`] are the single place each field is checked, and
//! a failed check refuses the tree rather than limping on.
//!
//! `reserved` is deliberately not checked: indexes produced by older build
//! tools may carry garbage there.

use eyre::Result;
use zerocopy::little_endian::{I32, I64, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::TreeError;

/// The four magic bytes opening every serialized tree header.
pub const BKTR_MAGIC: [u8; 4] = *b"BKTR";

/// Current (and only) on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Serialized size of [`Header`].
pub const HEADER_SIZE: usize = 16;

/// Serialized size of [`NodeHeader`].
pub const NODE_HEADER_SIZE: usize = 16;

/// Top-level tree descriptor.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct Header {
    magic: [u8; 4],
    version: U32,
    entry_count: I32,
    reserved: [u8; 4],
}

const _: () = assert!(std::mem::size_of::<Header>() == HEADER_SIZE);

impl Header {
    /// Builds a fresh header for `entry_count` entries.
    pub fn format(entry_count: i32) -> Self {
        debug_assert!(entry_count >= 0);
        Self {
            magic: BKTR_MAGIC,
            version: U32::new(FORMAT_VERSION),
            entry_count: I32::new(entry_count),
            reserved: [0u8; 4],
        }
    }

    /// Parses a header from the leading bytes of `bytes` without copying.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(TreeError::InvalidHeader {
                reason: "buffer too small for header",
            }
            .into());
        }
        Self::ref_from_bytes(&bytes[..HEADER_SIZE]).map_err(|_| {
            TreeError::InvalidHeader {
                reason: "unparseable header bytes",
            }
            .into()
        })
    }

    /// Checks magic, version, and entry count. `reserved` is ignored.
    pub fn verify(&self) -> Result<()> {
        if self.magic != BKTR_MAGIC {
            return Err(TreeError::InvalidHeader {
                reason: "bad magic",
            }
            .into());
        }
        if self.version.get() != FORMAT_VERSION {
            return Err(TreeError::InvalidHeader {
                reason: "unsupported version",
            }
            .into());
        }
        if self.entry_count.get() < 0 {
            return Err(TreeError::InvalidHeader {
                reason: "negative entry count",
            }
            .into());
        }
        Ok(())
    }

    pub fn entry_count(&self) -> i32 {
        self.entry_count.get()
    }

    pub fn version(&self) -> u32 {
        self.version.get()
    }
}

/// Per-node descriptor at the start of every offset node and entry set.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct NodeHeader {
    index: I32,
    count: I32,
    offset: I64,
}

const _: () = assert!(std::mem::size_of::<NodeHeader>() == NODE_HEADER_SIZE);

impl NodeHeader {
    pub fn new(index: i32, count: i32, offset: i64) -> Self {
        Self {
            index: I32::new(index),
            count: I32::new(count),
            offset: I64::new(offset),
        }
    }

    /// Parses a node header from the leading bytes of a node without
    /// copying.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        if bytes.len() < NODE_HEADER_SIZE {
            return Err(TreeError::InvalidNodeHeader {
                index: -1,
                reason: "buffer too small for node header",
            }
            .into());
        }
        Self::ref_from_bytes(&bytes[..NODE_HEADER_SIZE]).map_err(|_| {
            TreeError::InvalidNodeHeader {
                index: -1,
                reason: "unparseable node header bytes",
            }
            .into()
        })
    }

    /// Verifies this header against its expected position and capacity.
    ///
    /// `item_size` is the payload item width: the tree's entry size for
    /// entry sets, 8 for offset nodes (whose payloads are 64-bit keys).
    pub fn verify(&self, node_index: i32, node_size: usize, item_size: usize) -> Result<()> {
        debug_assert!(item_size > 0);
        debug_assert!(node_size >= NODE_HEADER_SIZE + item_size);

        if self.index.get() != node_index {
            return Err(TreeError::InvalidNodeHeader {
                index: node_index,
                reason: "index does not match node position",
            }
            .into());
        }

        let max_count = ((node_size - NODE_HEADER_SIZE) / item_size) as i32;
        let count = self.count.get();
        if count <= 0 || count > max_count {
            return Err(TreeError::InvalidNodeHeader {
                index: node_index,
                reason: "count exceeds node capacity",
            }
            .into());
        }

        if self.offset.get() < 0 {
            return Err(TreeError::InvalidNodeHeader {
                index: node_index,
                reason: "negative offset",
            }
            .into());
        }

        Ok(())
    }

    pub fn index(&self) -> i32 {
        self.index.get()
    }

    pub fn count(&self) -> i32 {
        self.count.get()
    }

    pub fn offset(&self) -> i64 {
        self.offset.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::IntoBytes;

    fn kind(err: &eyre::Report) -> &TreeError {
        err.downcast_ref::<TreeError>().expect("typed root cause")
    }

    #[test]
    fn header_size_is_16() {
        assert_eq!(std::mem::size_of::<Header>(), 16);
        assert_eq!(std::mem::size_of::<NodeHeader>(), 16);
    }

    #[test]
    fn header_roundtrip() {
        let header = Header::format(1023);
        let bytes = header.as_bytes().to_vec();

        let parsed = Header::from_bytes(&bytes).unwrap();
        parsed.verify().unwrap();
        assert_eq!(parsed.entry_count(), 1023);
        assert_eq!(parsed.version(), FORMAT_VERSION);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut bytes = Header::format(1).as_bytes().to_vec();
        bytes[0] = b'X';

        let err = Header::from_bytes(&bytes).unwrap().verify().unwrap_err();
        assert!(matches!(
            kind(&err),
            TreeError::InvalidHeader { reason: "bad magic" }
        ));
    }

    #[test]
    fn header_rejects_wrong_version() {
        let mut bytes = Header::format(1).as_bytes().to_vec();
        bytes[4] = 2;

        let err = Header::from_bytes(&bytes).unwrap().verify().unwrap_err();
        assert!(matches!(kind(&err), TreeError::InvalidHeader { .. }));
    }

    #[test]
    fn header_rejects_negative_entry_count() {
        let mut bytes = Header::format(0).as_bytes().to_vec();
        bytes[8..12].copy_from_slice(&(-1i32).to_le_bytes());

        let err = Header::from_bytes(&bytes).unwrap().verify().unwrap_err();
        assert!(matches!(kind(&err), TreeError::InvalidHeader { .. }));
    }

    #[test]
    fn header_ignores_reserved_bytes() {
        let mut bytes = Header::format(7).as_bytes().to_vec();
        bytes[12..16].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);

        Header::from_bytes(&bytes).unwrap().verify().unwrap();
    }

    #[test]
    fn node_header_verifies_position_and_capacity() {
        // 16384-byte node of 16-byte entries: at most 1023 of them.
        let header = NodeHeader::new(3, 1023, 4096);
        header.verify(3, 16384, 16).unwrap();

        let err = header.verify(4, 16384, 16).unwrap_err();
        assert!(matches!(
            kind(&err),
            TreeError::InvalidNodeHeader { index: 4, .. }
        ));

        let overfull = NodeHeader::new(3, 1024, 4096);
        let err = overfull.verify(3, 16384, 16).unwrap_err();
        assert!(matches!(kind(&err), TreeError::InvalidNodeHeader { .. }));

        let empty = NodeHeader::new(3, 0, 4096);
        assert!(empty.verify(3, 16384, 16).is_err());

        let negative = NodeHeader::new(3, 5, -1);
        assert!(negative.verify(3, 16384, 16).is_err());
    }

    #[test]
    fn node_header_offset_capacity_for_offset_nodes() {
        // The same node holds 2047 keys when the payload is 64-bit offsets.
        let header = NodeHeader::new(0, 2047, 0);
        header.verify(0, 16384, 8).unwrap();
        assert!(NodeHeader::new(0, 2048, 0).verify(0, 16384, 8).is_err());
    }
}
