//! # Backing Storage Abstraction
//!
//! The bucket tree consumes exactly one thing from the outside world:
//! sized, offset-addressable byte reads. Two [`Storage`] instances are
//! injected at initialization, one holding the offset nodes and one
//! holding the entry sets, and the tree never assumes anything about what backs
//! them beyond the byte layouts it validates itself.
//!
//! ## Implementations
//!
//! - `[u8]`: any in-memory image (tests, indexes staged in RAM).
//! - [`SubStorage`]: a validated offset/length window over another
//!   storage. Index files typically pack the node region and the entry
//!   region back to back; callers carve one window for each.
//! - [`MmapStorage`]: a read-only memory-mapped file, for indexes served
//!   straight from disk.
//!
//! Blanket impls for `&S`, `Arc<S>`, and `Box<S>` let a single backing
//! file be shared between the two injected storages without copying.
//!
//! ## Error Model
//!
//! Reads fail only on out-of-bounds access or an underlying I/O fault.
//! Failures propagate to the tree, which wraps them as
//! `TreeError::Storage`; nothing is retried.

mod mmap;
mod sub;

pub use mmap::MmapStorage;
pub use sub::SubStorage;

use std::sync::Arc;

use eyre::{ensure, Result};

/// Sized, offset-addressable random read access.
pub trait Storage {
    /// Fills `buf` from `offset`. The read is exact: short reads are
    /// errors, not partial successes.
    fn read(&self, offset: i64, buf: &mut [u8]) -> Result<()>;

    /// Total addressable size in bytes.
    fn size(&self) -> Result<i64>;
}

impl<S: Storage + ?Sized> Storage for &S {
    fn read(&self, offset: i64, buf: &mut [u8]) -> Result<()> {
        (**self).read(offset, buf)
    }

    fn size(&self) -> Result<i64> {
        (**self).size()
    }
}

impl<S: Storage + ?Sized> Storage for Arc<S> {
    fn read(&self, offset: i64, buf: &mut [u8]) -> Result<()> {
        (**self).read(offset, buf)
    }

    fn size(&self) -> Result<i64> {
        (**self).size()
    }
}

impl<S: Storage + ?Sized> Storage for Box<S> {
    fn read(&self, offset: i64, buf: &mut [u8]) -> Result<()> {
        (**self).read(offset, buf)
    }

    fn size(&self) -> Result<i64> {
        (**self).size()
    }
}

impl Storage for [u8] {
    fn read(&self, offset: i64, buf: &mut [u8]) -> Result<()> {
        read_from_slice(self, offset, buf)
    }

    fn size(&self) -> Result<i64> {
        Ok(self.len() as i64)
    }
}

impl Storage for Vec<u8> {
    fn read(&self, offset: i64, buf: &mut [u8]) -> Result<()> {
        read_from_slice(self, offset, buf)
    }

    fn size(&self) -> Result<i64> {
        Ok(self.len() as i64)
    }
}

pub(crate) fn read_from_slice(data: &[u8], offset: i64, buf: &mut [u8]) -> Result<()> {
    ensure!(offset >= 0, "negative storage offset {}", offset);
    let offset = offset as usize;
    let end = offset
        .checked_add(buf.len())
        .ok_or_else(|| eyre::eyre!("storage read range overflows"))?;
    ensure!(
        end <= data.len(),
        "storage read out of bounds: [{}, {}) beyond size {}",
        offset,
        end,
        data.len()
    );
    buf.copy_from_slice(&data[offset..end]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_storage_reads_exact_ranges() {
        let data: Vec<u8> = (0..64).collect();
        let mut buf = [0u8; 8];

        data.read(8, &mut buf).unwrap();
        assert_eq!(buf, [8, 9, 10, 11, 12, 13, 14, 15]);
        assert_eq!(data.size().unwrap(), 64);
    }

    #[test]
    fn slice_storage_rejects_out_of_bounds() {
        let data = vec![0u8; 16];
        let mut buf = [0u8; 8];

        assert!(data.read(-1, &mut buf).is_err());
        assert!(data.read(9, &mut buf).is_err());
        assert!(data.read(16, &mut buf).is_err());
    }

    #[test]
    fn shared_storage_through_arc() {
        let data: Arc<Vec<u8>> = Arc::new((0..32).collect());
        let mut buf = [0u8; 4];

        let a = data.clone();
        let b = data;
        a.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0, 1, 2, 3]);
        b.read(28, &mut buf).unwrap();
        assert_eq!(buf, [28, 29, 30, 31]);
    }
}
