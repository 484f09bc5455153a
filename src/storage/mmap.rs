//! Read-only memory-mapped file storage.
//!
//! Bucket tree indexes are immutable once built, which makes them a
//! natural fit for serving straight out of a shared mapping: reads are
//! pointer arithmetic plus a `copy_from_slice` into the caller's node
//! buffer, and the OS page cache does the rest.
//!
//! The mapping is strictly read-only (`memmap2::Mmap`); growing or
//! rewriting an index in place is not a thing this crate supports.

use std::fs::File;
use std::path::Path;

use eyre::{Result, WrapErr};
use memmap2::Mmap;

use super::{read_from_slice, Storage};

/// Read-only mapped index file.
#[derive(Debug)]
pub struct MmapStorage {
    mmap: Mmap,
}

impl MmapStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = File::open(path)
            .wrap_err_with(|| format!("failed to open index file '{}'", path.display()))?;

        // SAFETY: Mmap::map is unsafe because the file could be modified
        // externally while mapped, which would be undefined behavior. This
        // is safe for our use because:
        // 1. The mapping is read-only; this process never writes it.
        // 2. Index files are immutable artifacts of an offline build; they
        //    are replaced atomically, never rewritten in place.
        // 3. The mmap lifetime is tied to MmapStorage, preventing
        //    use-after-unmap.
        let mmap = unsafe {
            Mmap::map(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self { mmap })
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }
}

impl Storage for MmapStorage {
    fn read(&self, offset: i64, buf: &mut [u8]) -> Result<()> {
        read_from_slice(&self.mmap, offset, buf)
    }

    fn size(&self) -> Result<i64> {
        Ok(self.mmap.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn maps_and_reads_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bktr");

        let payload: Vec<u8> = (0u8..128).collect();
        let mut file = File::create(&path).unwrap();
        file.write_all(&payload).unwrap();
        file.sync_all().unwrap();
        drop(file);

        let storage = MmapStorage::open(&path).unwrap();
        assert_eq!(storage.size().unwrap(), 128);

        let mut buf = [0u8; 16];
        storage.read(32, &mut buf).unwrap();
        assert_eq!(&buf[..], &payload[32..48]);
    }

    #[test]
    fn rejects_reads_past_the_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.bktr");
        std::fs::write(&path, vec![0u8; 64]).unwrap();

        let storage = MmapStorage::open(&path).unwrap();
        let mut buf = [0u8; 16];
        assert!(storage.read(56, &mut buf).is_err());
    }

    #[test]
    fn missing_file_is_an_error_with_path_context() {
        let err = MmapStorage::open("/nonexistent/index.bktr").unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/index.bktr"));
    }
}
