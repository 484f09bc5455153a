//! Offset/length window over another storage.

use eyre::{ensure, Result};

use super::Storage;

/// A validated `[offset, offset + size)` window of another [`Storage`].
///
/// Index files commonly pack the node region and the entry region into one
/// file; a `SubStorage` over each region turns that single file into the
/// two storages the tree expects. Reads are translated and re-bounds-
/// checked, so a window can never escape its range even if the inner
/// storage is larger.
#[derive(Debug, Clone)]
pub struct SubStorage<S> {
    inner: S,
    offset: i64,
    size: i64,
}

impl<S: Storage> SubStorage<S> {
    pub fn new(inner: S, offset: i64, size: i64) -> Result<Self> {
        ensure!(offset >= 0, "negative substorage offset {}", offset);
        ensure!(size >= 0, "negative substorage size {}", size);

        let inner_size = inner.size()?;
        let end = offset
            .checked_add(size)
            .ok_or_else(|| eyre::eyre!("substorage range overflows"))?;
        ensure!(
            end <= inner_size,
            "substorage [{}, {}) beyond inner storage size {}",
            offset,
            end,
            inner_size
        );

        Ok(Self {
            inner,
            offset,
            size,
        })
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Storage> Storage for SubStorage<S> {
    fn read(&self, offset: i64, buf: &mut [u8]) -> Result<()> {
        ensure!(offset >= 0, "negative storage offset {}", offset);
        let end = offset
            .checked_add(buf.len() as i64)
            .ok_or_else(|| eyre::eyre!("storage read range overflows"))?;
        ensure!(
            end <= self.size,
            "substorage read out of bounds: [{}, {}) beyond size {}",
            offset,
            end,
            self.size
        );
        self.inner.read(self.offset + offset, buf)
    }

    fn size(&self) -> Result<i64> {
        Ok(self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_translates_reads() {
        let data: Vec<u8> = (0..64).collect();
        let window = SubStorage::new(&data[..], 16, 32).unwrap();

        let mut buf = [0u8; 4];
        window.read(0, &mut buf).unwrap();
        assert_eq!(buf, [16, 17, 18, 19]);

        window.read(28, &mut buf).unwrap();
        assert_eq!(buf, [44, 45, 46, 47]);
        assert_eq!(window.size().unwrap(), 32);
    }

    #[test]
    fn window_cannot_escape_its_range() {
        let data: Vec<u8> = (0..64).collect();
        let window = SubStorage::new(&data[..], 16, 32).unwrap();

        let mut buf = [0u8; 8];
        assert!(window.read(32, &mut buf).is_err());
        assert!(window.read(25, &mut buf).is_err());
        assert!(window.read(-1, &mut buf).is_err());
    }

    #[test]
    fn construction_validates_against_inner_size() {
        let data = vec![0u8; 64];
        assert!(SubStorage::new(&data[..], 0, 64).is_ok());
        assert!(SubStorage::new(&data[..], 32, 33).is_err());
        assert!(SubStorage::new(&data[..], -1, 8).is_err());
        assert!(SubStorage::new(&data[..], 8, -1).is_err());
    }
}
