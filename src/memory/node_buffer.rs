//! Owned, aligned node buffer.

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::Arc;

use eyre::Result;

use super::{NodeAllocator, NODE_ALIGNMENT};
use crate::error::TreeError;

/// One node-sized allocation from an injected [`NodeAllocator`], released
/// on drop.
///
/// The buffer is 8-byte aligned (see [`NODE_ALIGNMENT`]) so node payloads
/// can be reinterpreted as arrays of 64-bit offsets. Contents start
/// zeroed when the allocator zeroes (the stock allocators do) and are
/// otherwise whatever the first storage read puts there.
pub struct NodeBuffer {
    allocator: Arc<dyn NodeAllocator>,
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: NodeBuffer exclusively owns its allocation; the only shared
// access it hands out is &[u8]. The allocator handle is Send + Sync by
// the NodeAllocator trait bound.
unsafe impl Send for NodeBuffer {}
// SAFETY: as above; &NodeBuffer exposes no interior mutability.
unsafe impl Sync for NodeBuffer {}

impl NodeBuffer {
    /// Allocates `size` bytes from `allocator` with node alignment.
    ///
    /// Fails with [`TreeError::OutOfMemory`] when the allocator refuses.
    pub fn allocate(allocator: Arc<dyn NodeAllocator>, size: usize) -> Result<Self> {
        debug_assert!(size > 0);

        let layout = Layout::from_size_align(size, NODE_ALIGNMENT)
            .map_err(|_| TreeError::InvalidSize {
                reason: "node buffer size overflows layout",
            })?;
        let ptr = allocator
            .allocate(layout)
            .ok_or(TreeError::OutOfMemory { size })?;
        debug_assert_eq!(ptr.as_ptr() as usize % NODE_ALIGNMENT, 0);

        Ok(Self {
            allocator,
            ptr,
            layout,
        })
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for layout.size() bytes for the lifetime of
        // self, and no &mut exists while this shared borrow is alive.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr is valid for layout.size() bytes, and &mut self
        // guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }

    pub fn fill_zero(&mut self) {
        self.as_mut_slice().fill(0);
    }
}

impl Drop for NodeBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr came from this allocator with this layout, and is
        // never used again after drop.
        unsafe { self.allocator.deallocate(self.ptr, self.layout) };
    }
}

impl std::fmt::Debug for NodeBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeBuffer")
            .field("len", &self.layout.size())
            .finish()
    }
}
