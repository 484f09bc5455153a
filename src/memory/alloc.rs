//! Allocator seam and the two stock implementations.

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Alignment of every node buffer. Node payloads are read as arrays of
/// little-endian `i64` offsets, so buffers must be at least 8-byte aligned.
pub const NODE_ALIGNMENT: usize = std::mem::align_of::<i64>();

/// Source of node-sized buffers for trees and visitors.
///
/// `allocate` returns `None` instead of panicking or aborting when the
/// request cannot be satisfied; the caller turns that into
/// `TreeError::OutOfMemory`.
pub trait NodeAllocator: Send + Sync {
    /// Allocates a buffer for `layout`, or `None` if the request cannot be
    /// satisfied. The returned pointer honors `layout.align()`.
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Releases a buffer previously returned by [`allocate`](Self::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` on the same allocator
    /// with the same `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// [`NodeAllocator`] backed by the global allocator.
///
/// Buffers are zero-initialized: unused tail space in a node must never
/// leak prior heap contents into anything derived from the buffer.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalNodeAllocator;

impl NodeAllocator for GlobalNodeAllocator {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.size() == 0 {
            return None;
        }
        // SAFETY: layout has non-zero size, checked above.
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        NonNull::new(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: per the trait contract, ptr was returned by alloc_zeroed
        // with this exact layout.
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
    }
}

/// Hard-limit wrapper around another [`NodeAllocator`].
///
/// Accounting is by requested size. Refusal is immediate: an allocation
/// that would push usage past the limit returns `None` without touching
/// the inner allocator.
pub struct BudgetAllocator {
    inner: Arc<dyn NodeAllocator>,
    limit: usize,
    used: AtomicUsize,
}

impl BudgetAllocator {
    pub fn new(inner: Arc<dyn NodeAllocator>, limit: usize) -> Self {
        Self {
            inner,
            limit,
            used: AtomicUsize::new(0),
        }
    }

    /// Budget-limited view over the global allocator.
    pub fn with_limit(limit: usize) -> Self {
        Self::new(Arc::new(GlobalNodeAllocator), limit)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    fn try_reserve(&self, bytes: usize) -> bool {
        self.used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                let total = used.checked_add(bytes)?;
                (total <= self.limit).then_some(total)
            })
            .is_ok()
    }
}

impl NodeAllocator for BudgetAllocator {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        if !self.try_reserve(layout.size()) {
            return None;
        }
        let ptr = self.inner.allocate(layout);
        if ptr.is_none() {
            self.used.fetch_sub(layout.size(), Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: forwarded verbatim; the trait contract holds for inner.
        unsafe { self.inner.deallocate(ptr, layout) };
        self.used.fetch_sub(layout.size(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_layout(size: usize) -> Layout {
        Layout::from_size_align(size, NODE_ALIGNMENT).unwrap()
    }

    #[test]
    fn global_allocator_zeroes_and_aligns() {
        let allocator = GlobalNodeAllocator;
        let layout = node_layout(1024);

        let ptr = allocator.allocate(layout).unwrap();
        assert_eq!(ptr.as_ptr() as usize % NODE_ALIGNMENT, 0);

        // SAFETY: freshly allocated 1024-byte buffer.
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 1024) };
        assert!(bytes.iter().all(|&b| b == 0));

        // SAFETY: allocated above with the same layout.
        unsafe { allocator.deallocate(ptr, layout) };
    }

    #[test]
    fn budget_refuses_past_limit() {
        let allocator = BudgetAllocator::with_limit(2048);
        let layout = node_layout(1024);

        let a = allocator.allocate(layout).unwrap();
        let b = allocator.allocate(layout).unwrap();
        assert_eq!(allocator.used(), 2048);
        assert!(allocator.allocate(layout).is_none());

        // SAFETY: both allocated above with `layout`.
        unsafe {
            allocator.deallocate(a, layout);
            allocator.deallocate(b, layout);
        }
        assert_eq!(allocator.used(), 0);
        assert!(allocator.allocate(layout).is_some());
    }

    #[test]
    fn budget_releases_reservation_on_inner_failure() {
        struct Refusing;
        impl NodeAllocator for Refusing {
            fn allocate(&self, _: Layout) -> Option<NonNull<u8>> {
                None
            }
            unsafe fn deallocate(&self, _: NonNull<u8>, _: Layout) {
                unreachable!("never allocates");
            }
        }

        let allocator = BudgetAllocator::new(Arc::new(Refusing), 4096);
        assert!(allocator.allocate(node_layout(1024)).is_none());
        assert_eq!(allocator.used(), 0);
    }
}
