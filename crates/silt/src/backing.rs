//! Byte-region backings: shared anonymous memory and mapped files.
//!
//! The arena itself is backing-agnostic; the variants here differ only in
//! who owns the bytes and whether writes are permitted. File mappings are
//! created by the caller (with `memmap2`) and handed over; this crate
//! never opens or maps files itself.

use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;
use std::sync::Arc;

use memmap2::{Mmap, MmapMut};

use crate::layout::ALLOC_ALIGNMENT;

/// A fixed-size, zero-initialized, heap-allocated byte region that can be
/// shared by several arenas at once.
///
/// Cloning is cheap (`Arc`); every clone refers to the same bytes. This
/// models in-process what a shared mapping gives separate processes:
/// several allocators attached to one region, all writing concurrently.
/// The bytes are freed when the last clone drops.
#[derive(Clone)]
pub struct SharedMem {
    inner: Arc<MemInner>,
}

struct MemInner {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

// SAFETY: the region is plain bytes with no thread affinity; all shared
// mutation of it goes through atomics in the arena. The raw pointer is
// owned by this struct and freed exactly once on drop.
unsafe impl Send for MemInner {}
// SAFETY: see above.
unsafe impl Sync for MemInner {}

impl SharedMem {
    /// Allocate a zeroed region of `len` bytes, aligned for a region header.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero or exceeds `isize::MAX`.
    pub fn zeroed(len: usize) -> Self {
        assert!(len > 0, "SharedMem length must be non-zero");
        let layout = Layout::from_size_align(len, ALLOC_ALIGNMENT as usize)
            .expect("region length exceeds isize::MAX");
        // SAFETY: layout has non-zero size (asserted above).
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            handle_alloc_error(layout)
        };
        Self {
            inner: Arc::new(MemInner { ptr, len, layout }),
        }
    }

    /// Length of the region in bytes.
    pub fn len(&self) -> usize {
        self.inner.len
    }

    /// Whether the region has zero length (never true for a constructed one).
    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Raw base pointer of the region.
    ///
    /// The region is shared mutable state, and this accessor lets its owner
    /// act as "another process": dumping the bytes for persistence, or
    /// deliberately mangling them to exercise corruption handling. Writes
    /// through this pointer race with attached arenas; use atomic accesses
    /// for any byte an arena may touch concurrently.
    pub fn as_ptr(&self) -> *mut u8 {
        self.inner.ptr.as_ptr()
    }
}

impl Drop for MemInner {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by alloc_zeroed with this exact layout
        // and has not been freed (MemInner is dropped once).
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// Who owns the bytes underneath an arena and whether they may be written.
pub(crate) enum Backing {
    /// Shared anonymous memory; writability is decided by the constructor.
    Shared(SharedMem),
    /// A writable file mapping handed over by the caller.
    MappedRw(MmapMut),
    /// A read-only file mapping handed over by the caller.
    MappedRo(Mmap),
}

impl Backing {
    /// Base pointer of the region.
    ///
    /// For the read-only variant the pointer is only ever read through;
    /// the arena's writability gate enforces that.
    pub(crate) fn base_mut(&mut self) -> *mut u8 {
        match self {
            Backing::Shared(mem) => mem.as_ptr(),
            Backing::MappedRw(map) => map.as_mut_ptr(),
            Backing::MappedRo(map) => map.as_ptr().cast_mut(),
        }
    }

    /// Length of the region in bytes.
    pub(crate) fn len(&self) -> usize {
        match self {
            Backing::Shared(mem) => mem.len(),
            Backing::MappedRw(map) => map.len(),
            Backing::MappedRo(map) => map.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_region_is_all_zero() {
        let mem = SharedMem::zeroed(4096);
        assert_eq!(mem.len(), 4096);
        // SAFETY: the region is exclusively owned here and 4096 bytes long.
        let bytes = unsafe { std::slice::from_raw_parts(mem.as_ptr(), mem.len()) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn base_is_aligned_for_the_header() {
        let mem = SharedMem::zeroed(1 << 12);
        assert_eq!(mem.as_ptr() as usize % ALLOC_ALIGNMENT as usize, 0);
    }

    #[test]
    fn clones_share_the_same_bytes() {
        let a = SharedMem::zeroed(64);
        let b = a.clone();
        assert_eq!(a.as_ptr(), b.as_ptr());
        // SAFETY: single-threaded test; both clones view the same byte.
        unsafe {
            a.as_ptr().write(0xAB);
            assert_eq!(b.as_ptr().read(), 0xAB);
        }
    }

    #[test]
    #[should_panic(expected = "length must be non-zero")]
    fn zero_length_region_is_rejected() {
        SharedMem::zeroed(0);
    }
}
