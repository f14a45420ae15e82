//! The backing page-frame supplier (`alloc_page`/`free_page`), modeled as a
//! trait boundary rather than a concrete physical-memory manager, since the
//! real collaborator is explicitly out of scope (§1).

use crate::config::PAGE_SIZE;
use crate::error::AllocFlags;

/// A single backing page handed to the pool by a [`PageSource`].
///
/// This is just the page's base address; ztier treats it as opaque raw
/// memory and is solely responsible for deciding how to split it into
/// chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawPage {
    pub addr: usize,
}

/// The page-frame collaborator the pool acquires and releases whole pages
/// through. Implementations must hand out pages that are directly
/// addressable (never satisfying [`AllocFlags::HIGHMEM`]) and exactly
/// [`PAGE_SIZE`] bytes, aligned to `PAGE_SIZE`.
///
/// `alloc_page` may block; the pool always calls it with its mutex
/// released (§5).
pub trait PageSource: Send + Sync {
    /// Acquires one fresh backing page. `flags` are the opaque bits from
    /// the triggering `alloc` call's [`AllocFlags`], forwarded verbatim.
    fn alloc_page(&self, flags: AllocFlags) -> Option<RawPage>;

    /// Returns a page previously obtained from `alloc_page` back to the
    /// supplier. The pool guarantees every chunk of `page` has already
    /// been accounted for (§4.6) before calling this.
    fn free_page(&self, page: RawPage);
}

/// A [`PageSource`] that services pages from the host's heap allocator.
/// Exists purely so this crate's own tests can exercise every pool
/// operation without a real physical-frame allocator, mirroring how the
/// teacher's `frame_allocator` crate is driven in tests by a
/// `PhysicalMemoryArea` list rather than a live bootloader memory map.
pub struct HeapPageSource;

impl HeapPageSource {
    fn layout() -> core::alloc::Layout {
        core::alloc::Layout::from_size_align(PAGE_SIZE, PAGE_SIZE)
            .expect("PAGE_SIZE is a valid size/alignment for Layout")
    }
}

impl PageSource for HeapPageSource {
    fn alloc_page(&self, _flags: AllocFlags) -> Option<RawPage> {
        // SAFETY: `layout()` is non-zero-sized and well-aligned.
        let ptr = unsafe { alloc::alloc::alloc(Self::layout()) };
        if ptr.is_null() {
            None
        } else {
            Some(RawPage { addr: ptr as usize })
        }
    }

    fn free_page(&self, page: RawPage) {
        // SAFETY: `page.addr` was returned by a matching `alloc_page` call
        // on this same source, using the same layout, and the pool has
        // finished using it.
        unsafe { alloc::alloc::dealloc(page.addr as *mut u8, Self::layout()) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_page_source_round_trips() {
        let src = HeapPageSource;
        let page = src.alloc_page(AllocFlags::empty()).expect("allocation should succeed");
        assert_eq!(page.addr % PAGE_SIZE, 0);
        src.free_page(page);
    }
}
