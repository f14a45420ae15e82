//! Per-page metadata and the per-tier page LRU (§3 "Page", §4.3, §4.7).
//!
//! A kernel implementation of ztier stashes `tier` and `reclaim` directly
//! on the `struct page` the physical-frame allocator already maintains.
//! This crate has no such descriptor to hijack (its page-frame supplier is
//! an opaque [`crate::PageSource`]), so -- per the design note in §9 --
//! it keeps a side table instead: `Pool` owns a `BTreeMap<addr, Box<PageMeta>>`,
//! and each tier's page-LRU is an intrusive, non-owning linked list of
//! pointers into those same boxes.

use alloc::boxed::Box;
use core::ptr::NonNull;

use intrusive_collections::{intrusive_adapter, LinkedList, LinkedListLink, UnsafeRef};

/// Metadata for one backing page owned by the pool.
pub(crate) struct PageMeta {
    link: LinkedListLink,
    pub(crate) addr: usize,
    pub(crate) tier: usize,
    pub(crate) reclaim: bool,
}

intrusive_adapter!(pub(crate) PageMetaAdapter = UnsafeRef<PageMeta>: PageMeta { link: LinkedListLink });

// SAFETY: `PageMeta` is only reachable through the pool's side table and
// per-tier LRU lists, both of which are only mutated while the pool's
// mutex is held. See the matching comment in `chunk_set.rs`.
unsafe impl Send for PageMeta {}
unsafe impl Sync for PageMeta {}
unsafe impl Send for LinkedList<PageMetaAdapter> {}
unsafe impl Sync for LinkedList<PageMetaAdapter> {}

/// One tier's page-LRU: most-recently-split page at the front, least
/// recently split at the back. Reclaim walks it tail-first (§4.7).
pub(crate) type PageLru = LinkedList<PageMetaAdapter>;

impl PageMeta {
    pub(crate) fn new(addr: usize, tier: usize) -> Box<PageMeta> {
        Box::new(PageMeta { link: LinkedListLink::new(), addr, tier, reclaim: false })
    }
}

/// Builds a non-owning intrusive handle to a `PageMeta` still owned by the
/// pool's side table. Only valid as long as the `Box` it points into is
/// alive and not moved (a `Box`'s heap address never moves).
///
/// # Safety
/// `meta` must point to a live `PageMeta` that is not already linked into
/// the list this handle is about to be pushed into.
pub(crate) unsafe fn handle_of(meta: &Box<PageMeta>) -> UnsafeRef<PageMeta> {
    let ptr: NonNull<PageMeta> = NonNull::from(meta.as_ref());
    UnsafeRef::from_raw(ptr.as_ptr())
}
