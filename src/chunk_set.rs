//! The ordered, address-keyed set of free chunks (§4.1).
//!
//! Each tier's free-list and the pool-wide under-reclaim set are instances
//! of [`ChunkSet`]. The ordered-set node is embedded directly inside the
//! free chunk's own bytes (right after the externally-reserved header) so
//! that tracking a free chunk costs no separate allocation — the same
//! trick the teacher's `frame_allocator` crate uses `intrusive_collections`
//! for, except there the tree holds heap-boxed range descriptors and here
//! it holds pointers straight into raw page memory.

use core::ops::Bound;
use core::ptr;

use intrusive_collections::{intrusive_adapter, rbtree::RBTree, KeyAdapter, RBTreeLink, UnsafeRef};

use crate::config::HEADER_RESERVED_BYTES;

/// The node written into a free chunk's bytes. Its address *is* the
/// chunk's address plus [`HEADER_RESERVED_BYTES`]; we store the chunk's
/// address redundantly so lookups don't need to re-derive it via pointer
/// arithmetic on every comparison.
#[repr(C)]
pub(crate) struct ChunkNode {
    link: RBTreeLink,
    addr: usize,
}

intrusive_adapter!(pub(crate) ChunkNodeAdapter = UnsafeRef<ChunkNode>: ChunkNode { link: RBTreeLink });

impl<'a> KeyAdapter<'a> for ChunkNodeAdapter {
    type Key = usize;
    fn get_key(&self, node: &'a ChunkNode) -> usize {
        node.addr
    }
}

/// Returns the address at which a chunk starting at `chunk_addr` stores its
/// embedded free-list node.
fn node_addr(chunk_addr: usize) -> usize {
    chunk_addr + HEADER_RESERVED_BYTES
}

/// An ordered set of free chunk addresses, backed by an intrusive red-black
/// tree whose nodes live inside the chunks themselves.
///
/// # Safety
///
/// Every address ever inserted must name a chunk that (a) is at least
/// `HEADER_RESERVED_BYTES + size_of::<ChunkNode>()` bytes long, and (b) is
/// not concurrently accessed by anything else -- both of which the pool
/// guarantees by only calling these methods while holding its mutex, and
/// only for chunks it owns.
pub(crate) struct ChunkSet {
    tree: RBTree<ChunkNodeAdapter>,
}

// SAFETY: a `ChunkNode` is only ever reached through a `ChunkSet`, and every
// `ChunkSet` a `Pool` owns is only ever touched while the pool's mutex is
// held, so sharing these across threads is sound even though the embedded
// raw pointers aren't `Send`/`Sync` by default.
unsafe impl Send for ChunkNode {}
unsafe impl Sync for ChunkNode {}
unsafe impl Send for ChunkSet {}
unsafe impl Sync for ChunkSet {}

impl ChunkSet {
    pub(crate) fn new() -> Self {
        ChunkSet { tree: RBTree::new(ChunkNodeAdapter::new()) }
    }

    /// Stamps a fresh node into `chunk_addr`'s reserved region and inserts
    /// it into the set. Panics if `chunk_addr` is already present -- per
    /// §4.1, a duplicate insert indicates pool corruption.
    ///
    /// # Safety
    /// `chunk_addr` must point to a live chunk not currently owned by any
    /// `ChunkSet` (including this one).
    pub(crate) unsafe fn insert(&mut self, chunk_addr: usize) {
        if self.contains(chunk_addr) {
            log::error!(
                "ztier: chunk {:#x} inserted into a free-list it is already a member of",
                chunk_addr
            );
        }
        assert!(
            !self.contains(chunk_addr),
            "ztier: chunk {:#x} inserted into a free-list it is already a member of",
            chunk_addr
        );
        let ptr = node_addr(chunk_addr) as *mut ChunkNode;
        ptr::write(ptr, ChunkNode { link: RBTreeLink::new(), addr: chunk_addr });
        self.tree.insert(UnsafeRef::from_raw(ptr));
    }

    /// Removes `chunk_addr` from the set, returning whether it was present.
    pub(crate) fn remove(&mut self, chunk_addr: usize) -> bool {
        let mut cursor = self.tree.find_mut(&chunk_addr);
        if cursor.is_null() {
            return false;
        }
        cursor.remove();
        true
    }

    pub(crate) fn contains(&self, chunk_addr: usize) -> bool {
        !self.tree.find(&chunk_addr).is_null()
    }

    pub(crate) fn first(&self) -> Option<usize> {
        self.tree.front().get().map(|n| n.addr)
    }

    pub(crate) fn last(&self) -> Option<usize> {
        self.tree.back().get().map(|n| n.addr)
    }

    /// The least element `>= chunk_addr`.
    pub(crate) fn ceil(&self, chunk_addr: usize) -> Option<usize> {
        self.tree
            .lower_bound(Bound::Included(&chunk_addr))
            .get()
            .map(|n| n.addr)
    }

    /// The greatest element `<= chunk_addr`.
    pub(crate) fn floor(&self, chunk_addr: usize) -> Option<usize> {
        self.tree
            .upper_bound(Bound::Included(&chunk_addr))
            .get()
            .map(|n| n.addr)
    }

    /// Removes and returns the lowest-addressed chunk, if any.
    pub(crate) fn pop_first(&mut self) -> Option<usize> {
        let mut cursor = self.tree.front_mut();
        let addr = cursor.get().map(|n| n.addr)?;
        cursor.remove();
        Some(addr)
    }

    /// Moves every chunk `e` with `lo <= e < hi` out of `self`. If `to` is
    /// `Some`, the chunks are re-inserted there; otherwise they are
    /// discarded (their backing memory is assumed to be going away, e.g.
    /// because the owning page is being released).
    ///
    /// # Safety
    /// When `to` is `Some`, every moved address must be a valid chunk not
    /// already present in `to`.
    pub(crate) unsafe fn move_range(
        &mut self,
        mut to: Option<&mut ChunkSet>,
        lo: usize,
        hi: usize,
    ) -> usize {
        let mut cursor = self.tree.lower_bound_mut(Bound::Included(&lo));
        let mut moved = 0usize;
        loop {
            let addr = match cursor.get() {
                Some(n) if n.addr < hi => n.addr,
                _ => break,
            };
            cursor.remove();
            if let Some(ref mut to) = to {
                to.insert(addr);
            }
            moved += 1;
        }
        moved
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.tree.iter().count()
    }

    #[cfg(test)]
    pub(crate) fn is_sorted_no_dups(&self) -> bool {
        let mut prev: Option<usize> = None;
        for n in self.tree.iter() {
            if let Some(p) = prev {
                if p >= n.addr {
                    return false;
                }
            }
            prev = Some(n.addr);
        }
        true
    }
}
