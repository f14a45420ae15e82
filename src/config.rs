//! Compile-time layout constants and the tier table.
//!
//! Mirrors the role of a kernel's `kernel_config::memory` module, but kept
//! inside this crate: `ztier` is standalone and has no surrounding build
//! system to source `PAGE_SIZE` from.

use core::mem::size_of;

use crate::chunk_set::ChunkNode;

/// Size in bytes of a backing page supplied by a [`crate::PageSource`].
///
/// ztier does not itself manage physical memory, so this is just the unit
/// the allocator splits into chunks; a real embedding's page-frame supplier
/// is expected to hand out pages of exactly this size.
pub const PAGE_SIZE: usize = 4096;

/// Bytes at the front of every chunk reserved for an externally-defined
/// header (e.g. a swap-entry header written by the compressor). ztier never
/// reads or writes these bytes itself; it only skips them when placing the
/// embedded free-list node.
pub const HEADER_RESERVED_BYTES: usize = size_of::<u64>();

/// A fixed, compile-time-sized table of tier chunk sizes, ordered from
/// largest (`tiers[0]`) to smallest (`tiers[T - 1]`).
///
/// `T` is a const generic so that an embedder can lay out however many
/// tiers it wants (the historical default is three: 2048, 1024, 256 bytes),
/// without ztier hard-coding a single machine-wide tier count the way a
/// kernel's fixed page-size constants do.
#[derive(Debug, Clone, Copy)]
pub struct TierTable<const T: usize> {
    sizes: [usize; T],
}

impl<const T: usize> TierTable<T> {
    /// The historical ztier tier sizes: 2KB, 1KB, 256B.
    pub const DEFAULT_SIZES: [usize; 3] = [2048, 1024, 256];

    /// Build a new tier table, validating every invariant the allocator
    /// relies on. Panics (rather than returning an error) because a bad
    /// tier table is a configuration bug, not a runtime condition.
    pub fn new(sizes: [usize; T]) -> Self {
        assert!(T > 0, "a pool needs at least one tier");
        for i in 1..T {
            assert!(
                sizes[i - 1] > sizes[i],
                "tier sizes must be strictly decreasing (tier 0 is the largest)"
            );
        }
        let min_size = sizes[T - 1];
        assert!(
            min_size >= HEADER_RESERVED_BYTES + size_of::<ChunkNode>(),
            "smallest tier must be large enough to hold the external header \
             plus an embedded free-list node"
        );
        assert!(
            sizes[0] <= PAGE_SIZE,
            "the largest tier must not exceed PAGE_SIZE"
        );
        for &size in sizes.iter() {
            assert!(
                PAGE_SIZE % size == 0,
                "PAGE_SIZE must be an integer multiple of every tier size"
            );
        }
        TierTable { sizes }
    }

    /// The byte size of chunks in tier `t`.
    pub fn size(&self, t: usize) -> usize {
        self.sizes[t]
    }

    /// The number of tiers.
    pub const fn num_tiers(&self) -> usize {
        T
    }

    /// The largest allocatable request size, i.e. `size(0)`.
    pub fn max_alloc_size(&self) -> usize {
        self.sizes[0]
    }

    /// Picks the smallest tier whose chunk size is `>= n`, per tier
    /// selection (largest tier is index 0, so we scan from the smallest
    /// tier upward and take the first one big enough).
    pub fn select_tier(&self, n: usize) -> Option<usize> {
        (0..T).rev().find(|&t| self.sizes[t] >= n)
    }

    /// Number of chunks a single page is split into under tier `t`.
    pub fn chunks_per_page(&self, t: usize) -> usize {
        PAGE_SIZE / self.sizes[t]
    }
}

impl<const T: usize> Default for TierTable<T> {
    /// Only meaningful when `T == 3`; callers with other tier counts must
    /// use [`TierTable::new`] with their own sizes.
    fn default() -> Self {
        let mut sizes = [0usize; T];
        assert_eq!(T, 3, "TierTable::default() only supports the historical 3-tier layout");
        sizes[..3].copy_from_slice(&Self::DEFAULT_SIZES);
        TierTable::new(sizes)
    }
}
