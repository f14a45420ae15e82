//! A generic, object-safe front for [`crate::Pool`] (§6 "Embedding").
//!
//! A concrete `Pool<T>` is generic over its tier count, which makes it
//! awkward for an embedder that only knows the tier count at runtime (e.g.
//! reading it from a config file) to hold one behind a single type. This
//! module's [`GenericPoolOps`] trait erases `T`, the same way the teacher's
//! allocator crate lets callers program against `Box<dyn FrameAllocator>`
//! instead of a concrete chunk-tracking implementation.

use crate::error::{AllocError, AllocFlags, ReclaimError};
use crate::pool::{Handle, Pool};

/// Object-safe operations every ztier pool supports, regardless of its
/// compile-time tier count.
pub trait GenericPoolOps: Send + Sync {
    fn alloc(&self, size: usize, flags: AllocFlags) -> Result<Handle, AllocError>;
    fn free(&self, handle: Handle);
    fn reclaim_page(&self, retries: u32) -> Result<(), ReclaimError>;
    fn map(&self, handle: Handle) -> *mut u8;
    fn unmap(&self, handle: Handle);
    fn get_pool_size(&self) -> usize;
}

impl<const T: usize> GenericPoolOps for Pool<T> {
    fn alloc(&self, size: usize, flags: AllocFlags) -> Result<Handle, AllocError> {
        Pool::alloc(self, size, flags)
    }

    fn free(&self, handle: Handle) {
        Pool::free(self, handle)
    }

    fn reclaim_page(&self, retries: u32) -> Result<(), ReclaimError> {
        Pool::reclaim_page(self, retries)
    }

    fn map(&self, handle: Handle) -> *mut u8 {
        Pool::map(self, handle)
    }

    fn unmap(&self, handle: Handle) {
        Pool::unmap(self, handle)
    }

    fn get_pool_size(&self) -> usize {
        Pool::get_pool_size(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierTable;
    use crate::page_source::HeapPageSource;
    use alloc::boxed::Box;

    #[test]
    fn pool_is_usable_through_the_trait_object() {
        let pool: Box<dyn GenericPoolOps> =
            Box::new(Pool::<3>::create(TierTable::default(), Box::new(HeapPageSource), None));
        let h = pool.alloc(10, AllocFlags::empty()).expect("alloc should succeed");
        assert_eq!(pool.get_pool_size(), crate::config::PAGE_SIZE);
        pool.free(h);
    }
}
