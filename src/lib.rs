//! ztier: a tiered slab allocator for compressed pages.
//!
//! A ztier [`Pool`] carves fixed-size backing pages into several fixed-size
//! "tiers" of chunks (largest to smallest), hands chunks out by [`Handle`],
//! and can reclaim an entire backing page on demand by walking each tier's
//! page LRU and asking the caller to evict every chunk still live on the
//! chosen victim page. It exists to pack many small compressed objects
//! (e.g. swapped-out pages after compression) into as few physical pages as
//! possible, at the cost of an explicit two-phase reclaim protocol instead
//! of a simple free-list pop.
//!
//! The core pieces:
//!
//! - [`TierTable`] fixes how many tiers a pool has and each tier's chunk
//!   size, validated once at construction.
//! - [`Pool::alloc`] / [`Pool::free`] are the fast path: pick a tier, pop or
//!   push an address-ordered free-list.
//! - [`Pool::reclaim_page`] is the slow path: select a victim page, quarantine
//!   its free chunks, ask the registered eviction hook to relocate every
//!   chunk still allocated on it, and either release the page or roll back.
//! - [`PageSource`] is the boundary to whatever actually owns physical
//!   memory; this crate ships only a heap-backed implementation for tests.
//! - [`adapter::GenericPoolOps`] erases a pool's const-generic tier count
//!   for embedders that only know it at runtime.
#![no_std]

extern crate alloc;

pub mod adapter;
mod chunk_set;
mod config;
mod error;
mod page;
mod page_source;
mod pool;

pub use config::{TierTable, HEADER_RESERVED_BYTES, PAGE_SIZE};
pub use error::{AllocError, AllocFlags, EvictError, ReclaimError};
pub use page_source::{HeapPageSource, PageSource, RawPage};
pub use pool::{EvictFn, Handle, Pool};
