//! Concurrency scenario: while `reclaim_page` is evicting one chunk of a
//! victim page, a different thread frees another chunk of that very same
//! page. The under-reclaim set exists precisely to make this safe, so this
//! test exercises it with real OS threads instead of a single-threaded
//! simulation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use ztier::{AllocFlags, HeapPageSource, Pool, ReclaimError, TierTable, PAGE_SIZE};

#[test]
fn concurrent_free_during_eviction_does_not_double_count() {
    let evicting_started = Arc::new(Barrier::new(2));
    let freer_done = Arc::new(AtomicBool::new(false));

    let evicting_started_cb = evicting_started.clone();
    let freer_done_cb = freer_done.clone();

    let pool = Arc::new(Pool::<3>::create(
        TierTable::default(),
        Box::new(HeapPageSource),
        Some(Box::new(move |pool: &Pool<3>, handle| {
            evicting_started_cb.wait();
            // Give the other thread a chance to free its own chunk of this
            // same page while we're "mid-eviction" of a different one.
            while !freer_done_cb.load(Ordering::SeqCst) {
                thread::yield_now();
            }
            pool.free(handle);
            Ok(())
        })),
    ));

    let a = pool.alloc(500, AllocFlags::empty()).unwrap();
    let b = pool.alloc(500, AllocFlags::empty()).unwrap();
    assert_eq!(a & !(PAGE_SIZE - 1), b & !(PAGE_SIZE - 1), "both chunks must land on the same page for this test to be meaningful");

    let reclaimer = {
        let pool = pool.clone();
        thread::spawn(move || pool.reclaim_page(4))
    };

    let freer = {
        let pool = pool.clone();
        let evicting_started = evicting_started.clone();
        let freer_done = freer_done.clone();
        thread::spawn(move || {
            evicting_started.wait();
            thread::sleep(Duration::from_millis(5));
            pool.free(b);
            freer_done.store(true, Ordering::SeqCst);
        })
    };

    freer.join().unwrap();
    let result = reclaimer.join().unwrap();

    assert_eq!(result, Ok(()));
    assert_eq!(pool.get_pool_size(), 0);
}

/// Several threads call `reclaim_page` at once against a pool with many
/// fully-free, disjoint victim pages in the same tier. Each `reclaim_page`
/// call selects, marks, and unlinks its victim from the tier's LRU in one
/// critical section (§4.6 property (a)), so no two calls -- whether on the
/// same thread across retries or on different threads entirely -- should
/// ever pick the same page: every page must be reclaimed exactly once,
/// across however many `reclaim_page` calls it took, and nothing should
/// panic unlinking an already-unlinked page.
#[test]
fn concurrent_reclaimers_never_select_the_same_victim_twice() {
    const PAGES: usize = 8;
    const RECLAIMERS: usize = 4;

    let pool = Arc::new(Pool::<3>::create(
        TierTable::default(),
        Box::new(HeapPageSource),
        Some(Box::new(|pool: &Pool<3>, handle| {
            pool.free(handle);
            Ok(())
        })),
    ));

    // Allocate every chunk of `PAGES` distinct tier-1 pages before freeing
    // any of them, so each allocation is a genuine miss that splits a fresh
    // page; freeing them all afterward leaves `PAGES` disjoint, fully-free
    // victims ready for reclaim.
    let chunks_per_page = pool.tiers().chunks_per_page(1);
    let mut handles = Vec::with_capacity(PAGES * chunks_per_page);
    for _ in 0..PAGES * chunks_per_page {
        handles.push(pool.alloc(500, AllocFlags::empty()).unwrap());
    }
    for h in handles {
        pool.free(h);
    }
    assert_eq!(pool.get_pool_size(), PAGES * PAGE_SIZE);

    let start = Arc::new(Barrier::new(RECLAIMERS));
    let joins: Vec<_> = (0..RECLAIMERS)
        .map(|_| {
            let pool = pool.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                let mut reclaimed = 0u32;
                loop {
                    match pool.reclaim_page(PAGES as u32 + 1) {
                        Ok(()) => reclaimed += 1,
                        Err(ReclaimError::TryAgain) | Err(ReclaimError::InvalidArgument) => break,
                    }
                }
                reclaimed
            })
        })
        .collect();

    let total_reclaimed: u32 = joins.into_iter().map(|j| j.join().unwrap()).sum();

    assert_eq!(
        total_reclaimed as usize, PAGES,
        "every distinct page must be reclaimed exactly once, never double-selected by two concurrent reclaimers"
    );
    assert_eq!(pool.get_pool_size(), 0);
}
