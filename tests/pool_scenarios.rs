//! Seed scenarios and randomized invariant checks driven entirely through
//! the public API, exercising `Pool` the way an embedder actually would:
//! concurrent allocation, free, and reclaim against a heap-backed source.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use ztier::{AllocError, AllocFlags, HeapPageSource, Pool, ReclaimError, TierTable, PAGE_SIZE};

fn lcg_next(state: &mut u64) -> u64 {
    *state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    *state
}

#[test]
fn tier_boundaries_select_the_expected_tier() {
    let pool: Pool<3> = Pool::create(TierTable::default(), Box::new(HeapPageSource), None);
    for (size, page_multiple) in [(1usize, 256usize), (256, 256), (257, 1024), (1024, 1024), (1025, 2048), (2048, 2048)] {
        let h = pool.alloc(size, AllocFlags::empty()).unwrap();
        assert_eq!(h % page_multiple, 0, "size {size} should have landed in the {page_multiple}-byte tier");
    }
    assert_eq!(pool.alloc(2049, AllocFlags::empty()), Err(AllocError::TooLarge));
}

#[test]
fn reclaim_without_any_owned_pages_is_invalid_argument() {
    let pool: Pool<3> = Pool::create(TierTable::default(), Box::new(HeapPageSource), Some(Box::new(|_: &Pool<3>, _| Ok(()))));
    assert_eq!(pool.reclaim_page(1), Err(ReclaimError::InvalidArgument));
}

/// Randomized alloc/free sequences, checked against two invariants that
/// must hold no matter what order operations happen in:
/// - a handle returned by `alloc` is never returned again before it is
///   freed (I1, no double-issue of a live chunk)
/// - `get_pool_size` is always a multiple of `PAGE_SIZE` (I4)
#[test]
fn randomized_alloc_free_never_double_issues_a_live_handle() {
    let pool: Pool<3> = Pool::create(TierTable::default(), Box::new(HeapPageSource), None);
    let mut rng = 0xC0FFEEu64;
    let mut live: HashSet<usize> = HashSet::new();

    for _ in 0..5000 {
        assert_eq!(pool.get_pool_size() % PAGE_SIZE, 0);
        let draw = lcg_next(&mut rng);
        if live.is_empty() || draw % 3 != 0 {
            let size = 1 + (lcg_next(&mut rng) % 2048) as usize;
            if let Ok(h) = pool.alloc(size, AllocFlags::empty()) {
                assert!(live.insert(h), "handle {h:#x} was issued twice while still live");
            }
        } else {
            let idx = (lcg_next(&mut rng) as usize) % live.len();
            let h = *live.iter().nth(idx).unwrap();
            live.remove(&h);
            pool.free(h);
        }
    }

    for h in live {
        pool.free(h);
    }
    assert_eq!(pool.get_pool_size(), 0, "every page should be fully free once all handles are returned (no merging, but also no leaks)");
}

/// An eviction hook that always succeeds should let `reclaim_page` drain
/// an entire pool down to zero, one page at a time.
#[test]
fn repeated_reclaim_drains_a_fully_used_pool() {
    static NEXT_ID: AtomicU64 = AtomicU64::new(0);
    let evicted: Mutex<Vec<u64>> = Mutex::new(Vec::new());

    let pool: Pool<3> = Pool::create(
        TierTable::default(),
        Box::new(HeapPageSource),
        Some(Box::new(move |pool: &Pool<3>, handle| {
            pool.free(handle);
            Ok(())
        })),
    );

    let mut handles = Vec::new();
    for _ in 0..40 {
        handles.push(pool.alloc(200, AllocFlags::empty()).unwrap());
        NEXT_ID.fetch_add(1, Ordering::Relaxed);
    }
    let _ = evicted;

    let pages_before = pool.get_pool_size() / PAGE_SIZE;
    assert!(pages_before > 1, "test needs more than one backing page to be meaningful");

    let mut reclaimed = 0;
    while pool.get_pool_size() > 0 {
        match pool.reclaim_page(pages_before as u32 + 1) {
            Ok(()) => reclaimed += 1,
            Err(ReclaimError::TryAgain) => break,
            Err(e) => panic!("unexpected reclaim error: {e:?}"),
        }
    }

    assert_eq!(reclaimed, pages_before);
    assert_eq!(pool.get_pool_size(), 0);
}
