//! Parallel allocation and publication stress over one shared region.
//!
//! Five writer threads, each with its own arena attached to the same
//! bytes, allocate random-sized blocks and publish roughly half of them
//! until the region fills up. Meanwhile the main thread repeatedly walks
//! the iterable list, checking that observed counts only ever grow.
//!
//! The second test adds a hostile peer: random single-byte pokes into the
//! live region. It verifies nothing stronger than termination — either
//! the corruption is detected or the region just fills — because that is
//! the whole guarantee: no hang, no out-of-range read, no crash.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use silt::{PersistentArena, SharedMem};
use silt_test_utils::{count_iterables, hammer};

const REGION_SIZE: u32 = 1 << 20; // 1 MiB
const REGION_PAGE: u32 = 64 << 10; // 64 KiB
const WRITERS: usize = 5;

#[test]
fn five_writers_fill_the_region_consistently() {
    let mem = SharedMem::zeroed(REGION_SIZE as usize);
    // Initialize before any concurrent attach.
    let observer = PersistentArena::attach(mem.clone(), REGION_PAGE, 1, "stress").unwrap();

    let published: usize = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..WRITERS)
            .map(|i| {
                let mem = mem.clone();
                scope.spawn(move || {
                    let arena = PersistentArena::attach(mem, REGION_PAGE, 0, "").unwrap();
                    let mut rng = ChaCha8Rng::seed_from_u64(0xACE + i as u64);
                    hammer(&arena, &mut rng)
                })
            })
            .collect();

        // Concurrent observation: iterable counts never go backwards.
        let mut last_count = 0;
        while !observer.is_corrupt() && !observer.is_full() {
            let count = count_iterables(&observer);
            assert!(count >= last_count, "count regressed: {count} < {last_count}");
            last_count = count;
        }

        handles.into_iter().map(|h| h.join().unwrap().published).sum()
    });

    assert!(!observer.is_corrupt());
    assert!(observer.is_full());
    assert_eq!(count_iterables(&observer), published);
}

#[test]
fn random_byte_pokes_never_hang_a_traversal() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let mem = SharedMem::zeroed(REGION_SIZE as usize);
    let observer = PersistentArena::attach(mem.clone(), REGION_PAGE, 2, "fuzz").unwrap();
    let running = AtomicUsize::new(WRITERS);

    std::thread::scope(|scope| {
        for i in 0..WRITERS {
            let mem = mem.clone();
            let running = &running;
            scope.spawn(move || {
                let arena = PersistentArena::attach(mem, REGION_PAGE, 0, "").unwrap();
                let mut rng = ChaCha8Rng::seed_from_u64(0xF22 + i as u64);
                let report = hammer(&arena, &mut rng);
                running.fetch_sub(1, Ordering::Release);
                report
            });
        }

        // The hostile peer: scribble single bytes anywhere in the region
        // while the writers run.
        let mut rng = ChaCha8Rng::seed_from_u64(0xBAD);
        while running.load(Ordering::Acquire) > 0 {
            let offset = rng.gen_range(0..REGION_SIZE as usize);
            let value: u8 = rng.gen();
            // SAFETY: offset is in bounds. The write races with the
            // writer threads by design; this models a misbehaving peer
            // process, which is exactly what the arena must survive.
            unsafe { mem.as_ptr().add(offset).write_volatile(value) };
        }
    });

    // Termination is the property under test: the walk is bounded no
    // matter what the bytes now say.
    count_iterables(&observer);
}
