//! Test utilities and fixtures for Silt development.
//!
//! Provides layout-stable payload types, a recording allocation sink,
//! iterable counting helpers, and the randomized writer loop shared by
//! the stress and property tests.

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::sync::Mutex;

use indexmap::IndexMap;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use silt::{AllocRecorder, PersistentArena};

/// A small layout-stable payload for typed-access tests.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct SmallPayload {
    /// Arbitrary test value.
    pub value: u32,
    /// Arbitrary test value.
    pub extra: u32,
}

/// A wider layout-stable payload, larger than [`SmallPayload`].
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct WidePayload {
    /// Arbitrary test data.
    pub data: [u64; 8],
}

/// An [`AllocRecorder`] that keeps every sample for later inspection.
#[derive(Default)]
pub struct RecordingSink {
    samples: Mutex<Vec<u32>>,
}

impl RecordingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of samples recorded.
    pub fn total(&self) -> usize {
        self.samples.lock().unwrap().len()
    }

    /// Number of samples equal to `size` (0 counts rejections).
    pub fn count_of(&self, size: u32) -> usize {
        self.samples
            .lock()
            .unwrap()
            .iter()
            .filter(|&&s| s == size)
            .count()
    }
}

impl AllocRecorder for RecordingSink {
    fn record(&self, size: u32) {
        self.samples.lock().unwrap().push(size);
    }
}

/// Walk the iterable list once and count its elements.
pub fn count_iterables(arena: &PersistentArena) -> usize {
    arena.iterables().count()
}

/// Walk the iterable list once, tallying elements per type tag in
/// publication order.
pub fn count_by_type(arena: &PersistentArena) -> IndexMap<u32, usize> {
    let mut counts = IndexMap::new();
    for (_, type_id) in arena.iterables() {
        *counts.entry(type_id).or_insert(0) += 1;
    }
    counts
}

/// Outcome of one [`hammer`] run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HammerReport {
    /// Blocks successfully allocated before the region filled up.
    pub allocated: usize,
    /// Blocks this writer also published onto the iterable list.
    pub published: usize,
}

/// Allocate random-sized blocks (1..=99 bytes, types 100..=999) until the
/// region is full, publishing roughly half of them.
///
/// This is the shared writer loop of the parallel stress tests: run it on
/// several threads, each with its own arena attached to the same bytes,
/// and compare the summed reports against a final iterable count.
pub fn hammer(arena: &PersistentArena, rng: &mut ChaCha8Rng) -> HammerReport {
    let mut report = HammerReport::default();
    loop {
        let size = rng.gen_range(1..=99);
        let type_id = rng.gen_range(100..=999);
        let Some(r) = arena.allocate(size, type_id) else {
            return report;
        };
        report.allocated += 1;
        if rng.gen_bool(0.5) {
            arena.make_iterable(r);
            report.published += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use silt::SharedMem;

    #[test]
    fn recording_sink_tallies_by_size() {
        let sink = RecordingSink::new();
        sink.record(8);
        sink.record(8);
        sink.record(0);
        assert_eq!(sink.total(), 3);
        assert_eq!(sink.count_of(8), 2);
        assert_eq!(sink.count_of(0), 1);
        assert_eq!(sink.count_of(99), 0);
    }

    #[test]
    fn hammer_fills_a_small_region() {
        let mem = SharedMem::zeroed(1 << 12);
        let arena = PersistentArena::attach(mem, 0, 1, "").unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let report = hammer(&arena, &mut rng);
        assert!(report.allocated > 0);
        assert!(report.published <= report.allocated);
        assert!(arena.is_full());
        assert!(!arena.is_corrupt());
        assert_eq!(count_iterables(&arena), report.published);
    }

    #[test]
    fn count_by_type_preserves_publication_order() {
        let mem = SharedMem::zeroed(1 << 12);
        let arena = PersistentArena::attach(mem, 0, 1, "").unwrap();
        for type_id in [5u32, 9, 5] {
            let r = arena.allocate(8, type_id).unwrap();
            arena.make_iterable(r);
        }
        let counts = count_by_type(&arena);
        assert_eq!(counts.get(&5), Some(&2));
        assert_eq!(counts.get(&9), Some(&1));
        assert_eq!(counts.get_index(0), Some((&5, &2)));
    }
}
