//! Benchmark profiles and utilities for Silt.
//!
//! Provides pre-built region profiles for benchmarking:
//!
//! - [`reference_region`]: 1 MiB region, 64 KiB pages — the geometry the
//!   allocator's own tests use
//! - [`large_region`]: 64 MiB region, 1 MiB pages, for walk-length and
//!   contention measurements
//! - [`populate`]: fill a region with published fixed-size blocks

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use silt::{PersistentArena, Reference, SharedMem};

/// Region size of the reference profile: 1 MiB.
pub const REFERENCE_SIZE: u32 = 1 << 20;

/// Page size of the reference profile: 64 KiB.
pub const REFERENCE_PAGE: u32 = 64 << 10;

/// Build the reference benchmark region: 1 MiB with 64 KiB pages.
pub fn reference_region() -> (SharedMem, PersistentArena) {
    let mem = SharedMem::zeroed(REFERENCE_SIZE as usize);
    let arena = PersistentArena::attach(mem.clone(), REFERENCE_PAGE, 1, "bench").unwrap();
    (mem, arena)
}

/// Build a large benchmark region: 64 MiB with 1 MiB pages.
pub fn large_region() -> (SharedMem, PersistentArena) {
    let mem = SharedMem::zeroed(64 << 20);
    let arena = PersistentArena::attach(mem.clone(), 1 << 20, 1, "bench-large").unwrap();
    (mem, arena)
}

/// Allocate and publish `count` blocks of `size` payload bytes.
///
/// Returns the references actually created; the region filling up ends
/// the run early.
pub fn populate(arena: &PersistentArena, count: usize, size: u32) -> Vec<Reference> {
    let mut refs = Vec::with_capacity(count);
    for i in 0..count {
        let Some(r) = arena.allocate(size, 100 + (i as u32 % 16)) else {
            break;
        };
        arena.make_iterable(r);
        refs.push(r);
    }
    refs
}
