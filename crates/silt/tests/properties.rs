//! Property tests over arbitrary well-formed operation sequences.

use proptest::collection::vec;
use proptest::prelude::*;

use silt::{PersistentArena, SharedMem, ALLOC_ALIGNMENT};
use silt_test_utils::count_iterables;

const REGION_SIZE: u32 = 1 << 16;

fn fresh_arena() -> PersistentArena {
    let mem = SharedMem::zeroed(REGION_SIZE as usize);
    PersistentArena::attach(mem, 0, 1, "props").unwrap()
}

proptest! {
    /// `alloc_size` is the request rounded up by less than one alignment
    /// unit, for every reference ever returned.
    #[test]
    fn alloc_size_accounts_for_every_request(sizes in vec(1u32..=99, 1..64)) {
        let arena = fresh_arena();
        for size in sizes {
            let Some(r) = arena.allocate(size, 1) else { break };
            let got = arena.alloc_size(r).unwrap();
            prop_assert!(got >= size);
            prop_assert!(got < size + ALLOC_ALIGNMENT);
        }
    }

    /// Typed access succeeds exactly for the recorded type tag.
    #[test]
    fn object_lookup_honors_the_type_tag(
        type_id in 1u32..1000,
        other in 1u32..1000,
    ) {
        prop_assume!(type_id != other);
        let arena = fresh_arena();
        let r = arena.allocate(16, type_id).unwrap();
        prop_assert!(arena.get_object::<[u8; 16]>(r, type_id).is_some());
        prop_assert!(arena.get_object::<[u8; 16]>(r, other).is_none());
    }

    /// The iterable count equals the number of publish calls, in order,
    /// and well-formed sequences never trip the corruption flag.
    #[test]
    fn publication_is_exact_and_never_corrupts(
        ops in vec((1u32..=99, 100u32..=999, any::<bool>()), 0..64),
    ) {
        let arena = fresh_arena();
        let mut expected = Vec::new();
        for (size, type_id, publish) in ops {
            let Some(r) = arena.allocate(size, type_id) else { break };
            if publish {
                arena.make_iterable(r);
                // Repeat publication must be a no-op.
                arena.make_iterable(r);
                expected.push((r, type_id));
            }
        }
        let walked: Vec<_> = arena.iterables().collect();
        prop_assert_eq!(walked, expected);
        prop_assert!(!arena.is_corrupt());
    }

    /// Iterable counts are monotone across interleaved publications.
    #[test]
    fn counts_never_regress(publishes in vec(any::<bool>(), 1..32)) {
        let arena = fresh_arena();
        let mut last = 0;
        for publish in publishes {
            let Some(r) = arena.allocate(8, 1) else { break };
            if publish {
                arena.make_iterable(r);
            }
            let count = count_iterables(&arena);
            prop_assert!(count >= last);
            last = count;
        }
    }
}
