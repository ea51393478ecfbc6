//! Lock-free publication and bounded iteration of the iterable list.
//!
//! The iterable list is a singly-linked list threaded through each
//! block's `next` field, with an implicit head inside the region header.
//! `next` transitions monotonically from 0 to a valid reference and then
//! never changes, so readers never observe torn linkage: each hop sees
//! either "end of list" or a committed successor.
//!
//! Because the backing bytes may be mangled by a peer, every traversal is
//! defensive: each hop re-validates the reference and a hop budget bounds
//! total work even if an adversary has welded the list into a cycle.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::reference::Reference;
use crate::region::PersistentArena;

/// Resumable cursor over the iterable list.
///
/// A cheap value with no back-reference to arena state: just the last
/// reference returned and a hop counter bounding total work. The same
/// cursor can be advanced through any arena attached to the same region.
///
/// Concurrent allocation and publication during iteration is legal: new
/// elements appear at the end, and already-returned elements are never
/// returned again, so repeated full walks yield monotonically
/// non-decreasing counts.
#[derive(Clone, Copy, Debug, Default)]
pub struct ArenaIterator {
    /// Offset of the last block returned; 0 = before the first element.
    last: u32,
    /// Hops taken so far; the region bounds how large this may grow.
    hops: u32,
}

/// Borrowing adapter that walks the iterable list as a standard iterator.
///
/// Created by [`PersistentArena::iterables`]. Yields `(reference, type)`
/// pairs in publication order.
pub struct Iterables<'a> {
    arena: &'a PersistentArena,
    state: ArenaIterator,
}

impl Iterator for Iterables<'_> {
    type Item = (Reference, u32);

    fn next(&mut self) -> Option<Self::Item> {
        self.arena.next_iterable(&mut self.state)
    }
}

impl PersistentArena {
    /// Begin iterating from the start of the iterable list.
    pub fn create_iterator(&self) -> ArenaIterator {
        ArenaIterator::default()
    }

    /// Begin iterating at the element after `start`.
    ///
    /// If `start` is not a live iterable block, the cursor simply yields
    /// nothing.
    pub fn create_iterator_after(&self, start: Reference) -> ArenaIterator {
        ArenaIterator {
            last: start.offset(),
            hops: 0,
        }
    }

    /// Walk the iterable list as a standard iterator.
    pub fn iterables(&self) -> Iterables<'_> {
        Iterables {
            arena: self,
            state: self.create_iterator(),
        }
    }

    /// Advance the cursor, returning the next iterable block and its type.
    ///
    /// Returns `None` at the end of the list. A broken linkage (a
    /// reference that fails validation, a self-link, or more hops than
    /// blocks that could exist) raises the sticky corrupt flag and ends
    /// the walk; it never hangs, reads out of range, or panics.
    pub fn next_iterable(&self, iter: &mut ArenaIterator) -> Option<(Reference, u32)> {
        let next = if iter.last == 0 {
            self.header().queue.next.load(Ordering::Acquire)
        } else {
            // The cursor position is caller-supplied state. If it no
            // longer validates, end quietly: a stale starting point is
            // the caller's situation, not region corruption.
            let last = Reference::new(iter.last)?;
            self.committed_block(last)?.next.load(Ordering::Acquire)
        };
        if next == 0 {
            return None;
        }
        if next == iter.last {
            // A link that does not advance is a welded cycle.
            self.set_corrupt();
            return None;
        }
        let r = Reference::new(next)?;
        let Some(block) = self.committed_block(r) else {
            // The linkage itself pointed at something that is not a
            // committed block; the list is broken.
            self.set_corrupt();
            return None;
        };
        iter.hops += 1;
        if iter.hops > self.max_block_count() {
            self.set_corrupt();
            return None;
        }
        iter.last = next;
        Some((r, block.type_id.load(Ordering::Relaxed)))
    }

    /// Publish a committed block onto the iterable list.
    ///
    /// Idempotent and lock-free: concurrent publishers of different
    /// blocks retry until each lands at the tail; no thread ever blocks
    /// another. A crash between allocation and publication leaves the
    /// block allocated but invisible, never a broken list. Invalid or
    /// uncommitted references are ignored. Once published, a block is
    /// iterable forever.
    pub fn make_iterable(&self, r: Reference) {
        if !self.writable() {
            return;
        }
        let Some(block) = self.committed_block(r) else {
            return;
        };
        // Linked to a successor already ⇒ already on the list.
        if block.next.load(Ordering::Acquire) != 0 {
            return;
        }

        let header = self.header();
        let mut budget = self.max_block_count();

        // Start walking from the append hint, falling back to the list
        // head when the list has never had a tail recorded.
        let hint = header.tail.load(Ordering::Acquire);
        let (mut cur, mut slot): (u32, &AtomicU32) = if hint == 0 {
            (0, &header.queue.next)
        } else if hint == r.offset() {
            // We are the recorded tail: already published.
            return;
        } else {
            match Reference::new(hint).and_then(|h| self.committed_block(h)) {
                Some(tail_block) => (hint, &tail_block.next),
                None => {
                    self.set_corrupt();
                    return;
                }
            }
        };

        loop {
            let next = slot.load(Ordering::Acquire);
            if next == r.offset() {
                // Already on the list behind a stale hint.
                return;
            }
            if next == 0 {
                // Try to take the tail slot. Failure means another writer
                // appended first; re-read this slot and keep walking.
                if slot
                    .compare_exchange(0, r.offset(), Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    // Best-effort hint update; a stale hint only costs
                    // later publishers a longer walk.
                    let _ = header.tail.compare_exchange(
                        hint,
                        r.offset(),
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    );
                    return;
                }
                continue;
            }
            if next == cur {
                self.set_corrupt();
                return;
            }
            let Some(next_block) = Reference::new(next).and_then(|n| self.committed_block(n))
            else {
                self.set_corrupt();
                return;
            };
            if budget == 0 {
                self.set_corrupt();
                return;
            }
            budget -= 1;
            cur = next;
            slot = &next_block.next;
        }
    }
}
