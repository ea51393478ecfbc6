//! The persistent arena: attach, allocate, and inspect a shared region.
//!
//! [`PersistentArena`] is the top-level type. It operates over a
//! caller-supplied fixed-size byte region (anonymous memory or a file
//! mapping) and lets any number of writers carve typed blocks out of it
//! concurrently, using only atomic operations on the shared bytes. The
//! region's bytes are the entire persistent state: a crashed writer
//! leaves at worst a reserved-but-uncommitted block that no reader will
//! ever observe.
//!
//! The lifecycle of a block is:
//! 1. [`PersistentArena::allocate`] reserves and commits it.
//! 2. The writer fills its payload ([`PersistentArena::put_object`]).
//! 3. [`PersistentArena::make_iterable`] publishes it to the shared list
//!    (see the iteration module).
//!
//! Blocks are never freed, moved, or reused.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use memmap2::{Mmap, MmapMut};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::backing::{Backing, SharedMem};
use crate::error::RegionError;
use crate::layout::{
    align_up, BlockHeader, RegionHeader, ALLOC_ALIGNMENT, BLOCK_COOKIE, BLOCK_HEADER_SIZE,
    FLAG_CORRUPT, FLAG_FULL, MAX_REGION_SIZE, MIN_REGION_SIZE, QUEUE_COOKIE, REGION_COOKIE,
    REGION_HEADER_SIZE, REGION_VERSION,
};
use crate::reference::Reference;
use crate::stats::{AllocRecorder, MemoryInfo};

/// Lock-free, append-only object allocator over a shared byte region.
///
/// Many arenas may be attached to the same bytes at once, from the same
/// process (clones of a [`SharedMem`]) or from different processes
/// (mappings of the same file or shared memory object). All of them have
/// equal rights; there is no owner or leader. Readers must tolerate the
/// bytes being mangled by a peer: every traversal is bounded and every
/// reference re-validated, with inconsistencies reported through the
/// sticky corrupt flag instead of panics.
pub struct PersistentArena {
    /// Keeps the bytes alive; never accessed after construction.
    #[allow(dead_code)]
    backing: Backing,
    base: *mut u8,
    /// Effective region size: the attached mapping's length, clamped to
    /// the header's declared total. Bounds every validation.
    mem_size: u32,
    page_size: u32,
    id: u32,
    writable: bool,
    /// Process-local shadow of the corrupt flag; stands in for the
    /// persisted bit when the backing cannot be written.
    local_corrupt: AtomicBool,
    recorder: Option<Arc<dyn AllocRecorder>>,
}

// SAFETY: `base` points into memory owned by `backing`, which is Send +
// Sync itself; all mutation of the shared bytes goes through atomics.
unsafe impl Send for PersistentArena {}
// SAFETY: see above.
unsafe impl Sync for PersistentArena {}

// Compile-time assertion: PersistentArena must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<PersistentArena>();
};

impl PersistentArena {
    /// Attach writable to caller-shared anonymous memory.
    ///
    /// If the region is fresh (all zero), it is initialized with the given
    /// `page_size`, `id`, and `name`. If it already carries a valid header,
    /// the arena attaches to it and **ignores** the caller-supplied values:
    /// identity and geometry come from the header, so readers opening
    /// existing regions need not know them. `page_size == 0` means the
    /// whole region is one page.
    pub fn attach(mem: SharedMem, page_size: u32, id: u32, name: &str) -> Result<Self, RegionError> {
        Self::build(Backing::Shared(mem), page_size, id, name, false)
    }

    /// Attach read-only to caller-shared anonymous memory.
    ///
    /// All mutating operations on the returned arena are no-ops.
    pub fn attach_readonly(mem: SharedMem) -> Result<Self, RegionError> {
        Self::build(Backing::Shared(mem), 0, 0, "", true)
    }

    /// Create an arena over an internally allocated, zeroed region.
    pub fn local(total_size: u32, id: u32, name: &str) -> Result<Self, RegionError> {
        if total_size == 0 || total_size as usize > isize::MAX as usize {
            return Err(RegionError::SizeOutOfRange {
                size: total_size as usize,
            });
        }
        let mem = SharedMem::zeroed(total_size as usize);
        Self::build(Backing::Shared(mem), 0, id, name, false)
    }

    /// Attach writable to a memory-mapped file.
    pub fn map_file(map: MmapMut, page_size: u32, id: u32, name: &str) -> Result<Self, RegionError> {
        Self::build(Backing::MappedRw(map), page_size, id, name, false)
    }

    /// Attach read-only to a memory-mapped file.
    ///
    /// The mapping may be shorter than the region's declared total size
    /// (a file holding only the used prefix attaches fine and reports its
    /// own length as the total). The corrupt flag of a read-only arena
    /// lives in a process-local shadow; the file is never written.
    pub fn map_file_readonly(map: Mmap) -> Result<Self, RegionError> {
        Self::build(Backing::MappedRo(map), 0, 0, "", true)
    }

    /// Whether a mapping is worth attempting to attach to.
    ///
    /// A pure geometry gate: the mapping must be able to hold the region
    /// header and be aligned for it. Content validity is the attach
    /// path's job; a garbage file of acceptable length attaches with the
    /// corrupt flag set.
    pub fn is_file_acceptable(bytes: &[u8]) -> bool {
        bytes.len() >= REGION_HEADER_SIZE as usize
            && bytes.as_ptr() as usize % ALLOC_ALIGNMENT as usize == 0
    }

    fn build(
        mut backing: Backing,
        page_size: u32,
        id: u32,
        name: &str,
        readonly: bool,
    ) -> Result<Self, RegionError> {
        let len = backing.len();
        let base = backing.base_mut();

        // A writable region must have room to grow into; a read-only view
        // only needs the header (a file may hold just the used prefix).
        let min_len = if readonly {
            REGION_HEADER_SIZE
        } else {
            MIN_REGION_SIZE
        };
        if len < min_len as usize || len > MAX_REGION_SIZE as usize {
            return Err(RegionError::SizeOutOfRange { size: len });
        }
        if base as usize % ALLOC_ALIGNMENT as usize != 0 {
            return Err(RegionError::MisalignedBase { addr: base as usize });
        }
        let len = len as u32;

        let mut arena = Self {
            backing,
            base,
            mem_size: len,
            page_size: if page_size == 0 { len } else { page_size },
            id,
            writable: !readonly,
            local_corrupt: AtomicBool::new(false),
            recorder: None,
        };

        match arena.header().cookie.load(Ordering::Acquire) {
            REGION_COOKIE => arena.adopt_header(),
            0 if arena.writable => {
                // Only a fresh region persists the caller's geometry, so
                // only here does that geometry have to hold up. On attach
                // to a valid header the arguments are ignored entirely.
                if page_size != 0 {
                    if !page_size.is_power_of_two() {
                        return Err(RegionError::BadPageSize { page_size });
                    }
                    if len % page_size != 0 {
                        return Err(RegionError::SizeNotPageMultiple {
                            size: len,
                            page_size,
                        });
                    }
                }
                arena.initialize(name);
            }
            0 => {
                // Read-only view of bytes nobody ever initialized.
                arena.set_corrupt();
            }
            _ => {
                // Unknown format or version lineage. Keep the region
                // inspectable but refuse to allocate into it.
                arena.writable = false;
                arena.set_corrupt();
            }
        }
        Ok(arena)
    }

    /// Adopt identity and geometry from an already-initialized header.
    fn adopt_header(&mut self) {
        let header = self.header();
        if header.version.load(Ordering::Relaxed) != REGION_VERSION {
            self.writable = false;
            self.set_corrupt();
            return;
        }
        let total = header.total_size.load(Ordering::Relaxed);
        let page = header.page_size.load(Ordering::Relaxed);
        let alignment = header.alignment.load(Ordering::Relaxed);
        let plausible = alignment == ALLOC_ALIGNMENT
            && (REGION_HEADER_SIZE..=MAX_REGION_SIZE).contains(&total)
            && page != 0
            && (page == total || (page.is_power_of_two() && page <= total && total % page == 0));
        if !plausible {
            self.writable = false;
            self.set_corrupt();
            return;
        }

        let id = header.id.load(Ordering::Relaxed);
        self.id = id;
        self.page_size = page;
        // A mapping may be shorter than the declared region (a file that
        // holds only the used prefix); never trust bytes beyond what is
        // actually mapped.
        self.mem_size = total.min(self.mem_size);

        let header = self.header();
        let freeptr = header.freeptr.load(Ordering::Relaxed);
        if freeptr < REGION_HEADER_SIZE || freeptr % ALLOC_ALIGNMENT != 0 || freeptr > total {
            self.set_corrupt();
        }
    }

    /// First-writer initialization of a fresh (all-zero) region.
    fn initialize(&mut self, name: &str) {
        let header = self.header();

        // A zero cookie with a non-zero cursor is a region that died
        // mid-initialization; nothing in it can be trusted.
        if header.freeptr.load(Ordering::Relaxed) != 0 {
            self.writable = false;
            self.set_corrupt();
            return;
        }

        header.version.store(REGION_VERSION, Ordering::Relaxed);
        header.id.store(self.id, Ordering::Relaxed);
        header.total_size.store(self.mem_size, Ordering::Relaxed);
        header.page_size.store(self.page_size, Ordering::Relaxed);
        header.alignment.store(ALLOC_ALIGNMENT, Ordering::Relaxed);
        header.queue.cookie.store(QUEUE_COOKIE, Ordering::Relaxed);
        header.freeptr.store(REGION_HEADER_SIZE, Ordering::Relaxed);

        // The name blob is an ordinary non-iterable block so that any
        // later attacher can find it through the header's name reference.
        if !name.is_empty() {
            let bytes = name.as_bytes();
            let with_nul = bytes.len() as u32 + 1;
            if with_nul <= self.page_size.saturating_sub(BLOCK_HEADER_SIZE) {
                if let Some(r) = self.allocate_inner(with_nul, 0) {
                    let start = (r.offset() + BLOCK_HEADER_SIZE) as usize;
                    // SAFETY: the block spans [start, start + with_nul)
                    // inside the region; the trailing NUL is already there
                    // because fresh regions are zeroed.
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            bytes.as_ptr(),
                            self.base.add(start),
                            bytes.len(),
                        );
                    }
                    header.name.store(r.offset(), Ordering::Relaxed);
                }
            }
        }

        // Release: everything above must be visible before the cookie
        // makes the region claim to be initialized.
        header.cookie.store(REGION_COOKIE, Ordering::Release);
    }

    // ── allocation ────────────────────────────────────────────────

    /// Allocate a block with `size` payload bytes, tagged `type_id`.
    ///
    /// Returns `None` when the region is full, read-only, or the request
    /// is invalid. A failed allocation sets the sticky full flag if it
    /// failed for space. Every call is reported to the allocation
    /// recorder: the requested size on success, 0 on rejection.
    ///
    /// A request of zero bytes, or one that cannot fit in a page together
    /// with its header, is a programmer error: rejected in release
    /// builds, a panic in debug builds.
    pub fn allocate(&self, size: u32, type_id: u32) -> Option<Reference> {
        let r = self.allocate_checked(size, type_id);
        if let Some(recorder) = &self.recorder {
            recorder.record(if r.is_some() { size } else { 0 });
        }
        r
    }

    fn allocate_checked(&self, size: u32, type_id: u32) -> Option<Reference> {
        let payload_max = self.page_size.saturating_sub(BLOCK_HEADER_SIZE);
        if size == 0 || size > payload_max {
            debug_assert!(
                false,
                "invalid allocation request: {size} bytes (payload limit {payload_max})"
            );
            return None;
        }
        if !self.writable || self.is_full() {
            return None;
        }
        self.allocate_inner(size, type_id)
    }

    /// The CAS bump loop. Callers have already validated the request.
    fn allocate_inner(&self, size: u32, type_id: u32) -> Option<Reference> {
        let header = self.header();
        let block_size = align_up(BLOCK_HEADER_SIZE.checked_add(size)?, ALLOC_ALIGNMENT)?;

        let mut freeptr = header.freeptr.load(Ordering::Acquire);
        loop {
            // A cursor outside the region means some peer scribbled on the
            // header; flag it rather than trusting it.
            if freeptr < REGION_HEADER_SIZE
                || freeptr > self.mem_size
                || freeptr % ALLOC_ALIGNMENT != 0
            {
                self.set_corrupt();
                return None;
            }

            // Blocks never straddle a page boundary: spill to the next
            // page when this one cannot hold the whole block.
            let mut start = freeptr;
            let page_remaining = self.page_size - start % self.page_size;
            if block_size > page_remaining {
                start += page_remaining;
            }

            let end = match start.checked_add(block_size) {
                Some(end) if end <= self.mem_size => end,
                _ => {
                    self.set_full();
                    return None;
                }
            };

            match header
                .freeptr
                .compare_exchange_weak(freeptr, end, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    // The winner owns [start, end). Commit with the cookie
                    // last so a reader that sees the cookie sees the rest.
                    let block = self.block_at(start);
                    block.next.store(0, Ordering::Relaxed);
                    block.size.store(block_size, Ordering::Relaxed);
                    block.type_id.store(type_id, Ordering::Relaxed);
                    block.cookie.store(BLOCK_COOKIE, Ordering::Release);
                    return Reference::new(start);
                }
                Err(observed) => freeptr = observed,
            }
        }
    }

    // ── typed access ──────────────────────────────────────────────

    /// A typed view of a committed block's payload.
    ///
    /// Returns `Some` only if the reference validates (aligned, in range,
    /// committed), the block's type tag equals `expected_type`, and the
    /// payload is large enough for a `T`. The view aliases the region:
    /// its lifetime is the arena's, and `T` must be a layout-stable
    /// plain-data type.
    ///
    /// The returned reference must not be held across a write to the same
    /// block — a [`PersistentArena::put_object`] through this or any other
    /// attached arena. The bytes under the borrow would change while it is
    /// live, which this crate cannot detect for you. Writers and readers of
    /// a block's payload synchronize externally (the usual pattern is to
    /// fill the payload before [`PersistentArena::make_iterable`] and treat
    /// it as immutable after); copy the value out instead of keeping the
    /// reference when in doubt.
    pub fn get_object<T>(&self, r: Reference, expected_type: u32) -> Option<&T>
    where
        T: FromBytes + KnownLayout + Immutable,
    {
        let block = self.committed_block(r)?;
        if block.type_id.load(Ordering::Relaxed) != expected_type {
            return None;
        }
        let payload = self.payload_bytes(r, block);
        T::ref_from_prefix(payload).ok().map(|(object, _)| object)
    }

    /// Copy a layout-stable value into a committed block's payload.
    ///
    /// The write-side counterpart of [`PersistentArena::get_object`].
    /// Returns `false` if the arena is read-only, the reference or type
    /// tag does not validate, or the payload is too small for the value.
    ///
    /// Must not race with a live `&T` obtained from
    /// [`PersistentArena::get_object`] for the same block; see the
    /// synchronization contract documented there.
    pub fn put_object<T>(&self, r: Reference, expected_type: u32, value: &T) -> bool
    where
        T: IntoBytes + Immutable,
    {
        if !self.writable {
            return false;
        }
        let Some(block) = self.committed_block(r) else {
            return false;
        };
        if block.type_id.load(Ordering::Relaxed) != expected_type {
            return false;
        }
        let bytes = value.as_bytes();
        let payload_len = (block.size.load(Ordering::Relaxed) - BLOCK_HEADER_SIZE) as usize;
        if bytes.len() > payload_len {
            return false;
        }
        let start = (r.offset() + BLOCK_HEADER_SIZE) as usize;
        // SAFETY: committed_block bounded the payload inside the region,
        // which lives as long as &self. The copy goes through a raw
        // pointer, never a &mut, because the bytes are shared; callers
        // uphold the documented contract that no `&T` from get_object is
        // live over this block during the write.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.base.add(start), bytes.len());
        }
        true
    }

    /// Usable payload bytes of a block, as rounded up by allocation.
    pub fn alloc_size(&self, r: Reference) -> Option<u32> {
        let block = self.committed_block(r)?;
        Some(block.size.load(Ordering::Relaxed) - BLOCK_HEADER_SIZE)
    }

    /// The block's current type tag.
    pub fn object_type(&self, r: Reference) -> Option<u32> {
        Some(self.committed_block(r)?.type_id.load(Ordering::Relaxed))
    }

    /// Change the block's type tag.
    ///
    /// Relaxed ordering: the tag is advisory, and callers that pair a tag
    /// change with a payload change must synchronize externally.
    pub fn set_object_type(&self, r: Reference, type_id: u32) -> bool {
        if !self.writable {
            return false;
        }
        match self.committed_block(r) {
            Some(block) => {
                block.type_id.store(type_id, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    // ── health & identity ─────────────────────────────────────────

    /// Whether at least one allocation has failed for lack of space. Sticky.
    pub fn is_full(&self) -> bool {
        self.header().flags.load(Ordering::Relaxed) & FLAG_FULL != 0
    }

    /// Whether a broken invariant has been observed. Sticky and non-fatal:
    /// traversals stop early, but writers keep making progress.
    pub fn is_corrupt(&self) -> bool {
        self.local_corrupt.load(Ordering::Relaxed)
            || self.header().flags.load(Ordering::Relaxed) & FLAG_CORRUPT != 0
    }

    /// Whether this arena was attached read-only (or demoted to it because
    /// the header did not validate).
    pub fn is_readonly(&self) -> bool {
        !self.writable
    }

    /// Point-in-time usage snapshot; may race with concurrent allocation.
    pub fn memory_info(&self) -> MemoryInfo {
        let used = self.used_bytes();
        MemoryInfo {
            total: self.mem_size,
            free: self.mem_size - used,
        }
    }

    /// Bytes of the region image worth persisting: the header plus every
    /// block allocated so far.
    pub fn used_bytes(&self) -> u32 {
        self.header()
            .freeptr
            .load(Ordering::Acquire)
            .min(self.mem_size)
    }

    /// The region id persisted at first initialization.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The page size the region was initialized with.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// The region name persisted at first initialization, or `""`.
    pub fn name(&self) -> &str {
        let Some(name_ref) = Reference::new(self.header().name.load(Ordering::Relaxed)) else {
            return "";
        };
        let Some(block) = self.committed_block(name_ref) else {
            return "";
        };
        let bytes = self.payload_bytes(name_ref, block);
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        std::str::from_utf8(&bytes[..end]).unwrap_or("")
    }

    /// The whole attached region as bytes.
    ///
    /// Racy under concurrent writers; intended for persisting a quiescent
    /// region (write the first [`PersistentArena::used_bytes`] of it).
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: base/mem_size describe the attached mapping, which lives
        // as long as &self.
        unsafe { std::slice::from_raw_parts(self.base, self.mem_size as usize) }
    }

    /// Install the allocation sampling hook.
    ///
    /// Must be done before the arena is shared; each arena attached to a
    /// region has its own recorder (usually only one of them records).
    pub fn set_alloc_recorder(&mut self, recorder: Arc<dyn AllocRecorder>) {
        self.recorder = Some(recorder);
    }

    // ── internals shared with iteration ───────────────────────────

    pub(crate) fn header(&self) -> &RegionHeader {
        // SAFETY: construction verified the region is at least
        // REGION_HEADER_SIZE bytes and the base is 8-aligned; the header
        // consists entirely of atomics, so shared access is sound.
        unsafe { &*(self.base as *const RegionHeader) }
    }

    /// Raw block header at a pre-validated offset.
    fn block_at(&self, offset: u32) -> &BlockHeader {
        debug_assert!(offset >= REGION_HEADER_SIZE);
        debug_assert!(offset + BLOCK_HEADER_SIZE <= self.mem_size);
        debug_assert_eq!(offset % ALLOC_ALIGNMENT, 0);
        // SAFETY: callers validated the offset range and alignment; the
        // header consists entirely of atomics, so shared access is sound.
        unsafe { &*(self.base.add(offset as usize) as *const BlockHeader) }
    }

    /// Look up `r` as a committed block.
    ///
    /// Validates alignment, range against the current bump cursor, the
    /// committed cookie, and the recorded size. Returns `None` for
    /// anything implausible without flagging corruption: readers may
    /// legitimately hold stale references, and a reference that merely
    /// fails to validate is their problem, not the region's.
    pub(crate) fn committed_block(&self, r: Reference) -> Option<&BlockHeader> {
        let offset = r.offset();
        if offset < REGION_HEADER_SIZE || offset % ALLOC_ALIGNMENT != 0 {
            return None;
        }
        let freeptr = self.used_bytes();
        if offset.checked_add(BLOCK_HEADER_SIZE)? > freeptr {
            return None;
        }
        let block = self.block_at(offset);
        if block.cookie.load(Ordering::Acquire) != BLOCK_COOKIE {
            return None;
        }
        let size = block.size.load(Ordering::Relaxed);
        if size < BLOCK_HEADER_SIZE || size > self.page_size {
            return None;
        }
        if offset.checked_add(size)? > freeptr {
            return None;
        }
        Some(block)
    }

    /// Payload bytes of a block already validated by `committed_block`.
    pub(crate) fn payload_bytes(&self, r: Reference, block: &BlockHeader) -> &[u8] {
        let len = (block.size.load(Ordering::Relaxed) - BLOCK_HEADER_SIZE) as usize;
        let start = (r.offset() + BLOCK_HEADER_SIZE) as usize;
        // SAFETY: committed_block bounded [start, start + len) inside the
        // region, which lives as long as &self.
        unsafe { std::slice::from_raw_parts(self.base.add(start), len) }
    }

    /// Upper bound on the number of blocks that can exist in the region;
    /// the hop budget for every list traversal.
    pub(crate) fn max_block_count(&self) -> u32 {
        self.mem_size / BLOCK_HEADER_SIZE
    }

    pub(crate) fn writable(&self) -> bool {
        self.writable
    }

    /// Raise the sticky corrupt flag (persisted when writable, always in
    /// the process-local shadow).
    pub(crate) fn set_corrupt(&self) {
        self.local_corrupt.store(true, Ordering::Relaxed);
        if self.writable {
            // Relaxed: the flag guards no other data.
            self.header().flags.fetch_or(FLAG_CORRUPT, Ordering::Relaxed);
        }
    }

    fn set_full(&self) {
        // Relaxed: the flag guards no other data.
        self.header().flags.fetch_or(FLAG_FULL, Ordering::Relaxed);
    }
}
