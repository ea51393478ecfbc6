//! Silt: a lock-free, append-only persistent memory allocator.
//!
//! Silt carves typed objects out of a caller-supplied fixed-size byte
//! region. The region may be anonymous process memory, a memory-mapped
//! file, or shared memory mapped by several processes at once. Many
//! writers allocate and publish concurrently using only atomic operations
//! on the shared bytes; any reader, including one that opens the region
//! later or after a crash, can enumerate every published object and
//! interpret it by its type tag.
//!
//! The in-memory layout is the on-disk layout. There are no pointers,
//! only offsets, and every traversal is bounded and validated, so a
//! region mangled by a hostile or crashed peer is reported through the
//! sticky corrupt flag instead of hanging or crashing the reader.
//!
//! # Quick start
//!
//! ```rust
//! use silt::{PersistentArena, SharedMem};
//!
//! // Two arenas attached to the same bytes, as two processes would be.
//! let mem = SharedMem::zeroed(1 << 20);
//! let writer = PersistentArena::attach(mem.clone(), 0, 42, "example").unwrap();
//! let reader = PersistentArena::attach_readonly(mem).unwrap();
//!
//! let r = writer.allocate(24, 7).unwrap();
//! writer.make_iterable(r);
//!
//! let found: Vec<_> = reader.iterables().collect();
//! assert_eq!(found, vec![(r, 7)]);
//! assert_eq!(reader.id(), 42);
//! assert_eq!(reader.name(), "example");
//! ```
//!
//! # Modules
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`region`] | [`PersistentArena`]: construction, allocation, typed access, health |
//! | [`iter`] | [`ArenaIterator`], [`Iterables`], lock-free publication |
//! | [`backing`] | [`SharedMem`] and the mapped-file backings |
//! | [`reference`] | [`Reference`], the validated offset type |
//! | [`stats`] | [`MemoryInfo`] and the [`AllocRecorder`] sampling hook |
//! | [`error`] | [`RegionError`] construction errors |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod backing;
pub mod error;
pub mod iter;
mod layout;
pub mod reference;
pub mod region;
pub mod stats;

pub use backing::SharedMem;
pub use error::RegionError;
pub use iter::{ArenaIterator, Iterables};
pub use layout::ALLOC_ALIGNMENT;
pub use reference::Reference;
pub use region::PersistentArena;
pub use stats::{AllocRecorder, MemoryInfo};
