//! Region construction errors.

use std::error::Error;
use std::fmt;

/// Errors that can occur while constructing an arena over a byte region.
///
/// Only construction fails loudly. Every operation after construction is
/// deliberately non-fatal: the region may be shared with an untrusted or
/// crashed peer, so runtime problems surface as `None`/`false` returns
/// and the sticky corrupt flag instead of errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegionError {
    /// Region length is below the minimum or above 2³¹ − 1 bytes.
    SizeOutOfRange {
        /// The offending region length in bytes.
        size: usize,
    },
    /// The base address of the region is not aligned for the header.
    MisalignedBase {
        /// The offending base address.
        addr: usize,
    },
    /// Page size is neither zero nor a power of two.
    BadPageSize {
        /// The offending page size.
        page_size: u32,
    },
    /// Region length is not a multiple of the page size.
    SizeNotPageMultiple {
        /// Region length in bytes.
        size: u32,
        /// Page size in bytes.
        page_size: u32,
    },
}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SizeOutOfRange { size } => {
                write!(f, "region size {size} bytes is outside the supported range")
            }
            Self::MisalignedBase { addr } => {
                write!(f, "region base address {addr:#x} is insufficiently aligned")
            }
            Self::BadPageSize { page_size } => {
                write!(f, "page size {page_size} is not a power of two")
            }
            Self::SizeNotPageMultiple { size, page_size } => {
                write!(
                    f,
                    "region size {size} is not a multiple of the page size {page_size}"
                )
            }
        }
    }
}

impl Error for RegionError {}
