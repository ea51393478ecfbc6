//! References to blocks within a region.

use std::fmt;
use std::num::NonZeroU32;

/// A reference to a block within a persistent region.
///
/// A reference is a non-zero byte offset from the start of the region,
/// always a multiple of the allocation alignment, pointing at a block
/// header. The persisted integer 0 is the "none" sentinel; at the API
/// level that case is `Option<Reference>` = `None`.
///
/// References are plain offsets, not handles: they remain meaningful
/// across processes and across re-attaches of the same bytes. Any
/// reference accepted from outside is re-validated at every use, so a
/// stale or fabricated reference yields `None`/`false` rather than a
/// crash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference(NonZeroU32);

impl Reference {
    /// Wrap a raw byte offset. Returns `None` for the 0 sentinel.
    ///
    /// No further validation happens here; the arena validates alignment,
    /// range, and the block cookie at every dereference.
    pub fn new(offset: u32) -> Option<Self> {
        NonZeroU32::new(offset).map(Self)
    }

    /// The byte offset from the start of the region.
    pub fn offset(&self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Reference> for u32 {
    fn from(r: Reference) -> Self {
        r.offset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_the_none_sentinel() {
        assert!(Reference::new(0).is_none());
    }

    #[test]
    fn offset_round_trip() {
        let r = Reference::new(65_536).unwrap();
        assert_eq!(r.offset(), 65_536);
        assert_eq!(u32::from(r), 65_536);
    }

    #[test]
    fn display_prints_the_offset() {
        let r = Reference::new(80).unwrap();
        assert_eq!(r.to_string(), "80");
    }
}
