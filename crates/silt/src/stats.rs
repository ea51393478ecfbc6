//! Usage reporting and the allocation sampling hook.

/// Point-in-time memory usage of a region.
///
/// Produced by [`crate::PersistentArena::memory_info`]. The snapshot may
/// race with concurrent allocation: each field is individually accurate,
/// but the pair is not mutually consistent under contention.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryInfo {
    /// Total bytes of the attached region.
    pub total: u32,
    /// Bytes not yet claimed by the bump cursor.
    pub free: u32,
}

/// Sink for per-call allocation samples.
///
/// [`crate::PersistentArena::allocate`] reports every call exactly once:
/// the requested size on success, 0 on any rejection (invalid request,
/// region full, or read-only). The histogram subsystem that aggregates
/// samples lives outside this crate; anything implementing this trait
/// can listen.
pub trait AllocRecorder: Send + Sync {
    /// Record one allocation attempt of `size` requested bytes (0 = rejected).
    fn record(&self, size: u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_memory_info_is_zero() {
        let info = MemoryInfo::default();
        assert_eq!(info.total, 0);
        assert_eq!(info.free, 0);
    }
}
