use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Debug identifier of an I/O request, as shown in the requests listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DebugId(u32);

impl DebugId {
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for DebugId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Thread-safe debug-ID generator
///
/// Ids start at 1. The counter wraps after `u32::MAX`, which is treated as
/// unreachable for the lifetime of a process.
#[derive(Debug)]
pub struct IdGen {
    next_id: AtomicU32,
}

impl IdGen {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
        }
    }

    /// Get the next unique ID
    pub fn get_next(&self) -> DebugId {
        DebugId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGen {
    fn default() -> Self {
        Self::new()
    }
}
