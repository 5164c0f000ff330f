use std::fmt;

/// Handle to an ordered execution queue on a device.
///
/// Work enqueued on one stream executes in enqueue order. Nothing orders work
/// across streams; callers synchronize explicitly. A `Stream` is a plain value:
/// it is created by a backend and threaded through every operation that
/// allocates or copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Stream {
    id: u32,
}

impl Stream {
    /// The per-device default stream. Always valid.
    pub const DEFAULT: Stream = Stream { id: 0 };

    pub(crate) const fn from_id(id: u32) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_default(&self) -> bool {
        self.id == 0
    }
}

impl Default for Stream {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.id)
    }
}
