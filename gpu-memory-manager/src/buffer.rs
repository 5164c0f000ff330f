use std::fmt;
use std::sync::Arc;

use crate::stream::Stream;

/// Raw address in a backend's address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DevicePtr(u64);

impl DevicePtr {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub fn addr(self) -> u64 {
        self.0
    }

    pub fn offset(self, bytes: usize) -> Self {
        Self(self.0 + bytes as u64)
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Where a buffer lives. Transfer direction is derived from the kinds of the
/// two buffers involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    Device,
    /// Page-locked host memory, addressable by the copy engine.
    PinnedHost,
}

/// How the bytes behind a buffer were obtained from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// A slab of `size` bytes from size class `class`.
    Slab { class: usize, size: usize },
    /// Larger than the largest slab class; served by the backend directly.
    Oversize { size: usize },
    /// Pinned host staging memory; never pooled.
    Host { size: usize },
}

impl Reservation {
    pub fn reserved_bytes(&self) -> usize {
        match *self {
            Reservation::Slab { size, .. }
            | Reservation::Oversize { size }
            | Reservation::Host { size } => size,
        }
    }
}

/// Receives buffers back when their owner drops them.
pub(crate) trait BufferRelease: Send + Sync {
    fn release(&self, ptr: DevicePtr, reservation: Reservation, kind: MemoryKind, stream: Stream);
}

/// Owned handle to a region of device (or pinned host) memory.
///
/// A `DeviceBuffer` cannot be cloned: exactly one holder owns the region.
/// Moving it moves ownership. Dropping it hands the region back to the pool of
/// the device that produced it, stream-ordered on the stream it was allocated
/// on, so work already enqueued on that stream still sees valid memory.
pub struct DeviceBuffer {
    ptr: DevicePtr,
    len: usize,
    kind: MemoryKind,
    reservation: Reservation,
    stream: Stream,
    device_id: u64,
    owner: Arc<dyn BufferRelease>,
}

impl DeviceBuffer {
    pub(crate) fn new(
        ptr: DevicePtr,
        len: usize,
        kind: MemoryKind,
        reservation: Reservation,
        stream: Stream,
        device_id: u64,
        owner: Arc<dyn BufferRelease>,
    ) -> Self {
        Self {
            ptr,
            len,
            kind,
            reservation,
            stream,
            device_id,
            owner,
        }
    }

    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    /// Requested size in bytes. The pool may hold more (see [`Self::reservation`]).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn kind(&self) -> MemoryKind {
        self.kind
    }

    pub fn reservation(&self) -> Reservation {
        self.reservation
    }

    /// Stream the buffer was allocated on and will be released on.
    pub fn stream(&self) -> Stream {
        self.stream
    }

    pub fn device_id(&self) -> u64 {
        self.device_id
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        self.owner
            .release(self.ptr, self.reservation, self.kind, self.stream);
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("kind", &self.kind)
            .field("reservation", &self.reservation)
            .field("stream", &self.stream)
            .field("device_id", &self.device_id)
            .finish()
    }
}
