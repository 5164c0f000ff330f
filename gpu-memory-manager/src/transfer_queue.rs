use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::debug;

use crate::buffer::{DevicePtr, MemoryKind};
use crate::stream::Stream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    HostToDevice,
    DeviceToHost,
    DeviceToDevice,
    HostToHost,
}

impl TransferDirection {
    /// Direction of a copy from `src` memory to `dst` memory.
    pub fn between(src: MemoryKind, dst: MemoryKind) -> Self {
        match (src, dst) {
            (MemoryKind::PinnedHost, MemoryKind::Device) => TransferDirection::HostToDevice,
            (MemoryKind::Device, MemoryKind::PinnedHost) => TransferDirection::DeviceToHost,
            (MemoryKind::Device, MemoryKind::Device) => TransferDirection::DeviceToDevice,
            (MemoryKind::PinnedHost, MemoryKind::PinnedHost) => TransferDirection::HostToHost,
        }
    }
}

/// One byte copy between two backend addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub direction: TransferDirection,
    pub src: DevicePtr,
    pub dst: DevicePtr,
    pub size: usize,
}

/// Work item waiting on a stream.
#[derive(Debug)]
pub enum PendingOp {
    Copy(Transfer),
    /// Host bytes staged at enqueue time, written to `dst` when executed.
    HostWrite { dst: DevicePtr, bytes: Vec<u8> },
    Free { ptr: DevicePtr },
}

/// FIFO of work enqueued on one stream but not yet executed.
///
/// Backends that cannot execute asynchronously on their own (the host
/// simulation) park work here and drain it when the stream is synchronized,
/// which gives exactly the same-stream ordering a device queue provides.
pub struct TransferQueue {
    stream: Stream,
    queue: Mutex<VecDeque<PendingOp>>,
}

impl TransferQueue {
    pub fn new(stream: Stream) -> Self {
        Self {
            stream,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn stream(&self) -> Stream {
        self.stream
    }

    /// Enqueue an async operation
    pub fn enqueue(&self, op: PendingOp) {
        match &op {
            PendingOp::Copy(transfer) => debug!(
                "{:?} transfer: {} bytes {} -> {} on {}",
                transfer.direction, transfer.size, transfer.src, transfer.dst, self.stream
            ),
            PendingOp::HostWrite { dst, bytes } => debug!(
                "HostToDevice staging write: {} bytes -> {} on {}",
                bytes.len(),
                dst,
                self.stream
            ),
            PendingOp::Free { ptr } => debug!("Stream-ordered free of {} on {}", ptr, self.stream),
        }
        self.queue.lock().push_back(op);
    }

    /// Take every pending operation, oldest first.
    pub fn drain(&self) -> Vec<PendingOp> {
        self.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}
