use thiserror::Error;

use crate::buffer::DevicePtr;
use crate::stream::Stream;

/// Failures reported by the memory pool, the backends and the copy engine.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("out of device memory: requested {requested} bytes, {available} bytes available")]
    OutOfMemory { requested: usize, available: usize },

    #[error("maximum number of slabs ({max_slabs}) reached for class {class}")]
    SlabsExhausted { class: usize, max_slabs: usize },

    #[error("zero-sized allocation requested")]
    ZeroSizedAllocation,

    #[error("unknown stream {0}")]
    UnknownStream(Stream),

    #[error("invalid memory reference {ptr} (+{len} bytes)")]
    InvalidAddress { ptr: DevicePtr, len: usize },

    #[error("transfer of {bytes} bytes overruns buffer of {capacity} bytes")]
    CopyOutOfBounds { bytes: usize, capacity: usize },

    #[error("buffer was allocated by device {owner}, not device {device}")]
    ForeignBuffer { owner: u64, device: u64 },

    #[error("invalid memory configuration: {0}")]
    InvalidConfig(String),

    #[error("device driver error: {0}")]
    Driver(String),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
