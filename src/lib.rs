//! Device-resident columns: describe, allocate and duplicate typed, nullable
//! arrays living in stream-ordered device memory.
//!
//! This crate re-exports the workspace members:
//!
//! * [`memory`]: devices, streams, owned buffers and the slab pool;
//! * [`column`]: the column descriptor and `empty_like` / `allocate_like` /
//!   `copy`;
//! * [`interop`]: Arrow staging.

pub use arrow_interop as interop;
pub use gpu_column_core as column;
pub use gpu_memory_manager as memory;

pub use gpu_column_core::{
    allocate_like, copy, empty_like, Column, ColumnError, DType, HostColumn, TimeUnit,
    TypeMetadata,
};
pub use gpu_memory_manager::{
    CopyEngine, Device, DeviceAllocator, DeviceBuffer, MemoryConfig, MemoryError, Stream,
};
