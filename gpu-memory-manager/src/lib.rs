//! Device memory for columnar data.
//!
//! A [`Device`] pairs a [`MemoryBackend`] (real CUDA behind the `cuda`
//! feature, or [`HostBackend`], a device simulated in host memory) with a
//! stream-ordered [`SlabAllocator`]. Allocations come back as owned
//! [`DeviceBuffer`]s; copies are enqueued on a [`Stream`] and only observed
//! after the caller synchronizes that stream.

pub mod backend;
pub mod buffer;
pub mod config;
#[cfg(feature = "cuda")]
pub mod cuda_backend;
pub mod device;
pub mod error;
pub mod host_backend;
pub mod slab_allocator;
pub mod stream;
pub mod transfer_queue;

pub use backend::MemoryBackend;
pub use buffer::{DeviceBuffer, DevicePtr, MemoryKind, Reservation};
pub use config::MemoryConfig;
#[cfg(feature = "cuda")]
pub use cuda_backend::CudaBackend;
pub use device::{CopyEngine, Device, DeviceAllocator};
pub use error::{MemoryError, Result};
pub use host_backend::HostBackend;
pub use slab_allocator::{PoolStats, SlabAllocator};
pub use stream::Stream;
pub use transfer_queue::{TransferDirection, TransferQueue};
