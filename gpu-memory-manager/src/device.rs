use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::MemoryBackend;
use crate::buffer::{BufferRelease, DeviceBuffer, DevicePtr, MemoryKind, Reservation};
use crate::config::MemoryConfig;
use crate::error::{MemoryError, Result};
use crate::host_backend::HostBackend;
use crate::slab_allocator::{PoolStats, SlabAllocator};
use crate::stream::Stream;
use crate::transfer_queue::{Transfer, TransferDirection};

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Stream-ordered allocation of device memory.
pub trait DeviceAllocator {
    /// Allocate `bytes` of uninitialized device memory, ordered on `stream`.
    fn allocate(&self, bytes: usize, stream: Stream) -> Result<DeviceBuffer>;
}

/// Asynchronous byte copies between buffers.
pub trait CopyEngine {
    /// Enqueue a copy of the first `bytes` of `src` into `dst` on `stream`.
    /// The direction is taken from the two buffers' [`MemoryKind`]s.
    fn copy_async(&self, dst: &mut DeviceBuffer, src: &DeviceBuffer, bytes: usize, stream: Stream) -> Result<()>;

    /// Enqueue a copy of host bytes into `dst`. `src` is staged, so the
    /// caller may reuse it as soon as this returns.
    fn copy_from_host_async(&self, dst: &mut DeviceBuffer, src: &[u8], stream: Stream) -> Result<()>;

    /// Wait for `stream`, then read the first `bytes` of `src`.
    fn copy_to_host(&self, src: &DeviceBuffer, bytes: usize, stream: Stream) -> Result<Vec<u8>>;

    /// Block until all work enqueued on `stream` has executed.
    fn synchronize(&self, stream: Stream) -> Result<()>;
}

/// One device: a backend plus the slab pool in front of it.
///
/// Cloning is cheap and yields another handle to the same device.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

struct DeviceInner {
    id: u64,
    backend: Arc<dyn MemoryBackend>,
    pool: SlabAllocator,
}

impl BufferRelease for DeviceInner {
    fn release(&self, ptr: DevicePtr, reservation: Reservation, _kind: MemoryKind, stream: Stream) {
        if let Err(e) = self.pool.free(ptr, reservation, stream) {
            warn!("Failed to release buffer {} on {}: {}", ptr, stream, e);
        }
    }
}

impl Device {
    pub fn new(backend: Arc<dyn MemoryBackend>, config: MemoryConfig) -> Result<Self> {
        let id = NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed);
        info!("Opening device {} ({} backend)", id, backend.name());

        let pool = SlabAllocator::new(backend.clone(), &config)?;
        Ok(Self {
            inner: Arc::new(DeviceInner { id, backend, pool }),
        })
    }

    /// Device simulated in host memory.
    pub fn host(config: MemoryConfig) -> Result<Self> {
        let backend = Arc::new(HostBackend::with_alignment(config.alignment));
        Self::new(backend, config)
    }

    /// CUDA device `ordinal`.
    #[cfg(feature = "cuda")]
    pub fn cuda(ordinal: usize, config: MemoryConfig) -> Result<Self> {
        let backend = Arc::new(crate::cuda_backend::CudaBackend::new(ordinal)?);
        Self::new(backend, config)
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.backend.name()
    }

    pub fn create_stream(&self) -> Result<Stream> {
        self.inner.backend.create_stream()
    }

    /// Allocate pinned host memory usable as a copy source or destination.
    pub fn allocate_host(&self, bytes: usize) -> Result<DeviceBuffer> {
        if bytes == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }
        let ptr = self
            .inner
            .backend
            .malloc(bytes, MemoryKind::PinnedHost, Stream::DEFAULT)?;
        Ok(self.wrap(ptr, bytes, MemoryKind::PinnedHost, Reservation::Host { size: bytes }, Stream::DEFAULT))
    }

    /// Allocate a device buffer and enqueue a copy of `bytes` into it.
    pub fn upload(&self, bytes: &[u8], stream: Stream) -> Result<DeviceBuffer> {
        let mut buffer = self.allocate(bytes.len(), stream)?;
        self.copy_from_host_async(&mut buffer, bytes, stream)?;
        Ok(buffer)
    }

    /// Read back the whole of `buffer` once `stream` has drained.
    pub fn download(&self, buffer: &DeviceBuffer, stream: Stream) -> Result<Vec<u8>> {
        self.copy_to_host(buffer, buffer.len(), stream)
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    /// Return pooled slabs to the backend.
    pub fn trim(&self) -> Result<usize> {
        self.inner.pool.trim()
    }

    fn wrap(
        &self,
        ptr: DevicePtr,
        len: usize,
        kind: MemoryKind,
        reservation: Reservation,
        stream: Stream,
    ) -> DeviceBuffer {
        let owner: Arc<dyn BufferRelease> = self.inner.clone();
        DeviceBuffer::new(ptr, len, kind, reservation, stream, self.inner.id, owner)
    }

    fn check_owner(&self, buffer: &DeviceBuffer) -> Result<()> {
        if buffer.device_id() != self.inner.id {
            return Err(MemoryError::ForeignBuffer {
                owner: buffer.device_id(),
                device: self.inner.id,
            });
        }
        Ok(())
    }
}

impl DeviceAllocator for Device {
    fn allocate(&self, bytes: usize, stream: Stream) -> Result<DeviceBuffer> {
        let (ptr, reservation) = self.inner.pool.allocate(bytes, stream)?;
        debug!("Allocated {} bytes at {} on {} ({:?})", bytes, ptr, stream, reservation);
        Ok(self.wrap(ptr, bytes, MemoryKind::Device, reservation, stream))
    }
}

impl CopyEngine for Device {
    fn copy_async(&self, dst: &mut DeviceBuffer, src: &DeviceBuffer, bytes: usize, stream: Stream) -> Result<()> {
        self.check_owner(dst)?;
        self.check_owner(src)?;
        for capacity in [src.len(), dst.len()] {
            if bytes > capacity {
                return Err(MemoryError::CopyOutOfBounds { bytes, capacity });
            }
        }
        if bytes == 0 {
            return Ok(());
        }

        let transfer = Transfer {
            direction: TransferDirection::between(src.kind(), dst.kind()),
            src: src.ptr(),
            dst: dst.ptr(),
            size: bytes,
        };
        self.inner.backend.memcpy_async(transfer, stream)
    }

    fn copy_from_host_async(&self, dst: &mut DeviceBuffer, src: &[u8], stream: Stream) -> Result<()> {
        self.check_owner(dst)?;
        if src.len() > dst.len() {
            return Err(MemoryError::CopyOutOfBounds {
                bytes: src.len(),
                capacity: dst.len(),
            });
        }
        if src.is_empty() {
            return Ok(());
        }
        self.inner
            .backend
            .memcpy_from_host_async(dst.ptr(), src.to_vec(), stream)
    }

    fn copy_to_host(&self, src: &DeviceBuffer, bytes: usize, stream: Stream) -> Result<Vec<u8>> {
        self.check_owner(src)?;
        if bytes > src.len() {
            return Err(MemoryError::CopyOutOfBounds {
                bytes,
                capacity: src.len(),
            });
        }
        if bytes == 0 {
            return Ok(Vec::new());
        }
        self.inner.backend.memcpy_to_host(src.ptr(), bytes, stream)
    }

    fn synchronize(&self, stream: Stream) -> Result<()> {
        self.inner.backend.synchronize(stream)
    }
}
