use cudarc::driver::{result, sys, CudaDevice, CudaStream, DriverError};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::backend::MemoryBackend;
use crate::buffer::{DevicePtr, MemoryKind};
use crate::error::{MemoryError, Result};
use crate::stream::Stream;
use crate::transfer_queue::{Transfer, TransferDirection};

struct StreamSlot(CudaStream);

// SAFETY: a CUstream may be used from any thread once the owning context is
// bound; every call below binds the context first.
unsafe impl Send for StreamSlot {}
unsafe impl Sync for StreamSlot {}

fn driver(e: DriverError) -> MemoryError {
    MemoryError::Driver(e.to_string())
}

/// CUDA driver backend using stream-ordered `cuMemAllocAsync`/`cuMemFreeAsync`.
pub struct CudaBackend {
    device: Arc<CudaDevice>,
    streams: DashMap<Stream, StreamSlot>,
    /// Host bytes of in-flight uploads, dropped when their stream is synchronized
    staged: DashMap<Stream, Vec<Vec<u8>>>,
    next_stream: AtomicU32,
}

impl CudaBackend {
    pub fn new(ordinal: usize) -> Result<Self> {
        info!("Initializing CUDA backend on device {}", ordinal);
        let device = CudaDevice::new(ordinal).map_err(driver)?;
        Ok(Self {
            device,
            streams: DashMap::new(),
            staged: DashMap::new(),
            next_stream: AtomicU32::new(1),
        })
    }

    fn raw_stream(&self, stream: Stream) -> Result<sys::CUstream> {
        self.device.bind_to_thread().map_err(driver)?;
        if stream.is_default() {
            return Ok(*self.device.cu_stream());
        }
        self.streams
            .get(&stream)
            .map(|slot| slot.0.stream)
            .ok_or(MemoryError::UnknownStream(stream))
    }
}

impl MemoryBackend for CudaBackend {
    fn name(&self) -> &'static str {
        "cuda"
    }

    fn create_stream(&self) -> Result<Stream> {
        let cuda_stream = self.device.fork_default_stream().map_err(driver)?;
        let stream = Stream::from_id(self.next_stream.fetch_add(1, Ordering::Relaxed));
        self.streams.insert(stream, StreamSlot(cuda_stream));
        debug!("Created {}", stream);
        Ok(stream)
    }

    fn malloc(&self, bytes: usize, kind: MemoryKind, stream: Stream) -> Result<DevicePtr> {
        if bytes == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }
        if kind == MemoryKind::PinnedHost {
            return Err(MemoryError::Driver(
                "pinned host allocation is not supported by the CUDA backend".into(),
            ));
        }
        let cu_stream = self.raw_stream(stream)?;
        let ptr = unsafe { result::malloc_async(cu_stream, bytes) }.map_err(driver)?;
        Ok(DevicePtr::new(ptr))
    }

    fn free(&self, ptr: DevicePtr, _kind: MemoryKind, stream: Stream) -> Result<()> {
        let cu_stream = self.raw_stream(stream)?;
        unsafe { result::free_async(ptr.addr(), cu_stream) }.map_err(driver)
    }

    fn memcpy_async(&self, transfer: Transfer, stream: Stream) -> Result<()> {
        if transfer.direction != TransferDirection::DeviceToDevice {
            return Err(MemoryError::Driver(format!(
                "{:?} copies are not supported by the CUDA backend",
                transfer.direction
            )));
        }
        let cu_stream = self.raw_stream(stream)?;
        unsafe {
            result::memcpy_dtod_async(transfer.dst.addr(), transfer.src.addr(), transfer.size, cu_stream)
        }
        .map_err(driver)
    }

    fn memcpy_from_host_async(&self, dst: DevicePtr, src: Vec<u8>, stream: Stream) -> Result<()> {
        let cu_stream = self.raw_stream(stream)?;
        unsafe { result::memcpy_htod_async(dst.addr(), &src[..], cu_stream) }.map_err(driver)?;
        self.staged.entry(stream).or_default().push(src);
        Ok(())
    }

    fn memcpy_to_host(&self, src: DevicePtr, len: usize, stream: Stream) -> Result<Vec<u8>> {
        let cu_stream = self.raw_stream(stream)?;
        let mut out = vec![0u8; len];
        unsafe { result::memcpy_dtoh_async(&mut out[..], src.addr(), cu_stream) }.map_err(driver)?;
        self.synchronize(stream)?;
        Ok(out)
    }

    fn synchronize(&self, stream: Stream) -> Result<()> {
        let cu_stream = self.raw_stream(stream)?;
        unsafe { result::stream::synchronize(cu_stream) }.map_err(driver)?;
        self.staged.remove(&stream);
        Ok(())
    }
}
