use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::backend::MemoryBackend;
use crate::buffer::{DevicePtr, MemoryKind};
use crate::error::{MemoryError, Result};
use crate::stream::Stream;
use crate::transfer_queue::{PendingOp, Transfer, TransferQueue};

/// First address handed out. Non-zero so a null pointer is never valid.
const BASE_ADDRESS: u64 = 0x7f00_0000_0000;

/// Byte pattern of freshly allocated regions. Allocation never zeroes.
pub const UNINIT_FILL: u8 = 0xa5;

struct Region {
    kind: MemoryKind,
    bytes: Vec<u8>,
}

/// Device simulated in host memory.
///
/// Allocations are host vectors mapped into a private address space. Copies
/// and frees are not executed when enqueued: they wait in the stream's
/// [`TransferQueue`] until [`MemoryBackend::synchronize`] (or a blocking read)
/// drains that stream. Reading a destination before synchronizing therefore
/// observes stale bytes, just like reading device memory before the stream
/// has caught up.
pub struct HostBackend {
    regions: Mutex<BTreeMap<u64, Region>>,
    streams: DashMap<Stream, TransferQueue>,
    next_addr: AtomicU64,
    next_stream: AtomicU32,
    alignment: u64,
}

impl HostBackend {
    pub fn new() -> Self {
        Self::with_alignment(256)
    }

    pub fn with_alignment(alignment: usize) -> Self {
        info!("Initializing host-simulated device backend");
        info!("  Alignment: {} bytes", alignment);

        let streams = DashMap::new();
        streams.insert(Stream::DEFAULT, TransferQueue::new(Stream::DEFAULT));

        Self {
            regions: Mutex::new(BTreeMap::new()),
            streams,
            next_addr: AtomicU64::new(BASE_ADDRESS),
            next_stream: AtomicU32::new(1),
            alignment: alignment.max(1) as u64,
        }
    }

    /// Number of regions currently mapped (pooled slabs included).
    pub fn live_regions(&self) -> usize {
        self.regions.lock().len()
    }

    /// Operations enqueued on `stream` and not yet executed.
    pub fn pending(&self, stream: Stream) -> usize {
        self.streams.get(&stream).map(|q| q.len()).unwrap_or(0)
    }

    fn enqueue(&self, stream: Stream, op: PendingOp) -> Result<()> {
        let queue = self
            .streams
            .get(&stream)
            .ok_or(MemoryError::UnknownStream(stream))?;
        queue.enqueue(op);
        Ok(())
    }

    fn check_range(&self, ptr: DevicePtr, len: usize) -> Result<MemoryKind> {
        let regions = self.regions.lock();
        let (_, region) = locate(&regions, ptr, len)?;
        Ok(region.kind)
    }

    fn execute(&self, op: PendingOp) -> Result<()> {
        let mut regions = self.regions.lock();
        match op {
            PendingOp::Copy(transfer) => {
                let staged = {
                    let (offset, region) = locate(&regions, transfer.src, transfer.size)?;
                    region.bytes[offset..offset + transfer.size].to_vec()
                };
                write_bytes(&mut regions, transfer.dst, &staged)
            }
            PendingOp::HostWrite { dst, bytes } => write_bytes(&mut regions, dst, &bytes),
            PendingOp::Free { ptr } => regions
                .remove(&ptr.addr())
                .map(|_| ())
                .ok_or(MemoryError::InvalidAddress { ptr, len: 0 }),
        }
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn locate(regions: &BTreeMap<u64, Region>, ptr: DevicePtr, len: usize) -> Result<(usize, &Region)> {
    let invalid = || MemoryError::InvalidAddress { ptr, len };
    let (&base, region) = regions.range(..=ptr.addr()).next_back().ok_or_else(invalid)?;
    let offset = (ptr.addr() - base) as usize;
    if offset + len > region.bytes.len() {
        return Err(invalid());
    }
    Ok((offset, region))
}

fn write_bytes(regions: &mut BTreeMap<u64, Region>, dst: DevicePtr, bytes: &[u8]) -> Result<()> {
    let invalid = || MemoryError::InvalidAddress { ptr: dst, len: bytes.len() };
    let (&base, region) = regions.range_mut(..=dst.addr()).next_back().ok_or_else(invalid)?;
    let offset = (dst.addr() - base) as usize;
    if offset + bytes.len() > region.bytes.len() {
        return Err(invalid());
    }
    region.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
    Ok(())
}

impl MemoryBackend for HostBackend {
    fn name(&self) -> &'static str {
        "host"
    }

    fn create_stream(&self) -> Result<Stream> {
        let stream = Stream::from_id(self.next_stream.fetch_add(1, Ordering::Relaxed));
        self.streams.insert(stream, TransferQueue::new(stream));
        debug!("Created {}", stream);
        Ok(stream)
    }

    fn malloc(&self, bytes: usize, kind: MemoryKind, stream: Stream) -> Result<DevicePtr> {
        if bytes == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }
        if !self.streams.contains_key(&stream) {
            return Err(MemoryError::UnknownStream(stream));
        }

        // Leave one alignment unit unmapped after every region so an overrun
        // never lands in a neighbour.
        let span = (bytes as u64).div_ceil(self.alignment) * self.alignment + self.alignment;
        let addr = self.next_addr.fetch_add(span, Ordering::Relaxed);

        self.regions.lock().insert(
            addr,
            Region {
                kind,
                bytes: vec![UNINIT_FILL; bytes],
            },
        );

        debug!("malloc {} bytes ({:?}) at {:#x} on {}", bytes, kind, addr, stream);
        Ok(DevicePtr::new(addr))
    }

    fn free(&self, ptr: DevicePtr, _kind: MemoryKind, stream: Stream) -> Result<()> {
        self.enqueue(stream, PendingOp::Free { ptr })
    }

    fn memcpy_async(&self, transfer: Transfer, stream: Stream) -> Result<()> {
        self.check_range(transfer.src, transfer.size)?;
        self.check_range(transfer.dst, transfer.size)?;
        self.enqueue(stream, PendingOp::Copy(transfer))
    }

    fn memcpy_from_host_async(&self, dst: DevicePtr, src: Vec<u8>, stream: Stream) -> Result<()> {
        self.check_range(dst, src.len())?;
        self.enqueue(stream, PendingOp::HostWrite { dst, bytes: src })
    }

    fn memcpy_to_host(&self, src: DevicePtr, len: usize, stream: Stream) -> Result<Vec<u8>> {
        self.synchronize(stream)?;
        let regions = self.regions.lock();
        let (offset, region) = locate(&regions, src, len)?;
        Ok(region.bytes[offset..offset + len].to_vec())
    }

    fn synchronize(&self, stream: Stream) -> Result<()> {
        let ops = self
            .streams
            .get(&stream)
            .ok_or(MemoryError::UnknownStream(stream))?
            .drain();

        debug!("Synchronizing {}: {} pending operations", stream, ops.len());

        // Later operations still run after a failure; the first error is
        // reported.
        let mut first_error = None;
        for op in ops {
            if let Err(e) = self.execute(op) {
                warn!("Operation on {} failed: {}", stream, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer_queue::TransferDirection;

    #[test]
    fn copies_wait_for_synchronize() {
        let backend = HostBackend::new();
        let stream = backend.create_stream().unwrap();
        let src = backend.malloc(4, MemoryKind::Device, stream).unwrap();
        let dst = backend.malloc(4, MemoryKind::Device, stream).unwrap();

        backend
            .memcpy_from_host_async(src, vec![1, 2, 3, 4], stream)
            .unwrap();
        backend
            .memcpy_async(
                Transfer {
                    direction: TransferDirection::DeviceToDevice,
                    src,
                    dst,
                    size: 4,
                },
                stream,
            )
            .unwrap();
        assert_eq!(backend.pending(stream), 2);

        let out = backend.memcpy_to_host(dst, 4, stream).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4]);
        assert_eq!(backend.pending(stream), 0);
    }

    #[test]
    fn fresh_memory_is_not_zeroed() {
        let backend = HostBackend::new();
        let ptr = backend.malloc(3, MemoryKind::Device, Stream::DEFAULT).unwrap();
        let out = backend.memcpy_to_host(ptr, 3, Stream::DEFAULT).unwrap();
        assert_eq!(out, vec![UNINIT_FILL; 3]);
    }

    #[test]
    fn overrun_is_an_invalid_address() {
        let backend = HostBackend::new();
        let src = backend.malloc(8, MemoryKind::Device, Stream::DEFAULT).unwrap();
        let dst = backend.malloc(4, MemoryKind::Device, Stream::DEFAULT).unwrap();
        let err = backend
            .memcpy_async(
                Transfer {
                    direction: TransferDirection::DeviceToDevice,
                    src,
                    dst,
                    size: 8,
                },
                Stream::DEFAULT,
            )
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidAddress { .. }));
    }

    #[test]
    fn free_is_stream_ordered() {
        let backend = HostBackend::new();
        let ptr = backend.malloc(16, MemoryKind::Device, Stream::DEFAULT).unwrap();
        backend.free(ptr, MemoryKind::Device, Stream::DEFAULT).unwrap();
        assert_eq!(backend.live_regions(), 1);

        backend.synchronize(Stream::DEFAULT).unwrap();
        assert_eq!(backend.live_regions(), 0);
    }

    #[test]
    fn unknown_stream_is_rejected() {
        let backend = HostBackend::new();
        let err = backend
            .malloc(8, MemoryKind::Device, Stream::from_id(99))
            .unwrap_err();
        assert!(matches!(err, MemoryError::UnknownStream(_)));
        assert!(backend.synchronize(Stream::from_id(99)).is_err());
    }
}
