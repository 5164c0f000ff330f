use crate::buffer::{DevicePtr, MemoryKind};
use crate::error::Result;
use crate::stream::Stream;
use crate::transfer_queue::Transfer;

/// Raw memory and copy primitives of one device.
///
/// Everything except [`MemoryBackend::memcpy_to_host`] and
/// [`MemoryBackend::synchronize`] is asynchronous: it is enqueued on the given
/// stream and returns before the device has executed it.
pub trait MemoryBackend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn create_stream(&self) -> Result<Stream>;

    fn malloc(&self, bytes: usize, kind: MemoryKind, stream: Stream) -> Result<DevicePtr>;

    /// Stream-ordered release: runs after work already enqueued on `stream`.
    fn free(&self, ptr: DevicePtr, kind: MemoryKind, stream: Stream) -> Result<()>;

    fn memcpy_async(&self, transfer: Transfer, stream: Stream) -> Result<()>;

    /// Takes ownership of the staged host bytes until the copy has executed.
    fn memcpy_from_host_async(&self, dst: DevicePtr, src: Vec<u8>, stream: Stream) -> Result<()>;

    /// Blocks until `stream` is drained, then reads `len` bytes.
    fn memcpy_to_host(&self, src: DevicePtr, len: usize, stream: Stream) -> Result<Vec<u8>>;

    fn synchronize(&self, stream: Stream) -> Result<()>;
}
