use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::MemoryBackend;
use crate::buffer::{DevicePtr, MemoryKind, Reservation};
use crate::config::MemoryConfig;
use crate::error::{MemoryError, Result};
use crate::stream::Stream;

/// Stream-ordered slab allocator for device memory
///
/// Manages memory in fixed-size slabs to reduce fragmentation and keep
/// allocation off the driver's synchronous path. Freed slabs go to a free list
/// local to the stream they were released on; a later request on the same
/// stream may reuse them immediately because the stream itself orders the
/// reuse after the previous owner's work. Slabs parked on another stream are
/// only taken after that stream has been synchronized.
pub struct SlabAllocator {
    backend: Arc<dyn MemoryBackend>,
    slab_classes: Vec<SlabClass>,
    memory_limit: usize,
    alignment: usize,
    reserved: Mutex<usize>,
}

struct SlabClass {
    size: usize,
    free_slabs: Mutex<HashMap<Stream, VecDeque<DevicePtr>>>,
    max_slabs: usize,
    allocated_count: Mutex<usize>,
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Bytes currently held from the backend, pooled slabs included
    pub reserved_bytes: usize,
    /// Slabs sitting on free lists
    pub pooled_slabs: usize,
    /// Slabs held from the backend, in use or pooled
    pub allocated_slabs: usize,
}

impl SlabAllocator {
    pub fn new(backend: Arc<dyn MemoryBackend>, config: &MemoryConfig) -> Result<Self> {
        config.validate()?;

        info!("Initializing Slab Allocator on {} backend", backend.name());
        info!("  Slab sizes: {:?}", config.slab_sizes);
        info!("  Max slabs per class: {}", config.max_slabs_per_class);
        info!("  Memory limit: {} bytes", config.memory_limit);

        let slab_classes = config
            .slab_sizes
            .iter()
            .map(|&size| SlabClass {
                size,
                free_slabs: Mutex::new(HashMap::new()),
                max_slabs: config.max_slabs_per_class,
                allocated_count: Mutex::new(0),
            })
            .collect();

        Ok(Self {
            backend,
            slab_classes,
            memory_limit: config.memory_limit,
            alignment: config.alignment,
            reserved: Mutex::new(0),
        })
    }

    /// Allocate `size` bytes for use on `stream`.
    pub fn allocate(&self, size: usize, stream: Stream) -> Result<(DevicePtr, Reservation)> {
        if size == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }

        let Some(class_idx) = self.find_slab_class(size) else {
            return self.allocate_oversize(size, stream);
        };
        let slab_class = &self.slab_classes[class_idx];
        let reservation = Reservation::Slab {
            class: class_idx,
            size: slab_class.size,
        };

        if let Some(ptr) = slab_class
            .free_slabs
            .lock()
            .get_mut(&stream)
            .and_then(|list| list.pop_front())
        {
            debug!("Reusing slab from class {} (size {}) on {}", class_idx, slab_class.size, stream);
            return Ok((ptr, reservation));
        }

        match self.allocate_new_slab(slab_class, class_idx, stream) {
            Ok(ptr) => Ok((ptr, reservation)),
            Err(err @ (MemoryError::OutOfMemory { .. } | MemoryError::SlabsExhausted { .. })) => {
                match self.steal_slab(slab_class, class_idx, stream)? {
                    Some(ptr) => Ok((ptr, reservation)),
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Return memory to the pool, stream-ordered on `stream`.
    pub fn free(&self, ptr: DevicePtr, reservation: Reservation, stream: Stream) -> Result<()> {
        match reservation {
            Reservation::Slab { class, .. } => {
                let slab_class = self.slab_classes.get(class).ok_or_else(|| {
                    MemoryError::InvalidConfig(format!("invalid slab class index: {}", class))
                })?;
                debug!("Returning slab to pool (class {}) on {}", class, stream);
                slab_class
                    .free_slabs
                    .lock()
                    .entry(stream)
                    .or_default()
                    .push_back(ptr);
                Ok(())
            }
            Reservation::Oversize { size } => {
                debug!("Freeing oversize allocation of {} bytes on {}", size, stream);
                self.backend.free(ptr, MemoryKind::Device, stream)?;
                self.unreserve(size);
                Ok(())
            }
            Reservation::Host { size } => {
                self.backend.free(ptr, MemoryKind::PinnedHost, stream)?;
                debug!("Freed {} bytes of pinned host memory on {}", size, stream);
                Ok(())
            }
        }
    }

    /// Release every pooled slab back to the backend. Returns the number of
    /// bytes released.
    pub fn trim(&self) -> Result<usize> {
        let mut released = 0;
        for (idx, slab_class) in self.slab_classes.iter().enumerate() {
            let drained: Vec<(Stream, VecDeque<DevicePtr>)> =
                slab_class.free_slabs.lock().drain().collect();
            for (stream, slabs) in drained {
                for ptr in slabs {
                    self.backend.free(ptr, MemoryKind::Device, stream)?;
                    *slab_class.allocated_count.lock() -= 1;
                    self.unreserve(slab_class.size);
                    released += slab_class.size;
                }
            }
            debug!("Trimmed slab class {}", idx);
        }
        Ok(released)
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            reserved_bytes: *self.reserved.lock(),
            ..PoolStats::default()
        };
        for slab_class in &self.slab_classes {
            stats.pooled_slabs += slab_class.free_slabs.lock().values().map(VecDeque::len).sum::<usize>();
            stats.allocated_slabs += *slab_class.allocated_count.lock();
        }
        stats
    }

    fn find_slab_class(&self, size: usize) -> Option<usize> {
        self.slab_classes
            .iter()
            .position(|slab_class| slab_class.size >= size)
    }

    fn allocate_new_slab(&self, slab_class: &SlabClass, class_idx: usize, stream: Stream) -> Result<DevicePtr> {
        let mut count = slab_class.allocated_count.lock();

        if *count >= slab_class.max_slabs {
            return Err(MemoryError::SlabsExhausted {
                class: class_idx,
                max_slabs: slab_class.max_slabs,
            });
        }

        debug!("Allocating new slab for class {} (size {}) on {}", class_idx, slab_class.size, stream);

        self.reserve(slab_class.size)?;
        let ptr = match self.backend.malloc(slab_class.size, MemoryKind::Device, stream) {
            Ok(ptr) => ptr,
            Err(e) => {
                self.unreserve(slab_class.size);
                return Err(e);
            }
        };

        *count += 1;

        Ok(ptr)
    }

    /// Take a slab parked on another stream once that stream has drained.
    fn steal_slab(&self, slab_class: &SlabClass, class_idx: usize, stream: Stream) -> Result<Option<DevicePtr>> {
        let candidate = {
            let mut free_slabs = slab_class.free_slabs.lock();
            free_slabs
                .iter_mut()
                .find(|(other, list)| **other != stream && !list.is_empty())
                .and_then(|(other, list)| list.pop_front().map(|ptr| (*other, ptr)))
        };

        let Some((owner, ptr)) = candidate else {
            return Ok(None);
        };

        debug!("Stealing slab of class {} from {} for {}", class_idx, owner, stream);
        if let Err(e) = self.backend.synchronize(owner) {
            slab_class
                .free_slabs
                .lock()
                .entry(owner)
                .or_default()
                .push_front(ptr);
            return Err(e);
        }
        Ok(Some(ptr))
    }

    fn allocate_oversize(&self, size: usize, stream: Stream) -> Result<(DevicePtr, Reservation)> {
        let reserved = size.div_ceil(self.alignment) * self.alignment;
        debug!("Oversize allocation of {} bytes ({} reserved) on {}", size, reserved, stream);

        self.reserve(reserved)?;
        match self.backend.malloc(reserved, MemoryKind::Device, stream) {
            Ok(ptr) => Ok((ptr, Reservation::Oversize { size: reserved })),
            Err(e) => {
                self.unreserve(reserved);
                Err(e)
            }
        }
    }

    fn reserve(&self, bytes: usize) -> Result<()> {
        let mut reserved = self.reserved.lock();
        let available = self.memory_limit.saturating_sub(*reserved);
        if bytes > available {
            return Err(MemoryError::OutOfMemory {
                requested: bytes,
                available,
            });
        }
        *reserved += bytes;
        Ok(())
    }

    fn unreserve(&self, bytes: usize) {
        let mut reserved = self.reserved.lock();
        *reserved = reserved.saturating_sub(bytes);
    }
}

impl Drop for SlabAllocator {
    fn drop(&mut self) {
        info!("Shutting down Slab Allocator");

        for (idx, slab_class) in self.slab_classes.iter().enumerate() {
            let pooled: usize = slab_class.free_slabs.lock().values().map(VecDeque::len).sum();
            info!("  Class {}: {} free slabs", idx, pooled);
        }

        if let Err(e) = self.trim() {
            warn!("Failed to release pooled slabs: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_backend::HostBackend;

    fn pool(config: MemoryConfig) -> (Arc<HostBackend>, SlabAllocator) {
        let backend = Arc::new(HostBackend::new());
        let allocator = SlabAllocator::new(backend.clone(), &config).unwrap();
        (backend, allocator)
    }

    fn small_config() -> MemoryConfig {
        MemoryConfig::default()
            .with_slab_sizes(vec![1024, 4096, 16384])
            .with_max_slabs_per_class(2)
            .with_memory_limit(64 * 1024)
    }

    #[test]
    fn test_slab_class_selection() {
        let (_, allocator) = pool(small_config());

        assert_eq!(allocator.find_slab_class(500), Some(0));
        assert_eq!(allocator.find_slab_class(1024), Some(0));
        assert_eq!(allocator.find_slab_class(2000), Some(1));
        assert_eq!(allocator.find_slab_class(10000), Some(2));
        assert_eq!(allocator.find_slab_class(20000), None);
    }

    #[test]
    fn freed_slab_is_reused_on_same_stream() {
        let (_, allocator) = pool(small_config());

        let (ptr, reservation) = allocator.allocate(100, Stream::DEFAULT).unwrap();
        allocator.free(ptr, reservation, Stream::DEFAULT).unwrap();

        let (again, _) = allocator.allocate(200, Stream::DEFAULT).unwrap();
        assert_eq!(again, ptr);
        assert_eq!(allocator.stats().allocated_slabs, 1);
    }

    #[test]
    fn freed_slab_is_not_reused_across_streams_while_room_remains() {
        let (backend, allocator) = pool(small_config());
        let other = backend.create_stream().unwrap();

        let (ptr, reservation) = allocator.allocate(100, Stream::DEFAULT).unwrap();
        allocator.free(ptr, reservation, Stream::DEFAULT).unwrap();

        let (fresh, _) = allocator.allocate(100, other).unwrap();
        assert_ne!(fresh, ptr);
        assert_eq!(allocator.stats().pooled_slabs, 1);
    }

    #[test]
    fn exhausted_class_steals_from_other_stream() {
        let (backend, allocator) = pool(small_config());
        let other = backend.create_stream().unwrap();

        let (a, ra) = allocator.allocate(100, Stream::DEFAULT).unwrap();
        let (_b, _) = allocator.allocate(100, Stream::DEFAULT).unwrap();
        allocator.free(a, ra, Stream::DEFAULT).unwrap();

        let (stolen, _) = allocator.allocate(100, other).unwrap();
        assert_eq!(stolen, a);
    }

    #[test]
    fn class_limit_is_enforced() {
        let (_, allocator) = pool(small_config());

        allocator.allocate(100, Stream::DEFAULT).unwrap();
        allocator.allocate(100, Stream::DEFAULT).unwrap();
        let err = allocator.allocate(100, Stream::DEFAULT).unwrap_err();
        assert!(matches!(err, MemoryError::SlabsExhausted { class: 0, max_slabs: 2 }));
    }

    #[test]
    fn memory_limit_is_enforced() {
        let config = small_config().with_memory_limit(2048);
        let (_, allocator) = pool(config);

        let err = allocator.allocate(100_000, Stream::DEFAULT).unwrap_err();
        assert!(matches!(err, MemoryError::OutOfMemory { .. }));
        assert_eq!(allocator.stats().reserved_bytes, 0);
    }

    #[test]
    fn oversize_requests_bypass_slabs() {
        let (_, allocator) = pool(small_config());

        let (ptr, reservation) = allocator.allocate(20_000, Stream::DEFAULT).unwrap();
        assert_eq!(reservation, Reservation::Oversize { size: 20_224 });
        assert_eq!(allocator.stats().reserved_bytes, 20_224);

        allocator.free(ptr, reservation, Stream::DEFAULT).unwrap();
        assert_eq!(allocator.stats().reserved_bytes, 0);
    }

    #[test]
    fn trim_returns_pooled_slabs() {
        let (backend, allocator) = pool(small_config());

        let (ptr, reservation) = allocator.allocate(100, Stream::DEFAULT).unwrap();
        allocator.free(ptr, reservation, Stream::DEFAULT).unwrap();

        assert_eq!(allocator.trim().unwrap(), 1024);
        backend.synchronize(Stream::DEFAULT).unwrap();
        assert_eq!(backend.live_regions(), 0);
        assert_eq!(allocator.stats(), PoolStats::default());
    }
}
