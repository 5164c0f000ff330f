//! Shape cloning and duplication of columns.
//!
//! `empty_like` → `allocate_like` → `copy`, each built on the previous one.
//! All device work is enqueued on the caller's stream; nothing here waits for
//! it to finish.

use gpu_memory_manager::{CopyEngine, DeviceAllocator, Stream};
use tracing::debug;

use crate::bitmask::validity_allocation_size;
use crate::catalog::{element_width, DType};
use crate::column::Column;
use crate::error::{ColumnError, Result};

fn data_allocation_size(size: usize, dtype: DType) -> Result<usize> {
    let byte_width = element_width(dtype)?;
    size.checked_mul(byte_width).ok_or_else(|| {
        ColumnError::InvalidParameter(format!(
            "{} elements of {} bytes overflow the address space",
            size, byte_width
        ))
    })
}

/// New zero-size column of the same type as `input`, without buffers.
pub fn empty_like(input: &Column) -> Result<Column> {
    input.check_well_formed()?;
    Column::empty(input.dtype(), *input.dtype_info())
}

/// New column with the size and type of `input` and freshly allocated,
/// uninitialized buffers.
///
/// A validity buffer is allocated only if `input` has one. Both allocations
/// are ordered on `stream`. Nothing is allocated for an empty input.
pub fn allocate_like<A>(input: &Column, allocator: &A, stream: Stream) -> Result<Column>
where
    A: DeviceAllocator + ?Sized,
{
    let mut output = empty_like(input)?;
    output.set_size(input.size());

    if input.size() > 0 {
        let data_bytes = data_allocation_size(input.size(), input.dtype())?;
        let data = allocator
            .allocate(data_bytes, stream)
            .map_err(ColumnError::AllocationFailure)?;

        let valid = if input.valid().is_some() {
            let valid_bytes = validity_allocation_size(input.size());
            Some(
                allocator
                    .allocate(valid_bytes, stream)
                    .map_err(ColumnError::AllocationFailure)?,
            )
        } else {
            None
        };

        debug!(
            "allocate_like: {} x {} on {} ({} data bytes, validity: {})",
            input.size(),
            input.dtype(),
            stream,
            data_bytes,
            valid.is_some()
        );
        output.set_buffers(Some(data), valid);
    }

    Ok(output)
}

/// New column holding a copy of `input`.
///
/// The data copy and then the validity copy are enqueued on `stream`; the
/// returned column's contents equal the input's once the stream has executed
/// them. Readers on other streams must synchronize first.
pub fn copy<D>(input: &Column, device: &D, stream: Stream) -> Result<Column>
where
    D: DeviceAllocator + CopyEngine + ?Sized,
{
    input.check_well_formed()?;

    let mut output = allocate_like(input, device, stream)?;

    if input.size() > 0 {
        let data_bytes = data_allocation_size(input.size(), input.dtype())?;
        if let (Some(dst), Some(src)) = (output.data_mut(), input.data()) {
            device
                .copy_async(dst, src, data_bytes, stream)
                .map_err(ColumnError::DeviceCopyFailure)?;
        }

        if let (Some(dst), Some(src)) = (output.valid_mut(), input.valid()) {
            let valid_bytes = validity_allocation_size(input.size());
            device
                .copy_async(dst, src, valid_bytes, stream)
                .map_err(ColumnError::DeviceCopyFailure)?;
        }

        debug!("copy: enqueued {} x {} on {}", input.size(), input.dtype(), stream);
    }

    output.set_null_count(input.null_count());
    Ok(output)
}
