use gpu_memory_manager::{CopyEngine, DeviceAllocator, DeviceBuffer, Stream};
use tracing::debug;

use crate::bitmask::{count_valid, pack_validity, unpack_validity, validity_allocation_size};
use crate::catalog::{element_width, validate_type_view, DType, TypeMetadata};
use crate::column_expects;
use crate::error::{ColumnError, Result};

/// A typed, nullable array in device memory.
///
/// The column owns its buffers: `data` holds `size` elements of
/// [`element_width`] bytes each, `valid` (if present) holds the bit-packed
/// validity mask. A well-formed column has `data` set exactly when `size > 0`.
/// Nothing here frees the buffers; they go back to their device's pool when
/// the column (or a buffer taken out of it) is dropped.
#[derive(Debug)]
pub struct Column {
    size: usize,
    data: Option<DeviceBuffer>,
    valid: Option<DeviceBuffer>,
    null_count: usize,
    dtype: DType,
    dtype_info: TypeMetadata,
}

/// Host-side copy of a column's contents.
#[derive(Debug, Clone, PartialEq)]
pub struct HostColumn {
    pub dtype: DType,
    pub dtype_info: TypeMetadata,
    pub size: usize,
    pub data: Vec<u8>,
    /// One flag per element, `None` when the column carries no mask.
    pub valid: Option<Vec<bool>>,
    pub null_count: usize,
}

impl Column {
    /// Assemble a column from raw parts. No invariant is checked here; the
    /// column operations check their inputs.
    pub fn from_parts(
        size: usize,
        data: Option<DeviceBuffer>,
        valid: Option<DeviceBuffer>,
        null_count: usize,
        dtype: DType,
        dtype_info: TypeMetadata,
    ) -> Self {
        Self {
            size,
            data,
            valid,
            null_count,
            dtype,
            dtype_info,
        }
    }

    /// Zero-size column without buffers.
    pub fn empty(dtype: DType, dtype_info: TypeMetadata) -> Result<Self> {
        validate_type_view(dtype, &dtype_info)?;
        Ok(Self::from_parts(0, None, None, 0, dtype, dtype_info))
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn data(&self) -> Option<&DeviceBuffer> {
        self.data.as_ref()
    }

    pub fn valid(&self) -> Option<&DeviceBuffer> {
        self.valid.as_ref()
    }

    pub fn has_validity(&self) -> bool {
        self.valid.is_some()
    }

    pub fn null_count(&self) -> usize {
        self.null_count
    }

    pub fn set_null_count(&mut self, null_count: usize) {
        self.null_count = null_count;
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn dtype_info(&self) -> &TypeMetadata {
        &self.dtype_info
    }

    pub fn byte_width(&self) -> Result<usize> {
        element_width(self.dtype)
    }

    /// Size of the data buffer implied by `size` and the element width.
    pub fn data_bytes(&self) -> Result<usize> {
        Ok(self.size * self.byte_width()?)
    }

    /// Size of the validity allocation, zero when there is no mask.
    pub fn validity_bytes(&self) -> usize {
        if self.valid.is_some() {
            validity_allocation_size(self.size)
        } else {
            0
        }
    }

    /// A non-empty column must carry a data buffer.
    pub fn check_well_formed(&self) -> Result<()> {
        column_expects!(self.size == 0 || self.data.is_some(), InvalidState, "Null input data");
        Ok(())
    }

    /// Give up the buffers; the caller becomes their owner.
    pub fn into_buffers(self) -> (Option<DeviceBuffer>, Option<DeviceBuffer>) {
        (self.data, self.valid)
    }

    pub(crate) fn set_size(&mut self, size: usize) {
        self.size = size;
    }

    pub(crate) fn set_buffers(&mut self, data: Option<DeviceBuffer>, valid: Option<DeviceBuffer>) {
        self.data = data;
        self.valid = valid;
    }

    pub(crate) fn data_mut(&mut self) -> Option<&mut DeviceBuffer> {
        self.data.as_mut()
    }

    pub(crate) fn valid_mut(&mut self) -> Option<&mut DeviceBuffer> {
        self.valid.as_mut()
    }

    /// Upload host bytes as a new column on `stream`.
    ///
    /// `data` must hold a whole number of elements; `valid`, if given, must
    /// have one flag per element. The uploads are enqueued, not complete.
    pub fn from_host<D>(
        device: &D,
        stream: Stream,
        dtype: DType,
        dtype_info: TypeMetadata,
        data: &[u8],
        valid: Option<&[bool]>,
    ) -> Result<Self>
    where
        D: DeviceAllocator + CopyEngine,
    {
        validate_type_view(dtype, &dtype_info)?;
        let width = element_width(dtype)?;
        column_expects!(
            data.len() % width == 0,
            InvalidParameter,
            "{} bytes is not a whole number of {}-byte {} elements",
            data.len(),
            width,
            dtype
        );
        let size = data.len() / width;
        if let Some(valid) = valid {
            column_expects!(
                valid.len() == size,
                InvalidParameter,
                "validity has {} flags for {} elements",
                valid.len(),
                size
            );
        }

        let mut column = Self::from_parts(size, None, None, 0, dtype, dtype_info);
        if size == 0 {
            return Ok(column);
        }

        let mut data_buf = device
            .allocate(data.len(), stream)
            .map_err(ColumnError::AllocationFailure)?;
        device
            .copy_from_host_async(&mut data_buf, data, stream)
            .map_err(ColumnError::DeviceCopyFailure)?;

        let valid_buf = match valid {
            Some(flags) => {
                let mask = pack_validity(flags);
                let mut buf = device
                    .allocate(mask.len(), stream)
                    .map_err(ColumnError::AllocationFailure)?;
                device
                    .copy_from_host_async(&mut buf, &mask, stream)
                    .map_err(ColumnError::DeviceCopyFailure)?;
                column.null_count = flags.iter().filter(|v| !**v).count();
                Some(buf)
            }
            None => None,
        };

        debug!("Uploaded {} column of {} elements on {}", dtype, size, stream);
        column.set_buffers(Some(data_buf), valid_buf);
        Ok(column)
    }

    /// Wait for `stream` and read the column back to the host.
    pub fn to_host<E: CopyEngine>(&self, engine: &E, stream: Stream) -> Result<HostColumn> {
        self.check_well_formed()?;

        let data = match &self.data {
            Some(buf) if self.size > 0 => engine
                .copy_to_host(buf, self.data_bytes()?, stream)
                .map_err(ColumnError::DeviceCopyFailure)?,
            _ => Vec::new(),
        };

        let valid = match &self.valid {
            Some(buf) if self.size > 0 => {
                let mask = engine
                    .copy_to_host(buf, validity_allocation_size(self.size), stream)
                    .map_err(ColumnError::DeviceCopyFailure)?;
                Some(unpack_validity(&mask, self.size)?)
            }
            Some(_) => Some(Vec::new()),
            None => None,
        };

        Ok(HostColumn {
            dtype: self.dtype,
            dtype_info: self.dtype_info,
            size: self.size,
            data,
            valid,
            null_count: self.null_count,
        })
    }

    /// Recount nulls from the device-side mask. Waits for `stream`.
    pub fn update_null_count<E: CopyEngine>(&mut self, engine: &E, stream: Stream) -> Result<usize> {
        let null_count = match &self.valid {
            Some(buf) if self.size > 0 => {
                let mask = engine
                    .copy_to_host(buf, validity_allocation_size(self.size), stream)
                    .map_err(ColumnError::DeviceCopyFailure)?;
                self.size - count_valid(&mask, self.size)?
            }
            _ => 0,
        };
        self.null_count = null_count;
        Ok(null_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TimeUnit;
    use gpu_memory_manager::{Device, MemoryConfig};

    fn device() -> Device {
        Device::host(MemoryConfig::default()).unwrap()
    }

    #[test]
    fn empty_column_has_no_buffers() {
        let column = Column::empty(DType::Float64, TypeMetadata::default()).unwrap();
        assert!(column.is_empty());
        assert!(column.data().is_none());
        assert!(column.valid().is_none());
        assert!(column.check_well_formed().is_ok());
    }

    #[test]
    fn missing_data_is_malformed() {
        let column = Column::from_parts(3, None, None, 0, DType::Int32, TypeMetadata::default());
        assert!(matches!(column.check_well_formed(), Err(ColumnError::InvalidState(_))));
    }

    #[test]
    fn host_round_trip_with_validity() {
        let device = device();
        let stream = device.create_stream().unwrap();
        let values: Vec<u8> = [10i32, 20, 30].iter().flat_map(|v| v.to_le_bytes()).collect();

        let column = Column::from_host(
            &device,
            stream,
            DType::Int32,
            TypeMetadata::default(),
            &values,
            Some(&[true, false, true]),
        )
        .unwrap();
        assert_eq!(column.size(), 3);
        assert_eq!(column.null_count(), 1);
        assert_eq!(column.data_bytes().unwrap(), 12);
        assert_eq!(column.validity_bytes(), 4);

        let host = column.to_host(&device, stream).unwrap();
        assert_eq!(host.data, values);
        assert_eq!(host.valid, Some(vec![true, false, true]));
    }

    #[test]
    fn ragged_bytes_are_rejected() {
        let device = device();
        let err = Column::from_host(
            &device,
            Stream::DEFAULT,
            DType::Int64,
            TypeMetadata::default(),
            &[0u8; 12],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ColumnError::InvalidParameter(_)));
    }

    #[test]
    fn null_count_is_recomputed_from_the_mask() {
        let device = device();
        let stream = device.create_stream().unwrap();
        let values = vec![0u8; 8 * 4];

        let mut column = Column::from_host(
            &device,
            stream,
            DType::Timestamp,
            TypeMetadata::timestamp(TimeUnit::Nanosecond),
            &values,
            Some(&[false, false, true, false]),
        )
        .unwrap();
        column.set_null_count(0);

        assert_eq!(column.update_null_count(&device, stream).unwrap(), 3);
        assert_eq!(column.null_count(), 3);
    }
}
