//! Host-side staging buffer for one column, and the Arrow type mapping.

use anyhow::{bail, Context, Result};
use arrow_array::cast::AsArray;
use arrow_array::types::{
    ArrowPrimitiveType, Date32Type, Date64Type, Float32Type, Float64Type, Int16Type, Int32Type,
    Int64Type, Int8Type, TimestampMicrosecondType, TimestampMillisecondType, TimestampNanosecondType,
    TimestampSecondType,
};
use arrow_array::Array;
use arrow_schema::{DataType, TimeUnit as ArrowTimeUnit};
use gpu_column_core::{element_width, Column, DType, HostColumn, TimeUnit, TypeMetadata};
use gpu_memory_manager::{CopyEngine, DeviceAllocator, Stream};

/// Map an Arrow `DataType` onto a device column type.
///
/// Only types whose Arrow value buffer already has the device layout are
/// accepted; nothing is widened or re-encoded.
pub fn dtype_from_arrow(dt: &DataType) -> Result<(DType, TypeMetadata)> {
    let plain = |dtype: DType| -> Result<(DType, TypeMetadata)> {
        Ok((dtype, TypeMetadata::default()))
    };
    match dt {
        DataType::Int8 => plain(DType::Int8),
        DataType::Int16 => plain(DType::Int16),
        DataType::Int32 => plain(DType::Int32),
        DataType::Int64 => plain(DType::Int64),
        DataType::Float32 => plain(DType::Float32),
        DataType::Float64 => plain(DType::Float64),
        DataType::Boolean => plain(DType::Bool8),
        DataType::Date32 => plain(DType::Date32),
        DataType::Date64 => plain(DType::Date64),
        DataType::Timestamp(unit, None) => {
            let unit = match unit {
                ArrowTimeUnit::Second => TimeUnit::Second,
                ArrowTimeUnit::Millisecond => TimeUnit::Millisecond,
                ArrowTimeUnit::Microsecond => TimeUnit::Microsecond,
                ArrowTimeUnit::Nanosecond => TimeUnit::Nanosecond,
            };
            Ok((DType::Timestamp, TypeMetadata::timestamp(unit)))
        }
        other => bail!("Unsupported Arrow DataType for device columns: {:?}", other),
    }
}

/// Inverse of [`dtype_from_arrow`].
pub fn dtype_to_arrow(dtype: DType, info: &TypeMetadata) -> Result<DataType> {
    Ok(match dtype {
        DType::Int8 => DataType::Int8,
        DType::Int16 => DataType::Int16,
        DType::Int32 => DataType::Int32,
        DType::Int64 => DataType::Int64,
        DType::Float32 => DataType::Float32,
        DType::Float64 => DataType::Float64,
        DType::Bool8 => DataType::Boolean,
        DType::Date32 => DataType::Date32,
        DType::Date64 => DataType::Date64,
        DType::Timestamp => {
            let unit = match info.time_unit {
                TimeUnit::Second => ArrowTimeUnit::Second,
                TimeUnit::None | TimeUnit::Millisecond => ArrowTimeUnit::Millisecond,
                TimeUnit::Microsecond => ArrowTimeUnit::Microsecond,
                TimeUnit::Nanosecond => ArrowTimeUnit::Nanosecond,
            };
            DataType::Timestamp(unit, None)
        }
        other => bail!("No Arrow equivalent for {} columns", other),
    })
}

/// Column contents staged in host memory, in device layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnBuffer {
    pub name: String,
    pub dtype: DType,
    pub dtype_info: TypeMetadata,
    /// Raw little-endian element bytes, `n_rows * element_width(dtype)` long.
    pub data: Vec<u8>,
    pub n_rows: usize,
    /// One flag per row, `None` when the column carries no validity mask.
    pub validity: Option<Vec<bool>>,
}

impl ColumnBuffer {
    /// Create an empty buffer.
    pub fn new_empty(name: impl Into<String>, dtype: DType, dtype_info: TypeMetadata) -> Self {
        Self {
            name: name.into(),
            dtype,
            dtype_info,
            data: Vec::new(),
            n_rows: 0,
            validity: None,
        }
    }

    /// Create from a pre-filled byte vec.
    pub fn from_bytes(
        name: impl Into<String>,
        dtype: DType,
        dtype_info: TypeMetadata,
        data: Vec<u8>,
        n_rows: usize,
        validity: Option<Vec<bool>>,
    ) -> Result<Self> {
        let expected = n_rows * element_width(dtype)?;
        if data.len() != expected {
            bail!(
                "ColumnBuffer size mismatch: expected {} bytes for {} rows, got {}",
                expected,
                n_rows,
                data.len()
            );
        }
        if let Some(v) = &validity {
            if v.len() != n_rows {
                bail!("ColumnBuffer validity has {} flags for {} rows", v.len(), n_rows);
            }
        }
        Ok(Self {
            name: name.into(),
            dtype,
            dtype_info,
            data,
            n_rows,
            validity,
        })
    }

    /// Stage the values and null flags of an Arrow array.
    pub fn from_arrow(name: impl Into<String>, array: &dyn Array) -> Result<Self> {
        let name = name.into();
        let (dtype, dtype_info) = dtype_from_arrow(array.data_type())
            .with_context(|| format!("Staging column '{}'", name))?;
        let n_rows = array.len();

        let validity = if array.null_count() > 0 {
            Some((0..n_rows).map(|i| array.is_valid(i)).collect())
        } else {
            None
        };

        let data = match array.data_type() {
            DataType::Int8 => primitive_bytes::<Int8Type>(array),
            DataType::Int16 => primitive_bytes::<Int16Type>(array),
            DataType::Int32 => primitive_bytes::<Int32Type>(array),
            DataType::Int64 => primitive_bytes::<Int64Type>(array),
            DataType::Float32 => primitive_bytes::<Float32Type>(array),
            DataType::Float64 => primitive_bytes::<Float64Type>(array),
            DataType::Date32 => primitive_bytes::<Date32Type>(array),
            DataType::Date64 => primitive_bytes::<Date64Type>(array),
            DataType::Timestamp(ArrowTimeUnit::Second, _) => primitive_bytes::<TimestampSecondType>(array),
            DataType::Timestamp(ArrowTimeUnit::Millisecond, _) => {
                primitive_bytes::<TimestampMillisecondType>(array)
            }
            DataType::Timestamp(ArrowTimeUnit::Microsecond, _) => {
                primitive_bytes::<TimestampMicrosecondType>(array)
            }
            DataType::Timestamp(ArrowTimeUnit::Nanosecond, _) => {
                primitive_bytes::<TimestampNanosecondType>(array)
            }
            DataType::Boolean => array
                .as_boolean()
                .values()
                .iter()
                .map(u8::from)
                .collect(),
            other => bail!("Unsupported column type for device staging: {:?}", other),
        };

        Self::from_bytes(name, dtype, dtype_info, data, n_rows, validity)
    }

    /// Read a device column back into a staging buffer. Waits for `stream`.
    pub fn from_device<E: CopyEngine>(
        name: impl Into<String>,
        column: &Column,
        engine: &E,
        stream: Stream,
    ) -> Result<Self> {
        let HostColumn {
            dtype,
            dtype_info,
            size,
            data,
            valid,
            ..
        } = column.to_host(engine, stream).context("Downloading column")?;
        Self::from_bytes(name, dtype, dtype_info, data, size, valid)
    }

    /// Upload to a new device column; the copies are enqueued on `stream`.
    pub fn to_device<D>(&self, device: &D, stream: Stream) -> Result<Column>
    where
        D: DeviceAllocator + CopyEngine,
    {
        Column::from_host(
            device,
            stream,
            self.dtype,
            self.dtype_info,
            &self.data,
            self.validity.as_deref(),
        )
        .with_context(|| format!("Uploading column '{}'", self.name))
    }

    pub fn is_valid(&self, row: usize) -> bool {
        self.validity.as_ref().map(|v| v[row]).unwrap_or(true)
    }

    /// Return the size in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

fn primitive_bytes<T: ArrowPrimitiveType>(array: &dyn Array) -> Vec<u8> {
    array.as_primitive::<T>().values().inner().as_slice().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{BooleanArray, Int32Array, TimestampNanosecondArray};

    #[test]
    fn arrow_types_map_without_widening() {
        assert_eq!(dtype_from_arrow(&DataType::Int16).unwrap().0, DType::Int16);
        assert_eq!(dtype_from_arrow(&DataType::Float32).unwrap().0, DType::Float32);
        let (dtype, info) =
            dtype_from_arrow(&DataType::Timestamp(ArrowTimeUnit::Microsecond, None)).unwrap();
        assert_eq!(dtype, DType::Timestamp);
        assert_eq!(info.time_unit, TimeUnit::Microsecond);
        assert!(dtype_from_arrow(&DataType::Utf8).is_err());
        assert!(dtype_from_arrow(&DataType::UInt32).is_err());
    }

    #[test]
    fn size_mismatch_error() {
        let result = ColumnBuffer::from_bytes(
            "col",
            DType::Int64,
            TypeMetadata::default(),
            vec![0u8; 7],
            1,
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn stages_sliced_arrays() {
        let array = Int32Array::from(vec![Some(1), None, Some(3), Some(4)]);
        let sliced = array.slice(1, 3);
        let buf = ColumnBuffer::from_arrow("a", &sliced).unwrap();

        assert_eq!(buf.n_rows, 3);
        assert_eq!(buf.byte_len(), 12);
        assert_eq!(&buf.data[4..8], &3i32.to_le_bytes());
        assert_eq!(buf.validity, Some(vec![false, true, true]));
    }

    #[test]
    fn booleans_take_one_byte_each() {
        let array = BooleanArray::from(vec![true, false, true]);
        let buf = ColumnBuffer::from_arrow("flags", &array).unwrap();
        assert_eq!(buf.dtype, DType::Bool8);
        assert_eq!(buf.data, vec![1, 0, 1]);
        assert!(buf.validity.is_none());
    }

    #[test]
    fn timestamps_keep_their_unit() {
        let array = TimestampNanosecondArray::from(vec![1_000, 2_000]);
        let buf = ColumnBuffer::from_arrow("ts", &array).unwrap();
        assert_eq!(buf.dtype_info.time_unit, TimeUnit::Nanosecond);
        assert_eq!(buf.byte_len(), 16);
    }
}
