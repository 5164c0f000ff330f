//! Conversion between Arrow arrays / `RecordBatch`es and device `Column`s.

use anyhow::{bail, Context, Result};
use arrow_array::types::{
    Date32Type, Date64Type, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type,
    TimestampMicrosecondType, TimestampMillisecondType, TimestampNanosecondType,
    TimestampSecondType,
};
use arrow_array::{Array, ArrayRef, BooleanArray, PrimitiveArray, RecordBatch};
use arrow_buffer::NullBuffer;
use arrow_schema::{DataType, Schema, TimeUnit as ArrowTimeUnit};
use gpu_column_core::Column;
use gpu_memory_manager::{CopyEngine, DeviceAllocator, Stream};
use std::sync::Arc;
use tracing::debug;

use crate::column_buffer::{dtype_to_arrow, ColumnBuffer};

// ---------------------------------------------------------------------------
// Arrow → device
// ---------------------------------------------------------------------------

/// Upload one Arrow array as a device column. The uploads are enqueued on
/// `stream`.
pub fn array_to_column<D>(array: &dyn Array, device: &D, stream: Stream) -> Result<Column>
where
    D: DeviceAllocator + CopyEngine,
{
    ColumnBuffer::from_arrow("", array)?.to_device(device, stream)
}

/// Upload every column of `batch`, in schema order.
pub fn record_batch_to_gpu_columns<D>(batch: &RecordBatch, device: &D, stream: Stream) -> Result<Vec<Column>>
where
    D: DeviceAllocator + CopyEngine,
{
    debug!("Uploading batch of {} rows x {} columns on {}", batch.num_rows(), batch.num_columns(), stream);

    batch
        .schema()
        .fields()
        .iter()
        .zip(batch.columns())
        .map(|(field, col)| {
            ColumnBuffer::from_arrow(field.name(), col.as_ref())
                .and_then(|buf| buf.to_device(device, stream))
                .with_context(|| format!("Converting column '{}'", field.name()))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// device → Arrow
// ---------------------------------------------------------------------------

/// Download a device column into an Arrow array. Waits for `stream`.
pub fn column_to_array<E: CopyEngine>(column: &Column, engine: &E, stream: Stream) -> Result<ArrayRef> {
    let buf = ColumnBuffer::from_device("", column, engine, stream)?;
    let data_type = dtype_to_arrow(buf.dtype, &buf.dtype_info)?;
    buffer_to_array(&buf, &data_type)
}

/// Reconstruct an Arrow `RecordBatch` from device columns.
///
/// The caller supplies the target `Schema`; each column's type must be the
/// device equivalent of its field's type.
pub fn gpu_columns_to_record_batch<E: CopyEngine>(
    columns: &[Column],
    schema: Arc<Schema>,
    engine: &E,
    stream: Stream,
) -> Result<RecordBatch> {
    if columns.len() != schema.fields().len() {
        bail!(
            "Schema has {} fields but {} columns were given",
            schema.fields().len(),
            columns.len()
        );
    }

    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(columns.len());
    for (column, field) in columns.iter().zip(schema.fields()) {
        let buf = ColumnBuffer::from_device(field.name(), column, engine, stream)?;
        let array = buffer_to_array(&buf, field.data_type())
            .with_context(|| format!("Converting column '{}'", field.name()))?;
        arrays.push(array);
    }

    RecordBatch::try_new(schema, arrays).context("Building RecordBatch from device columns")
}

macro_rules! decode_primitive {
    ($buf:expr, $arrow_ty:ty) => {{
        type Native = <$arrow_ty as arrow_array::types::ArrowPrimitiveType>::Native;
        let values = $buf
            .data
            .chunks_exact(std::mem::size_of::<Native>())
            .map(|chunk| chunk.try_into().map(Native::from_le_bytes))
            .collect::<std::result::Result<Vec<Native>, _>>()?;
        let nulls = $buf.validity.clone().map(NullBuffer::from);
        Arc::new(PrimitiveArray::<$arrow_ty>::try_new(values.into(), nulls)?) as ArrayRef
    }};
}

fn buffer_to_array(buf: &ColumnBuffer, data_type: &DataType) -> Result<ArrayRef> {
    let device_type = dtype_to_arrow(buf.dtype, &buf.dtype_info)?;
    if device_type != *data_type {
        bail!(
            "Column '{}' holds {} data, which cannot be read as {:?}",
            buf.name,
            buf.dtype,
            data_type
        );
    }

    Ok(match data_type {
        DataType::Int8 => decode_primitive!(buf, Int8Type),
        DataType::Int16 => decode_primitive!(buf, Int16Type),
        DataType::Int32 => decode_primitive!(buf, Int32Type),
        DataType::Int64 => decode_primitive!(buf, Int64Type),
        DataType::Float32 => decode_primitive!(buf, Float32Type),
        DataType::Float64 => decode_primitive!(buf, Float64Type),
        DataType::Date32 => decode_primitive!(buf, Date32Type),
        DataType::Date64 => decode_primitive!(buf, Date64Type),
        DataType::Timestamp(ArrowTimeUnit::Second, None) => decode_primitive!(buf, TimestampSecondType),
        DataType::Timestamp(ArrowTimeUnit::Millisecond, None) => {
            decode_primitive!(buf, TimestampMillisecondType)
        }
        DataType::Timestamp(ArrowTimeUnit::Microsecond, None) => {
            decode_primitive!(buf, TimestampMicrosecondType)
        }
        DataType::Timestamp(ArrowTimeUnit::Nanosecond, None) => {
            decode_primitive!(buf, TimestampNanosecondType)
        }
        DataType::Boolean => {
            let array: BooleanArray = (0..buf.n_rows)
                .map(|i| buf.is_valid(i).then(|| buf.data[i] != 0))
                .collect();
            Arc::new(array) as ArrayRef
        }
        other => bail!("gpu_columns_to_record_batch: unsupported target type {:?}", other),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
