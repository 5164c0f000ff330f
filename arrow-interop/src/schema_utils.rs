use anyhow::Result;
use arrow_schema::Schema;
use gpu_column_core::{element_width, validity_allocation_size};

use crate::column_buffer::dtype_from_arrow;

pub trait SchemaExt {
    /// Bytes of device data one row occupies across all fields.
    fn row_byte_width(&self) -> Result<usize>;
    /// Device bytes (data plus validity for nullable fields) for `n_rows`.
    fn device_bytes(&self, n_rows: usize) -> Result<usize>;
    fn is_gpu_compatible(&self) -> bool;
}

impl SchemaExt for Schema {
    fn row_byte_width(&self) -> Result<usize> {
        self.fields()
            .iter()
            .map(|f| -> Result<usize> { Ok(element_width(dtype_from_arrow(f.data_type())?.0)?) })
            .sum()
    }

    fn device_bytes(&self, n_rows: usize) -> Result<usize> {
        let nullable = self.fields().iter().filter(|f| f.is_nullable()).count();
        Ok(n_rows * self.row_byte_width()? + nullable * validity_allocation_size(n_rows))
    }

    fn is_gpu_compatible(&self) -> bool {
        self.fields()
            .iter()
            .all(|f| dtype_from_arrow(f.data_type()).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_schema::{DataType, Field, Schema, TimeUnit};

    #[test]
    fn test_row_byte_width() {
        let schema = Schema::new(vec![
            Field::new("a", DataType::Int64, false),   // 8
            Field::new("b", DataType::Float32, false),  // 4
            Field::new("c", DataType::Boolean, false),  // 1
        ]);
        assert_eq!(schema.row_byte_width().unwrap(), 13);
    }

    #[test]
    fn test_device_bytes_counts_masks_of_nullable_fields() {
        let schema = Schema::new(vec![
            Field::new("a", DataType::Int32, true),
            Field::new("t", DataType::Timestamp(TimeUnit::Millisecond, None), false),
        ]);
        // 100 * (4 + 8) data bytes + one 16-byte mask
        assert_eq!(schema.device_bytes(100).unwrap(), 1216);
    }

    #[test]
    fn test_is_gpu_compatible() {
        let ok = Schema::new(vec![Field::new("a", DataType::Date32, false)]);
        assert!(ok.is_gpu_compatible());

        let strings = Schema::new(vec![Field::new("s", DataType::Utf8, false)]);
        assert!(!strings.is_gpu_compatible());
        assert!(strings.row_byte_width().is_err());
    }
}
