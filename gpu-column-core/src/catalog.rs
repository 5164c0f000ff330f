//! Logical element types and their in-memory widths.
//!
//! The catalog answers one question for the rest of the crate: how many bytes
//! does one element of a given type occupy in a column's data buffer. Fixed
//! width types answer through [`dtype_size`]. Strings are deliberately absent
//! from that table; a string column stores one [`StringDescriptor`] per
//! element and [`element_width`] is the only place that knows this.

use std::fmt;
use std::mem::size_of;

use crate::error::{ColumnError, Result};

/// Element type tag of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Invalid,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    /// One byte per element, zero is false.
    Bool8,
    /// Days since the UNIX epoch.
    Date32,
    /// Milliseconds since the UNIX epoch.
    Date64,
    /// Ticks since the UNIX epoch in [`TypeMetadata::time_unit`].
    Timestamp,
    /// Dictionary codes into [`TypeMetadata::category`].
    Category,
    /// Variable-length strings addressed through [`StringDescriptor`]s.
    String,
    /// Dictionary codes into a device-side string dictionary.
    StringCategory,
}

impl DType {
    pub const ALL: [DType; 14] = [
        DType::Invalid,
        DType::Int8,
        DType::Int16,
        DType::Int32,
        DType::Int64,
        DType::Float32,
        DType::Float64,
        DType::Bool8,
        DType::Date32,
        DType::Date64,
        DType::Timestamp,
        DType::Category,
        DType::String,
        DType::StringCategory,
    ];

    /// Native byte width, or `None` for tags without a fixed-width element.
    pub const fn fixed_width(self) -> Option<usize> {
        match self {
            DType::Int8 | DType::Bool8 => Some(size_of::<i8>()),
            DType::Int16 => Some(size_of::<i16>()),
            DType::Int32 | DType::Date32 => Some(size_of::<i32>()),
            DType::Int64 | DType::Date64 | DType::Timestamp => Some(size_of::<i64>()),
            DType::Float32 => Some(size_of::<f32>()),
            DType::Float64 => Some(size_of::<f64>()),
            DType::Category | DType::StringCategory => Some(size_of::<i32>()),
            DType::String | DType::Invalid => None,
        }
    }

    /// Stable numeric code of the tag.
    pub const fn code(self) -> i32 {
        match self {
            DType::Invalid => 0,
            DType::Int8 => 1,
            DType::Int16 => 2,
            DType::Int32 => 3,
            DType::Int64 => 4,
            DType::Float32 => 5,
            DType::Float64 => 6,
            DType::Bool8 => 7,
            DType::Date32 => 8,
            DType::Date64 => 9,
            DType::Timestamp => 10,
            DType::Category => 11,
            DType::String => 12,
            DType::StringCategory => 13,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::Invalid => "invalid",
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Bool8 => "bool8",
            DType::Date32 => "date32",
            DType::Date64 => "date64",
            DType::Timestamp => "timestamp",
            DType::Category => "category",
            DType::String => "string",
            DType::StringCategory => "string_category",
        }
    }
}

impl TryFrom<i32> for DType {
    type Error = ColumnError;

    fn try_from(code: i32) -> Result<Self> {
        DType::ALL
            .iter()
            .copied()
            .find(|dtype| dtype.code() == code)
            .ok_or_else(|| ColumnError::InvalidType(format!("unknown dtype code {}", code)))
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimeUnit {
    #[default]
    None,
    Second,
    Millisecond,
    Microsecond,
    Nanosecond,
}

/// Per-type parameters carried alongside the tag.
///
/// Column operations copy this verbatim; only [`validate_type_view`] looks
/// inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TypeMetadata {
    pub time_unit: TimeUnit,
    /// Opaque handle of the dictionary backing a category column.
    pub category: Option<u64>,
}

impl TypeMetadata {
    pub fn timestamp(time_unit: TimeUnit) -> Self {
        Self {
            time_unit,
            category: None,
        }
    }

    pub fn category(handle: u64) -> Self {
        Self {
            time_unit: TimeUnit::None,
            category: Some(handle),
        }
    }
}

/// In-array representation of one string element: where its characters live
/// and how many bytes they span. The characters themselves are never touched
/// by column operations.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StringDescriptor {
    pub chars: u64,
    pub len: u64,
}

/// Bytes per element of a [`DType::String`] column.
pub const STRING_DESCRIPTOR_BYTES: usize = size_of::<StringDescriptor>();

/// Fixed byte width of `dtype`. Strings have none and are rejected here.
pub fn dtype_size(dtype: DType) -> Result<usize> {
    dtype.fixed_width().ok_or_else(|| {
        ColumnError::InvalidType(format!("{} has no fixed element width", dtype))
    })
}

/// Bytes one element of `dtype` occupies in a column's data buffer.
pub fn element_width(dtype: DType) -> Result<usize> {
    match dtype {
        DType::String => Ok(STRING_DESCRIPTOR_BYTES),
        other => dtype_size(other),
    }
}

/// Check that `dtype` is a usable tag and `info` belongs to it.
pub fn validate_type_view(dtype: DType, info: &TypeMetadata) -> Result<()> {
    if dtype == DType::Invalid {
        return Err(ColumnError::InvalidType("invalid dtype".into()));
    }
    if info.time_unit != TimeUnit::None && dtype != DType::Timestamp {
        return Err(ColumnError::InvalidParameter(format!(
            "time unit {:?} given for {} column",
            info.time_unit, dtype
        )));
    }
    if info.category.is_some() && !matches!(dtype, DType::Category | DType::StringCategory) {
        return Err(ColumnError::InvalidParameter(format!(
            "category dictionary given for {} column",
            dtype
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_widths() {
        assert_eq!(dtype_size(DType::Int8).unwrap(), 1);
        assert_eq!(dtype_size(DType::Int16).unwrap(), 2);
        assert_eq!(dtype_size(DType::Int32).unwrap(), 4);
        assert_eq!(dtype_size(DType::Float64).unwrap(), 8);
        assert_eq!(dtype_size(DType::Date32).unwrap(), 4);
        assert_eq!(dtype_size(DType::Timestamp).unwrap(), 8);
        assert_eq!(dtype_size(DType::Category).unwrap(), 4);
    }

    #[test]
    fn strings_are_not_in_the_fixed_width_table() {
        assert!(matches!(dtype_size(DType::String), Err(ColumnError::InvalidType(_))));
        assert_eq!(element_width(DType::String).unwrap(), STRING_DESCRIPTOR_BYTES);
        assert_eq!(STRING_DESCRIPTOR_BYTES, 16);
    }

    #[test]
    fn invalid_has_no_width() {
        assert!(matches!(element_width(DType::Invalid), Err(ColumnError::InvalidType(_))));
    }

    #[test]
    fn every_tag_except_invalid_has_an_element_width() {
        for dtype in DType::ALL {
            assert_eq!(element_width(dtype).is_ok(), dtype != DType::Invalid, "{}", dtype);
        }
    }

    #[test]
    fn codes_round_trip() {
        for dtype in DType::ALL {
            assert_eq!(DType::try_from(dtype.code()).unwrap(), dtype);
        }
        assert!(matches!(DType::try_from(42), Err(ColumnError::InvalidType(_))));
    }

    #[test]
    fn metadata_must_match_the_type() {
        let ms = TypeMetadata::timestamp(TimeUnit::Millisecond);
        assert!(validate_type_view(DType::Timestamp, &ms).is_ok());
        assert!(matches!(
            validate_type_view(DType::Int64, &ms),
            Err(ColumnError::InvalidParameter(_))
        ));

        let dict = TypeMetadata::category(0xdead);
        assert!(validate_type_view(DType::Category, &dict).is_ok());
        assert!(validate_type_view(DType::Float32, &dict).is_err());

        assert!(matches!(
            validate_type_view(DType::Invalid, &TypeMetadata::default()),
            Err(ColumnError::InvalidType(_))
        ));
    }
}
