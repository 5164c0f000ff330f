//! Arrow ↔ device column conversion utilities.
//!
//! This crate stages Apache Arrow arrays and `RecordBatch`es into device
//! [`Column`](gpu_column_core::Column)s and reads them back.
//!
//! # Layout contract
//!
//! A column's data buffer is the Arrow value buffer, unchanged:
//!
//! ```text
//! [  value[0]  |  value[1]  | ... |  value[n-1]  ]
//! ```
//!
//! Booleans are the exception: Arrow packs them into bits, device columns
//! store one byte per value (`bool8`). Arrow validity bitmaps become
//! word-rounded device validity masks; arrays without nulls get no mask.
//! Strings and dictionaries are not staged.

pub mod column_buffer;
pub mod record_batch_convert;
pub mod schema_utils;

pub use column_buffer::{dtype_from_arrow, dtype_to_arrow, ColumnBuffer};
pub use record_batch_convert::{
    array_to_column, column_to_array, gpu_columns_to_record_batch, record_batch_to_gpu_columns,
};
pub use schema_utils::SchemaExt;
