//! Column descriptors over device memory.
//!
//! A [`Column`] describes a typed, nullable array whose data and validity
//! mask live in buffers owned by the column. Three operations create new
//! columns from existing ones:
//!
//! * [`empty_like`]: same type, no elements, no buffers;
//! * [`allocate_like`]: same type and size, fresh uninitialized buffers;
//! * [`copy`]: same type and size, contents copied on the caller's stream.
//!
//! Layout arithmetic lives in [`catalog`] (element widths) and [`bitmask`]
//! (validity mask sizing).

pub mod bitmask;
pub mod catalog;
pub mod column;
pub mod copying;
pub mod error;

pub use bitmask::{validity_allocation_size, VALIDITY_WORD_BITS, VALIDITY_WORD_BYTES};
pub use catalog::{
    dtype_size, element_width, DType, StringDescriptor, TimeUnit, TypeMetadata,
    STRING_DESCRIPTOR_BYTES,
};
pub use column::{Column, HostColumn};
pub use copying::{allocate_like, copy, empty_like};
pub use error::{ColumnError, Result};
