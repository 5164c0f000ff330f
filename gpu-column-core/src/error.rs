use gpu_memory_manager::MemoryError;
use thiserror::Error;

/// Failures raised by column operations.
///
/// Every variant is reported at the point of detection and propagated
/// unchanged. A function that returns `Err` has produced no column.
#[derive(Debug, Error)]
pub enum ColumnError {
    /// The input descriptor breaks a structural invariant.
    #[error("invalid column state: {0}")]
    InvalidState(String),

    /// The type tag is not known to the type catalog.
    #[error("invalid column type: {0}")]
    InvalidType(String),

    /// Type metadata or an argument does not fit the column's type.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("device allocation failed: {0}")]
    AllocationFailure(#[source] MemoryError),

    #[error("device copy failed: {0}")]
    DeviceCopyFailure(#[source] MemoryError),
}

pub type Result<T> = std::result::Result<T, ColumnError>;

/// Return early with `ColumnError::$kind` unless `$cond` holds.
///
/// ```ignore
/// column_expects!(input.size() == 0 || input.data().is_some(), InvalidState, "Null input data");
/// ```
#[macro_export]
macro_rules! column_expects {
    ($cond:expr, $kind:ident, $($msg:tt)+) => {
        if !$cond {
            return Err($crate::error::ColumnError::$kind(format!($($msg)+)));
        }
    };
}
