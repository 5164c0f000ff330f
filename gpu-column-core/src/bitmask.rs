//! Bit-packed validity masks.
//!
//! Bit `i` of a mask is bit `i % 8` of byte `i / 8` (least significant bit
//! first); a set bit marks a valid element. Mask allocations are rounded up to
//! whole [`VALIDITY_WORD_BYTES`]-byte words so kernels can read the mask one
//! word at a time without a tail case. Allocation and copy sizing both go
//! through [`validity_allocation_size`].

use arrow_buffer::bit_util;

use crate::error::{ColumnError, Result};

/// Bits in one validity word.
pub const VALIDITY_WORD_BITS: usize = 32;

/// Bytes in one validity word.
pub const VALIDITY_WORD_BYTES: usize = VALIDITY_WORD_BITS / 8;

/// Bytes needed to hold `size` bits, without word rounding.
pub fn num_bitmask_bytes(size: usize) -> usize {
    bit_util::ceil(size, 8)
}

/// Bytes allocated for the validity mask of a `size`-element column.
pub fn validity_allocation_size(size: usize) -> usize {
    bit_util::ceil(size, VALIDITY_WORD_BITS) * VALIDITY_WORD_BYTES
}

/// Pack one flag per element into a word-rounded mask. Padding bits are clear.
pub fn pack_validity(valid: &[bool]) -> Vec<u8> {
    let mut mask = vec![0u8; validity_allocation_size(valid.len())];
    for (i, _) in valid.iter().enumerate().filter(|(_, v)| **v) {
        bit_util::set_bit(&mut mask, i);
    }
    mask
}

/// Decode the first `size` bits of `mask`.
pub fn unpack_validity(mask: &[u8], size: usize) -> Result<Vec<bool>> {
    check_mask_len(mask, size)?;
    Ok((0..size).map(|i| bit_util::get_bit(mask, i)).collect())
}

/// Number of set bits among the first `size` bits of `mask`.
pub fn count_valid(mask: &[u8], size: usize) -> Result<usize> {
    check_mask_len(mask, size)?;
    Ok((0..size).filter(|&i| bit_util::get_bit(mask, i)).count())
}

fn check_mask_len(mask: &[u8], size: usize) -> Result<()> {
    if mask.len() < num_bitmask_bytes(size) {
        return Err(ColumnError::InvalidParameter(format!(
            "validity mask of {} bytes cannot hold {} elements",
            mask.len(),
            size
        )));
    }
    Ok(())
}
