//! Multipart size partitioning.

use crate::error::{Error, Result};

/// Size of part `part_index` (1-based) of an object of `total_size` bytes
/// uploaded with a nominal part size of `part_size`.
///
/// Indices past the last part yield `0` rather than an error so callers can
/// keep asking until they see an empty part.
pub fn calculate_part_size_from_idx(total_size: i64, part_size: i64, part_index: i32) -> Result<i64> {
    if total_size < 0 {
        return Err(Error::InvalidArgument);
    }
    if part_size <= 0 {
        return Err(Error::PartSizeZero);
    }
    if part_index < 1 {
        return Err(Error::PartSizeIndex);
    }
    if total_size == 0 {
        return Ok(0);
    }

    let full_parts = total_size / part_size;
    let remainder = total_size % part_size;
    let index = i64::from(part_index);

    let size = if index <= full_parts {
        part_size
    } else if index == full_parts + 1 && remainder > 0 {
        remainder
    } else {
        0
    };
    Ok(size)
}

/// Number of parts an object of `total_size` splits into.
pub fn part_count(total_size: i64, part_size: i64) -> Result<i64> {
    if total_size < 0 {
        return Err(Error::InvalidArgument);
    }
    if part_size <= 0 {
        return Err(Error::PartSizeZero);
    }
    Ok(ceil_div(total_size, part_size))
}

/// Integer ceiling division for `a >= 0`, `b > 0`.
pub fn ceil_div(a: i64, b: i64) -> i64 {
    a / b + i64::from(a % b != 0)
}
