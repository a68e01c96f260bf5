//! Multipart chunk planning.
//!
//! Both functions are pure. They fail with [`S3monError::InvalidArgument`]
//! when the file cannot be split into parts of at least `min_part_size`.

use anyhow::{Result, anyhow};

use crate::types::error::S3monError;

/// Upper bound on the number of parts of a generated multipart upload.
pub const MAX_PART_COUNT: u32 = 10;

/// Number of parts to split `file_size` into: `min(10, file_size / min_part_size)`.
pub fn calculate_number_of_parts(file_size: u64, min_part_size: u64) -> Result<u32> {
    if min_part_size == 0 {
        return Err(anyhow!(S3monError::InvalidArgument(
            "minimum part size must be at least 1".to_string()
        )));
    }
    if file_size < min_part_size {
        return Err(anyhow!(S3monError::InvalidArgument(format!(
            "file size ({file_size}) is smaller than the minimum part size ({min_part_size})"
        ))));
    }

    let parts = (file_size / min_part_size).min(MAX_PART_COUNT as u64);
    Ok(parts as u32)
}

/// Split `file_size` into `part_count` sizes that sum to `file_size`.
///
/// Every part gets `file_size / part_count` plus an even share of the
/// remainder. Whatever is left of the remainder goes to the first part.
pub fn calculate_chunk_sizes(file_size: u64, part_count: u32, min_part_size: u64) -> Result<Vec<u64>> {
    if part_count == 0 {
        return Err(anyhow!(S3monError::InvalidArgument(
            "part count must be at least 1".to_string()
        )));
    }
    if file_size < min_part_size {
        return Err(anyhow!(S3monError::InvalidArgument(format!(
            "file size ({file_size}) is smaller than the minimum part size ({min_part_size})"
        ))));
    }

    let count = part_count as u64;
    let base = file_size / count;
    let remainder = file_size - base * count;
    let remainder_per_part = remainder / count;
    let remainder_of_remainder = remainder - remainder_per_part * count;

    let mut chunks = vec![base + remainder_per_part; part_count as usize];
    chunks[0] += remainder_of_remainder;

    if let Some(smallest) = chunks.iter().copied().min().filter(|s| *s < min_part_size) {
        return Err(anyhow!(S3monError::InvalidArgument(format!(
            "part size ({smallest}) would be smaller than the minimum part size ({min_part_size}) \
             for file size {file_size} split into {part_count} parts"
        ))));
    }

    Ok(chunks)
}
