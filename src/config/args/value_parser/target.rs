use crate::types::StoragePath;

const S3_SCHEME: &str = "s3://";
const MEMORY_TARGET: &str = "memory://";

pub const ERROR_MESSAGE_INVALID_TARGET: &str =
    "Target must be an S3 path (s3://bucket[/prefix]) or memory://";

pub fn check_target(value: &str) -> Result<String, String> {
    parse_target(value)?;
    Ok(value.to_string())
}

/// Parse `s3://bucket[/prefix]` or `memory://` into a [`StoragePath`].
pub fn parse_target(value: &str) -> Result<StoragePath, String> {
    if value == MEMORY_TARGET {
        return Ok(StoragePath::Memory);
    }

    let Some(without_scheme) = value.strip_prefix(S3_SCHEME) else {
        return Err(ERROR_MESSAGE_INVALID_TARGET.to_string());
    };

    let (bucket, prefix) = match without_scheme.find('/') {
        Some(idx) => (&without_scheme[..idx], &without_scheme[idx + 1..]),
        None => (without_scheme, ""),
    };

    if bucket.is_empty() {
        return Err(ERROR_MESSAGE_INVALID_TARGET.to_string());
    }

    Ok(StoragePath::S3 {
        bucket: bucket.to_string(),
        prefix: prefix.to_string(),
    })
}
