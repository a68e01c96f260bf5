use std::io::Write;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use rand::Rng;
use rand::distr::Alphabetic;
use sha2::{Digest, Sha256};
use tempfile::TempPath;
use tracing::debug;

use crate::context::{Checksum, OperationContext, TestArtifact};
use crate::steps::{PipelineStep, StepOutcome};
use crate::types::error::S3monError;

const WRITE_BUFFER_SIZE: usize = 8 * 1024;

/// Writes a file of random letters and records its size and SHA-256.
pub struct GenerateFile;

#[async_trait]
impl PipelineStep for GenerateFile {
    fn name(&self) -> &'static str {
        "GenerateFile"
    }

    async fn execute(&self, context: &mut OperationContext) -> Result<StepOutcome> {
        let size = rand::rng().random_range(context.min_file_size()..context.max_file_size());
        let (local_file, checksum) = write_random_file(size)?;

        debug!(
            pipeline = context.pipeline_name(),
            size,
            checksum = checksum.hex(),
            "test file generated."
        );
        context.set_artifact(TestArtifact::new(local_file, size, checksum))?;
        Ok(StepOutcome::Continue)
    }
}

/// Write `size` random alphabetic bytes to a temp file, hashing as it goes.
pub fn write_random_file(size: u64) -> Result<(TempPath, Checksum)> {
    let io_error = |e: std::io::Error| anyhow!(S3monError::Io(e.to_string()));

    let mut file = tempfile::Builder::new()
        .prefix("s3mon-")
        .suffix(".txt")
        .tempfile()
        .map_err(io_error)?;
    let mut rng = rand::rng();
    let mut hasher = Sha256::new();
    let mut buffer = Vec::with_capacity(WRITE_BUFFER_SIZE);

    let mut remaining = size;
    while remaining > 0 {
        let len = remaining.min(WRITE_BUFFER_SIZE as u64) as usize;
        buffer.clear();
        buffer.extend((&mut rng).sample_iter(Alphabetic).take(len));

        hasher.update(&buffer);
        file.write_all(&buffer).map_err(io_error)?;
        remaining -= len as u64;
    }
    file.flush().map_err(io_error)?;

    Ok((file.into_temp_path(), Checksum::new(hasher.finalize().into())))
}
