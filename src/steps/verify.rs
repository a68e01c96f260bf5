use anyhow::{Result, anyhow};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::context::OperationContext;
use crate::steps::{PipelineStep, StepOutcome, operation_error};
use crate::types::CHECKSUM_METADATA_KEY;
use crate::types::error::DataValidationError;

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Metadata-only check of the uploaded object's size and checksum.
pub struct HeadFile;

/// Downloads the object and verifies size and checksum of the content.
pub struct GetFile;

#[async_trait]
impl PipelineStep for HeadFile {
    fn name(&self) -> &'static str {
        "HeadFile"
    }

    async fn execute(&self, context: &mut OperationContext) -> Result<StepOutcome> {
        let path = context.require_file_path()?.to_string();
        let artifact = context.require_artifact()?;
        let expected_size = artifact.size();
        let expected_checksum = artifact.checksum().hex();

        let head = context
            .timed(context.storage().head_object(&path))
            .await
            .map_err(|e| operation_error(e, &path))?;

        if head.content_length != Some(expected_size) {
            return Err(anyhow!(
                DataValidationError::new("uploaded file size does not match the generated file")
                    .with_context("path", &path)
                    .with_context("expectedFileSize", expected_size)
                    .with_context("actualFileSize", display_optional(head.content_length))
            ));
        }

        let actual_checksum = head.metadata.get(CHECKSUM_METADATA_KEY);
        if actual_checksum != Some(&expected_checksum) {
            return Err(anyhow!(
                DataValidationError::new("uploaded file checksum does not match the generated file")
                    .with_context("path", &path)
                    .with_context("expectedSha256sum", &expected_checksum)
                    .with_context("actualSha256sum", display_optional(actual_checksum))
            ));
        }

        debug!(pipeline = context.pipeline_name(), path, "file metadata verified.");
        Ok(StepOutcome::Continue)
    }
}

#[async_trait]
impl PipelineStep for GetFile {
    fn name(&self) -> &'static str {
        "GetFile"
    }

    async fn execute(&self, context: &mut OperationContext) -> Result<StepOutcome> {
        let path = context.require_file_path()?.to_string();
        let artifact = context.require_artifact()?;
        let expected_size = artifact.size();
        let expected_checksum = artifact.checksum().hex();

        let (read, actual_checksum) = context
            .timed(download(context, &path, expected_size))
            .await?;

        if read != expected_size {
            return Err(anyhow!(
                DataValidationError::new("downloaded file size does not match the generated file")
                    .with_context("path", &path)
                    .with_context("expectedFileSize", expected_size)
                    .with_context("actualFileSize", read)
            ));
        }
        if actual_checksum != expected_checksum {
            return Err(anyhow!(
                DataValidationError::new("downloaded file checksum does not match the generated file")
                    .with_context("path", &path)
                    .with_context("expectedSha256sum", &expected_checksum)
                    .with_context("actualSha256sum", &actual_checksum)
            ));
        }

        debug!(pipeline = context.pipeline_name(), path, size = read, "file downloaded and verified.");
        Ok(StepOutcome::Continue)
    }
}

/// Stream the object, returning the byte count and hex SHA-256 of what was read.
async fn download(context: &OperationContext, path: &str, expected_size: u64) -> Result<(u64, String)> {
    let mut object = context
        .storage()
        .get_object(path)
        .await
        .map_err(|e| operation_error(e, path))?;

    if let Some(content_length) = object.content_length.filter(|l| *l != expected_size) {
        return Err(anyhow!(
            DataValidationError::new("advertised content length does not match the generated file")
                .with_context("path", path)
                .with_context("expectedFileSize", expected_size)
                .with_context("actualFileSize", content_length)
        ));
    }

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut read = 0u64;
    loop {
        let n = object
            .body
            .read(&mut buffer)
            .await
            .map_err(|e| operation_error(anyhow!(e), path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        read += n as u64;
    }

    Ok((read, hex::encode(hasher.finalize())))
}

fn display_optional<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "null".to_string(), |v| v.to_string())
}
