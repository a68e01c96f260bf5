use std::collections::HashMap;
use std::path::Path;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::chunk::{calculate_chunk_sizes, calculate_number_of_parts};
use crate::context::OperationContext;
use crate::steps::{PipelineStep, StepOutcome, operation_error};
use crate::types::error::S3monError;
use crate::types::{CHECKSUM_METADATA_KEY, CompletedPart, MultipartUpload, TEST_FILE_CONTENT_TYPE};

/// Uploads the test file in a single request.
pub struct PutFile;

/// Uploads the test file in parts planned by the chunk planner.
pub struct MultipartPutFile;

struct UploadTarget {
    local_file: std::path::PathBuf,
    size: u64,
    object_path: String,
    metadata: HashMap<String, String>,
}

/// Check the local file and derive where it goes.
async fn prepare_upload(context: &mut OperationContext) -> Result<UploadTarget> {
    let directory = context.require_directory()?.to_string();
    let artifact = context.require_artifact()?;
    let local_file = artifact
        .local_file()
        .ok_or_else(|| {
            anyhow!(S3monError::InvalidState(
                "the local test file has already been removed".to_string()
            ))
        })?
        .to_path_buf();

    let on_disk = tokio::fs::metadata(&local_file)
        .await
        .map_err(|e| anyhow!(S3monError::Io(e.to_string())))?
        .len();
    if on_disk != artifact.size() {
        return Err(anyhow!(S3monError::InvalidArgument(format!(
            "local test file is {on_disk} bytes, expected {}",
            artifact.size()
        ))));
    }

    let hex = artifact.checksum().hex();
    let target = UploadTarget {
        local_file,
        size: artifact.size(),
        object_path: format!("{directory}{hex}.txt"),
        metadata: HashMap::from([(CHECKSUM_METADATA_KEY.to_string(), hex)]),
    };
    context.file_path = Some(target.object_path.clone());
    Ok(target)
}

fn remove_local_file(context: &mut OperationContext) -> Result<()> {
    match context.artifact_mut() {
        Some(artifact) => artifact.remove_local_file(),
        None => Ok(()),
    }
}

/// Remove the local copy once the upload is over. An upload failure wins
/// over a failure to remove the file.
fn finish_upload(context: &mut OperationContext, result: Result<()>, object_path: &str) -> Result<()> {
    let removed = remove_local_file(context);
    if let Err(e) = result {
        if let Err(removal_error) = removed {
            warn!(
                pipeline = context.pipeline_name(),
                path = object_path,
                error = format!("{removal_error:#}"),
                "failed to remove the local test file."
            );
        }
        return Err(operation_error(e, object_path));
    }
    removed
}

#[async_trait]
impl PipelineStep for PutFile {
    fn name(&self) -> &'static str {
        "PutFile"
    }

    async fn execute(&self, context: &mut OperationContext) -> Result<StepOutcome> {
        let target = prepare_upload(context).await?;
        let body = tokio::fs::read(&target.local_file)
            .await
            .map_err(|e| anyhow!(S3monError::Io(e.to_string())))?;

        let result = context
            .timed(context.storage().put_object(
                &target.object_path,
                body,
                TEST_FILE_CONTENT_TYPE,
                target.metadata,
            ))
            .await;
        finish_upload(context, result, &target.object_path)?;

        debug!(
            pipeline = context.pipeline_name(),
            path = target.object_path,
            size = target.size,
            "file uploaded."
        );
        Ok(StepOutcome::Continue)
    }
}

#[async_trait]
impl PipelineStep for MultipartPutFile {
    fn name(&self) -> &'static str {
        "MultipartPutFile"
    }

    async fn execute(&self, context: &mut OperationContext) -> Result<StepOutcome> {
        let target = prepare_upload(context).await?;
        let min_part_size = context.storage().minimum_part_size();
        if target.size < min_part_size {
            return Err(anyhow!(S3monError::InvalidArgument(format!(
                "file size ({}) is smaller than the minimum part size ({min_part_size})",
                target.size
            ))));
        }
        let part_count = calculate_number_of_parts(target.size, min_part_size)?;
        let chunks = calculate_chunk_sizes(target.size, part_count, min_part_size)?;

        let upload = context
            .timed(context.storage().initiate_multipart_upload(
                &target.object_path,
                TEST_FILE_CONTENT_TYPE,
                target.metadata,
            ))
            .await
            .map_err(|e| operation_error(e, &target.object_path))?;
        context.set_pending_upload(upload.clone());

        let result = match upload_parts(context, &upload, &target.local_file, &chunks).await {
            Ok(parts) => context
                .timed(context.storage().complete_multipart_upload(&upload, parts))
                .await,
            Err(e) => {
                if let Err(abort_error) = context.storage().abort_multipart_upload(&upload).await {
                    warn!(
                        pipeline = context.pipeline_name(),
                        path = target.object_path,
                        upload_id = upload.upload_id,
                        error = format!("{abort_error:#}"),
                        "failed to abort multipart upload."
                    );
                }
                Err(e)
            }
        };
        context.take_pending_upload();
        finish_upload(context, result, &target.object_path)?;

        debug!(
            pipeline = context.pipeline_name(),
            path = target.object_path,
            size = target.size,
            parts = part_count,
            "file uploaded in parts."
        );
        Ok(StepOutcome::Continue)
    }
}

async fn upload_parts(
    context: &OperationContext,
    upload: &MultipartUpload,
    local_file: &Path,
    chunks: &[u64],
) -> Result<Vec<CompletedPart>> {
    let mut file = tokio::fs::File::open(local_file)
        .await
        .map_err(|e| anyhow!(S3monError::Io(e.to_string())))?;

    let mut parts = Vec::with_capacity(chunks.len());
    for (index, chunk) in chunks.iter().enumerate() {
        let mut body = vec![0u8; *chunk as usize];
        file.read_exact(&mut body)
            .await
            .map_err(|e| anyhow!(S3monError::Io(e.to_string())))?;

        let part_number = index as i32 + 1;
        let part = context
            .timed(context.storage().upload_part(upload, part_number, body))
            .await?;
        parts.push(part);
    }
    Ok(parts)
}
