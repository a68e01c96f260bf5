use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, trace};

use crate::config::StorageLayout;
use crate::context::OperationContext;
use crate::steps::{PipelineStep, StepOutcome, operation_error};
use crate::storage::{is_directory_not_empty_error, is_not_found_error};

/// Deletes the uploaded object. An object that is already gone counts as deleted.
pub struct DeleteFile;

/// Removes the directories created for this iteration, deepest first.
///
/// Stops at the first directory that still holds something, since none of
/// its ancestors can be empty either. The runner's base directory is kept.
/// In the containers layout the iteration's container is deleted instead.
pub struct Cleanup;

#[async_trait]
impl PipelineStep for DeleteFile {
    fn name(&self) -> &'static str {
        "DeleteFile"
    }

    async fn execute(&self, context: &mut OperationContext) -> Result<StepOutcome> {
        let path = context.require_file_path()?.to_string();

        match context.timed(context.storage().delete_object(&path)).await {
            Ok(()) => debug!(pipeline = context.pipeline_name(), path, "file deleted."),
            Err(e) if is_not_found_error(&e) => {
                debug!(pipeline = context.pipeline_name(), path, "file was already deleted.")
            }
            Err(e) => return Err(operation_error(e, &path)),
        }
        Ok(StepOutcome::Continue)
    }
}

#[async_trait]
impl PipelineStep for Cleanup {
    fn name(&self) -> &'static str {
        "Cleanup"
    }

    async fn execute(&self, context: &mut OperationContext) -> Result<StepOutcome> {
        if context.layout() == StorageLayout::Containers {
            return delete_container(context).await;
        }

        let Some(directory) = context.directory.clone() else {
            return Ok(StepOutcome::Complete);
        };

        for dir in context.path_generator().created_directories(&directory) {
            match context.timed(context.storage().delete_directory(&dir)).await {
                Ok(()) => trace!(pipeline = context.pipeline_name(), directory = dir, "directory removed."),
                Err(e) if is_not_found_error(&e) => {
                    trace!(pipeline = context.pipeline_name(), directory = dir, "directory already removed.")
                }
                Err(e) if is_directory_not_empty_error(&e) => {
                    trace!(pipeline = context.pipeline_name(), directory = dir, "directory still in use.");
                    break;
                }
                Err(e) => return Err(operation_error(e, &dir)),
            }
        }
        Ok(StepOutcome::Complete)
    }
}

async fn delete_container(context: &mut OperationContext) -> Result<StepOutcome> {
    let Some(name) = context.container.clone() else {
        return Ok(StepOutcome::Complete);
    };

    match context.timed(context.storage().delete_container(&name)).await {
        Ok(()) => debug!(pipeline = context.pipeline_name(), container = name, "container deleted."),
        Err(e) if is_not_found_error(&e) => {
            trace!(pipeline = context.pipeline_name(), container = name, "container already deleted.")
        }
        Err(e) if is_directory_not_empty_error(&e) => {
            trace!(pipeline = context.pipeline_name(), container = name, "container still in use.")
        }
        Err(e) => return Err(operation_error(e, &context.storage().container_path(&name))),
    }
    Ok(StepOutcome::Complete)
}
