use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::config::StorageLayout;
use crate::context::OperationContext;
use crate::steps::{PipelineStep, StepOutcome, operation_error};
use crate::storage::is_already_exists_error;

/// Creates the checksum-derived directory of the test file, or in the
/// containers layout a fresh container named after the runner's base.
pub struct Mkdir;

#[async_trait]
impl PipelineStep for Mkdir {
    fn name(&self) -> &'static str {
        "Mkdir"
    }

    async fn execute(&self, context: &mut OperationContext) -> Result<StepOutcome> {
        if context.layout() == StorageLayout::Containers {
            return create_container(context).await;
        }

        let checksum = *context.require_artifact()?.checksum();
        let directory = context.path_generator().generate(checksum.raw())?;

        context
            .timed(context.storage().create_directory(&directory))
            .await
            .map_err(|e| operation_error(e, &directory))?;

        debug!(pipeline = context.pipeline_name(), directory, "directory created.");
        context.directory = Some(directory);
        Ok(StepOutcome::Continue)
    }
}

async fn create_container(context: &mut OperationContext) -> Result<StepOutcome> {
    let name = format!("{}-{}", context.base_directory(), Uuid::new_v4());
    let path = context.storage().container_path(&name);

    match context.timed(context.storage().create_container(&name)).await {
        Ok(()) => debug!(pipeline = context.pipeline_name(), container = name, "container created."),
        Err(e) if is_already_exists_error(&e) => {
            debug!(pipeline = context.pipeline_name(), container = name, "container already exists.")
        }
        Err(e) => return Err(operation_error(e, &path)),
    }

    context.container = Some(name);
    context.directory = Some(path);
    Ok(StepOutcome::Continue)
}
