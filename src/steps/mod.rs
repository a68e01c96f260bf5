//! Pipeline steps and the step lists of each chain.
//!
//! A step performs one unit of work on the [`OperationContext`] and either
//! lets the pipeline continue or completes it early. Steps are stateless
//! unit structs, so every chain is a static slice of them.

use anyhow::Result;
use async_trait::async_trait;

use crate::config::ChainKind;
use crate::context::OperationContext;
use crate::types::error::OperationError;

pub mod delete;
pub mod generate;
pub mod mkdir;
pub mod put;
pub mod verify;

pub use delete::{Cleanup, DeleteFile};
pub use generate::GenerateFile;
pub use mkdir::Mkdir;
pub use put::{MultipartPutFile, PutFile};
pub use verify::{GetFile, HeadFile};

/// What the pipeline does after a step succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    /// Skip the remaining steps; the iteration succeeded.
    Complete,
}

#[async_trait]
pub trait PipelineStep: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, context: &mut OperationContext) -> Result<StepOutcome>;
}

static FILE_UPLOAD_GET_DELETE_STEPS: &[&dyn PipelineStep] = &[
    &GenerateFile,
    &Mkdir,
    &PutFile,
    &GetFile,
    &DeleteFile,
    &Cleanup,
];

static FILE_MULTIPART_UPLOAD_GET_DELETE_STEPS: &[&dyn PipelineStep] = &[
    &GenerateFile,
    &Mkdir,
    &MultipartPutFile,
    &HeadFile,
    &GetFile,
    &DeleteFile,
    &Cleanup,
];

impl ChainKind {
    /// Steps executed, in order, by every iteration of this chain.
    pub fn steps(&self) -> &'static [&'static dyn PipelineStep] {
        match self {
            ChainKind::FileUploadGetDelete => FILE_UPLOAD_GET_DELETE_STEPS,
            ChainKind::FileMultipartUploadGetDelete => FILE_MULTIPART_UPLOAD_GET_DELETE_STEPS,
        }
    }
}

/// Wrap a storage failure with the path it was about.
pub(crate) fn operation_error(source: anyhow::Error, path: &str) -> anyhow::Error {
    anyhow::Error::new(OperationError::wrap(source).with_path(path))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_step_lists() {
        let names: Vec<&str> = ChainKind::FileUploadGetDelete
            .steps()
            .iter()
            .map(|s| s.name())
            .collect();
        assert_eq!(
            names,
            vec!["GenerateFile", "Mkdir", "PutFile", "GetFile", "DeleteFile", "Cleanup"]
        );

        let names: Vec<&str> = ChainKind::FileMultipartUploadGetDelete
            .steps()
            .iter()
            .map(|s| s.name())
            .collect();
        assert_eq!(
            names,
            vec![
                "GenerateFile",
                "Mkdir",
                "MultipartPutFile",
                "HeadFile",
                "GetFile",
                "DeleteFile",
                "Cleanup"
            ]
        );
    }

    #[test]
    fn operation_error_carries_path() {
        let e = operation_error(anyhow::anyhow!("boom"), "/a/b.txt");
        let operation = e.downcast_ref::<OperationError>().unwrap();
        assert_eq!(operation.path(), Some("/a/b.txt"));
        assert_eq!(e.to_string(), "boom");
    }
}
