//! Per-iteration state threaded through the steps of a pipeline.

use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use tempfile::TempPath;
use tracing::warn;

use crate::config::{PipelineConfig, StorageLayout};
use crate::path::PathGenerator;
use crate::storage::Storage;
use crate::telemetry::{HistogramMap, LatencyHistogram};
use crate::types::MultipartUpload;
use crate::types::error::S3monError;

/// SHA-256 digest of a generated test file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checksum([u8; 32]);

impl Checksum {
    pub fn new(raw: [u8; 32]) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// The file produced by the generate step.
#[derive(Debug)]
pub struct TestArtifact {
    local_file: Option<TempPath>,
    size: u64,
    checksum: Checksum,
}

impl TestArtifact {
    pub fn new(local_file: TempPath, size: u64, checksum: Checksum) -> Self {
        Self {
            local_file: Some(local_file),
            size,
            checksum,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    /// Location of the local copy, until it has been removed.
    pub fn local_file(&self) -> Option<&Path> {
        self.local_file.as_deref()
    }

    /// Delete the local copy. A file that is already gone is not an error.
    pub fn remove_local_file(&mut self) -> Result<()> {
        let Some(local_file) = self.local_file.take() else {
            return Ok(());
        };
        match local_file.close() {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                Err(anyhow!(S3monError::Io(e.to_string())))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Stopwatch {
    started: Option<Instant>,
    stopped: Option<Instant>,
}

impl Stopwatch {
    pub fn start(&mut self) {
        self.started = Some(Instant::now());
        self.stopped = None;
    }

    pub fn stop(&mut self) {
        if self.started.is_some() {
            self.stopped = Some(Instant::now());
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.is_some()
    }

    /// Time between start and stop, or until now while still running.
    pub fn elapsed(&self) -> Duration {
        match (self.started, self.stopped) {
            (Some(started), Some(stopped)) => stopped.duration_since(started),
            (Some(started), None) => started.elapsed(),
            _ => Duration::ZERO,
        }
    }
}

/// Mutable state of one pipeline iteration.
///
/// Owned by a single worker and reset before every iteration. The storage
/// handle, histogram map, path generator and size bounds survive a reset.
pub struct OperationContext {
    storage: Storage,
    pipeline_name: String,
    layout: StorageLayout,
    min_file_size: u64,
    max_file_size: u64,
    path_generator: PathGenerator,
    histograms: HistogramMap,

    /// Container created for this iteration in the containers layout.
    pub container: Option<String>,
    pub directory: Option<String>,
    pub file_path: Option<String>,
    artifact: Option<TestArtifact>,
    /// Multipart upload initiated but neither completed nor aborted yet.
    pending_upload: Option<MultipartUpload>,
    pub stopwatch: Stopwatch,
}

impl OperationContext {
    pub fn new(
        storage: Storage,
        pipeline: &PipelineConfig,
        base_directory: &str,
        histograms: HistogramMap,
    ) -> Self {
        Self {
            storage,
            pipeline_name: pipeline.name.clone(),
            layout: pipeline.layout,
            min_file_size: pipeline.min_file_size,
            max_file_size: pipeline.max_file_size,
            path_generator: PathGenerator::new(base_directory),
            histograms,
            container: None,
            directory: None,
            file_path: None,
            artifact: None,
            pending_upload: None,
            stopwatch: Stopwatch::default(),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    pub fn layout(&self) -> StorageLayout {
        self.layout
    }

    pub fn min_file_size(&self) -> u64 {
        self.min_file_size
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    pub fn path_generator(&self) -> &PathGenerator {
        &self.path_generator
    }

    pub fn base_directory(&self) -> &str {
        self.path_generator.root()
    }

    pub fn artifact(&self) -> Option<&TestArtifact> {
        self.artifact.as_ref()
    }

    pub fn artifact_mut(&mut self) -> Option<&mut TestArtifact> {
        self.artifact.as_mut()
    }

    /// Record the generated file. Only one artifact per iteration.
    pub fn set_artifact(&mut self, artifact: TestArtifact) -> Result<()> {
        if self.artifact.is_some() {
            return Err(anyhow!(S3monError::InvalidState(
                "test artifact has already been generated for this iteration".to_string()
            )));
        }
        self.artifact = Some(artifact);
        Ok(())
    }

    pub fn require_artifact(&self) -> Result<&TestArtifact> {
        self.artifact.as_ref().ok_or_else(|| {
            anyhow!(S3monError::InvalidState(
                "no test artifact has been generated".to_string()
            ))
        })
    }

    pub fn require_directory(&self) -> Result<&str> {
        self.directory.as_deref().ok_or_else(|| {
            anyhow!(S3monError::InvalidState(
                "no directory has been created".to_string()
            ))
        })
    }

    pub fn require_file_path(&self) -> Result<&str> {
        self.file_path.as_deref().ok_or_else(|| {
            anyhow!(S3monError::InvalidState(
                "no file has been uploaded".to_string()
            ))
        })
    }

    pub fn set_pending_upload(&mut self, upload: MultipartUpload) {
        self.pending_upload = Some(upload);
    }

    /// Hand over the unfinished multipart upload, if any.
    pub fn take_pending_upload(&mut self) -> Option<MultipartUpload> {
        self.pending_upload.take()
    }

    pub fn histogram(&self) -> Option<LatencyHistogram> {
        self.histograms
            .get(&self.pipeline_name)
            .map(|h| h.value().clone())
    }

    /// Await `operation`, recording its latency if the pipeline has a histogram.
    pub async fn timed<F: Future>(&self, operation: F) -> F::Output {
        let _timer = self.histogram().map(|h| h.start_timer());
        operation.await
    }

    /// Clear everything the previous iteration produced.
    pub fn reset(&mut self) -> Result<()> {
        self.container = None;
        self.directory = None;
        self.pending_upload = None;
        self.file_path = None;
        self.stopwatch = Stopwatch::default();

        if let Some(mut artifact) = self.artifact.take() {
            if let Err(e) = artifact.remove_local_file() {
                warn!(
                    pipeline = self.pipeline_name.as_str(),
                    error = format!("{e:#}"),
                    "failed to remove the local test file."
                );
                return Err(e);
            }
        }
        Ok(())
    }
}
