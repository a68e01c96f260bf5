//! Shared integration test infrastructure for s3mon-rs.
//!
//! Builds runners and pipelines against the in-process memory store and
//! records every failure report they produce.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use s3mon_rs::ChainRunner;
use s3mon_rs::config::{ChainKind, PipelineConfig, ReportConfig, StorageLayout};
use s3mon_rs::report::{FailureProcessor, FailureReporter, ProcessedFailure, ReportSink};
use s3mon_rs::storage::memory::MemoryStorage;
use s3mon_rs::telemetry::{MetricsRegistry, SharedMetrics};

/// Minimum part size of the memory store used by the tests.
pub const MIN_PART_SIZE: u64 = 64;

/// Upper bound for anything the tests wait on.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct Report {
    pub message: String,
    pub path: Option<String>,
    pub url: Option<String>,
    pub tags: BTreeSet<String>,
    pub fatal: bool,
}

/// Report sink keeping everything it receives.
#[derive(Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<Report>>,
}

impl RecordingSink {
    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap().clone()
    }
}

impl ReportSink for RecordingSink {
    fn submit(&self, failure: &ProcessedFailure<'_>) -> Result<()> {
        self.reports.lock().unwrap().push(to_report(failure));
        Ok(())
    }
}

pub fn to_report(failure: &ProcessedFailure<'_>) -> Report {
    Report {
        message: failure.message.clone(),
        path: failure.path.clone(),
        url: failure.request.url.clone(),
        tags: failure.tags.clone(),
        fatal: failure.fatal,
    }
}

pub fn init_dummy_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dummy=trace")
        .try_init();
}

pub fn pipeline_config(name: &str, chain: ChainKind, threads: u16) -> PipelineConfig {
    let (min_file_size, max_file_size) = if chain.is_multipart() {
        (MIN_PART_SIZE, MIN_PART_SIZE * 4)
    } else {
        (16, 512)
    };
    PipelineConfig {
        name: name.to_string(),
        chain,
        threads,
        min_file_size,
        max_file_size,
        iteration_timeout: None,
        layout: StorageLayout::Directories,
    }
}

pub fn reporter(sink: Arc<RecordingSink>, report_config: &ReportConfig) -> FailureReporter {
    FailureReporter::new(FailureProcessor::new("memory://localhost", report_config), sink)
}

pub fn metrics() -> SharedMetrics {
    SharedMetrics::new(Arc::new(MetricsRegistry::new()))
}

pub fn runner(
    config: PipelineConfig,
    storage: &MemoryStorage,
    metrics: SharedMetrics,
    reporter: FailureReporter,
    runtime: &tokio::runtime::Runtime,
) -> ChainRunner {
    ChainRunner::new(
        config,
        Box::new(storage.clone()),
        metrics,
        reporter,
        runtime.handle().clone(),
    )
    .unwrap()
}

pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
