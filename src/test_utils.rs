//! Shared test utilities for the s3mon-rs library crate.

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::report::{ProcessedFailure, ReportSink};

/// Initialise a dummy tracing subscriber for tests.
///
/// Uses `try_init` so that only the first call in a process actually
/// installs the subscriber; subsequent calls are silently ignored.
pub(crate) fn init_dummy_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dummy=trace")
        .try_init();
}

/// Poll `condition` every 10ms until it holds or `timeout` passes.
pub(crate) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedReport {
    pub message: String,
    pub tags: BTreeSet<String>,
    pub path: Option<String>,
}

/// Report sink that keeps everything it receives.
#[derive(Default)]
pub(crate) struct RecordingReportSink {
    reports: Mutex<Vec<RecordedReport>>,
    panic_on_submit: bool,
}

impl RecordingReportSink {
    pub(crate) fn panicking() -> Self {
        Self {
            reports: Mutex::new(Vec::new()),
            panic_on_submit: true,
        }
    }

    pub(crate) fn reports(&self) -> Vec<RecordedReport> {
        self.reports.lock().unwrap().clone()
    }
}

impl ReportSink for RecordingReportSink {
    fn submit(&self, failure: &ProcessedFailure<'_>) -> Result<()> {
        if self.panic_on_submit {
            panic!("report sink exploded: {}", failure.message);
        }
        self.reports.lock().unwrap().push(RecordedReport {
            message: failure.message.clone(),
            tags: failure.tags.clone(),
            path: failure.path.clone(),
        });
        Ok(())
    }
}
