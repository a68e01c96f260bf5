//! Latency histograms and collectors.
//!
//! The engine only talks to a [`MetricsSink`]. [`MetricsRegistry`] is the
//! default sink: histograms go straight to the `metrics` facade and
//! collector samples are published as gauges whenever
//! [`MetricsRegistry::publish`] is called. Whatever recorder the embedding
//! process installs decides how they are exposed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, trace};

use crate::types::error::MetricsError;

/// Histogram receiving the latency of every storage request of a pipeline.
pub const REQUEST_LATENCY_HISTOGRAM: &str = "s3mon_request_latency_seconds";

/// Collector publishing the last elapsed time of every pipeline.
pub const ELAPSED_TIME_COLLECTOR: &str = "s3mon_chain_elapsed_milliseconds";

/// Last elapsed time in milliseconds, keyed by pipeline name.
pub type ElapsedTimeMap = Arc<DashMap<String, u64>>;

/// Latency histogram, keyed by pipeline name.
pub type HistogramMap = Arc<DashMap<String, LatencyHistogram>>;

/// A named source of samples scraped by the sink.
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;

    /// Current samples as `(pipeline, value)` pairs.
    fn samples(&self) -> Vec<(String, f64)>;
}

/// Destination of the engine's measurements.
pub trait MetricsSink: Send + Sync {
    /// Get or create the latency histogram of a pipeline.
    fn latency_histogram(&self, pipeline: &str) -> LatencyHistogram;

    /// Register a collector. Fails if one with the same name exists.
    fn register_collector(&self, collector: Arc<dyn Collector>) -> Result<(), MetricsError>;
}

/// Handle to a pipeline's latency histogram.
#[derive(Clone)]
pub struct LatencyHistogram {
    pipeline: String,
    histogram: metrics::Histogram,
}

impl LatencyHistogram {
    pub fn new(pipeline: impl Into<String>, histogram: metrics::Histogram) -> Self {
        Self {
            pipeline: pipeline.into(),
            histogram,
        }
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Record one sample, in seconds.
    pub fn record(&self, elapsed: Duration) {
        self.histogram.record(elapsed.as_secs_f64());
    }

    /// Start a timer that records the elapsed time when dropped.
    pub fn start_timer(&self) -> LatencyTimer {
        LatencyTimer {
            histogram: self.clone(),
            started: Instant::now(),
        }
    }
}

impl std::fmt::Debug for LatencyHistogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatencyHistogram")
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

pub struct LatencyTimer {
    histogram: LatencyHistogram,
    started: Instant,
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        self.histogram.record(self.started.elapsed());
    }
}

/// Publishes the [`ElapsedTimeMap`].
pub struct ElapsedTimeCollector {
    elapsed: ElapsedTimeMap,
}

impl ElapsedTimeCollector {
    pub fn new(elapsed: ElapsedTimeMap) -> Self {
        Self { elapsed }
    }
}

impl Collector for ElapsedTimeCollector {
    fn name(&self) -> &str {
        ELAPSED_TIME_COLLECTOR
    }

    fn samples(&self) -> Vec<(String, f64)> {
        let mut samples: Vec<(String, f64)> = self
            .elapsed
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value() as f64))
            .collect();
        samples.sort_by(|a, b| a.0.cmp(&b.0));
        samples
    }
}

/// Default [`MetricsSink`] backed by the `metrics` facade.
#[derive(Default)]
pub struct MetricsRegistry {
    collectors: DashMap<String, Arc<dyn Collector>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collector_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collectors.iter().map(|c| c.key().clone()).collect();
        names.sort();
        names
    }

    /// Set one gauge per collector sample.
    pub fn publish(&self) {
        for collector in self.collectors.iter() {
            for (pipeline, value) in collector.samples() {
                trace!(collector = %collector.key(), pipeline = %pipeline, value, "publish sample.");
                metrics::gauge!(collector.key().clone(), "pipeline" => pipeline).set(value);
            }
        }
    }
}

impl MetricsSink for MetricsRegistry {
    fn latency_histogram(&self, pipeline: &str) -> LatencyHistogram {
        let histogram = metrics::histogram!(REQUEST_LATENCY_HISTOGRAM, "pipeline" => pipeline.to_string());
        LatencyHistogram::new(pipeline, histogram)
    }

    fn register_collector(&self, collector: Arc<dyn Collector>) -> Result<(), MetricsError> {
        match self.collectors.entry(collector.name().to_string()) {
            Entry::Occupied(entry) => Err(MetricsError::new("collector already registered")
                .with_context("collector", entry.key())),
            Entry::Vacant(entry) => {
                debug!(collector = %entry.key(), "collector registered.");
                entry.insert(collector);
                Ok(())
            }
        }
    }
}

/// Metric state shared by every runner and pipeline of a process.
#[derive(Clone)]
pub struct SharedMetrics {
    sink: Arc<dyn MetricsSink>,
    elapsed: ElapsedTimeMap,
    histograms: HistogramMap,
    collector_registered: Arc<AtomicBool>,
}

impl SharedMetrics {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            sink,
            elapsed: Arc::new(DashMap::new()),
            histograms: Arc::new(DashMap::new()),
            collector_registered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn elapsed(&self) -> &ElapsedTimeMap {
        &self.elapsed
    }

    pub fn histograms(&self) -> &HistogramMap {
        &self.histograms
    }

    /// Make sure the pipeline has a latency histogram in the shared map.
    pub fn register_histogram(&self, pipeline: &str) -> LatencyHistogram {
        self.histograms
            .entry(pipeline.to_string())
            .or_insert_with(|| self.sink.latency_histogram(pipeline))
            .clone()
    }

    /// Store the elapsed time of the last successful iteration.
    pub fn record_elapsed(&self, pipeline: &str, elapsed: Duration) {
        self.elapsed
            .insert(pipeline.to_string(), elapsed.as_millis() as u64);
    }

    pub fn is_collector_registered(&self) -> bool {
        self.collector_registered.load(Ordering::Acquire)
    }

    /// Register the elapsed-time collector unless it already is.
    ///
    /// Only the caller winning the compare-and-set talks to the sink. If the
    /// sink refuses, the flag is cleared again so a later iteration retries.
    pub fn ensure_collector_registered(&self) -> Result<(), MetricsError> {
        if self
            .collector_registered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let collector = Arc::new(ElapsedTimeCollector::new(self.elapsed.clone()));
        if let Err(e) = self.sink.register_collector(collector) {
            self.collector_registered.store(false, Ordering::Release);
            return Err(e);
        }
        Ok(())
    }
}
