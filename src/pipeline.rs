//! One iteration of a chain: run its steps in order against a context.
//!
//! A failing step ends the iteration and its error is returned to the
//! caller as data; nothing after it runs. On success the elapsed time is
//! published through the shared metrics.

use anyhow::{Result, anyhow};
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::context::OperationContext;
use crate::steps::{PipelineStep, StepOutcome};
use crate::telemetry::SharedMetrics;

/// Ordered steps of a named pipeline.
///
/// ## Usage
///
/// ```no_run
/// # async fn example(context: &mut s3mon_rs::context::OperationContext) {
/// # use s3mon_rs::config::PipelineConfig;
/// # use s3mon_rs::pipeline::Pipeline;
/// # use s3mon_rs::telemetry::{MetricsRegistry, SharedMetrics};
/// # use std::sync::Arc;
/// # let config: PipelineConfig = todo!();
/// let metrics = SharedMetrics::new(Arc::new(MetricsRegistry::new()));
/// let pipeline = Pipeline::new(&config, metrics);
/// if let Err(e) = pipeline.execute(context).await {
///     eprintln!("{e:#}");
/// }
/// # }
/// ```
pub struct Pipeline {
    name: String,
    steps: Vec<&'static dyn PipelineStep>,
    metrics: SharedMetrics,
}

impl Pipeline {
    pub fn new(config: &PipelineConfig, metrics: SharedMetrics) -> Self {
        Self::with_steps(&config.name, config.chain.steps().to_vec(), metrics)
    }

    pub fn with_steps(
        name: &str,
        steps: Vec<&'static dyn PipelineStep>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            name: name.to_string(),
            steps,
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run one iteration.
    ///
    /// Returns the first step failure, or a metrics failure if the
    /// elapsed-time collector cannot be registered.
    pub async fn execute(&self, context: &mut OperationContext) -> Result<()> {
        info!(pipeline = self.name, "{} starting", self.name);
        context.stopwatch.start();

        let result = self.run_steps(context).await;
        context.stopwatch.stop();
        let elapsed = context.stopwatch.elapsed();

        let result = result.and_then(|()| {
            self.metrics.record_elapsed(&self.name, elapsed);
            self.metrics
                .ensure_collector_registered()
                .map_err(|e| anyhow!(e))
        });

        info!(
            pipeline = self.name,
            elapsed_milliseconds = elapsed.as_millis() as u64,
            success = result.is_ok(),
            "{} finished",
            self.name
        );
        result
    }

    async fn run_steps(&self, context: &mut OperationContext) -> Result<()> {
        for step in &self.steps {
            match step.execute(context).await {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Complete) => {
                    debug!(pipeline = self.name, step = step.name(), "pipeline completed by step.");
                    break;
                }
                Err(e) => {
                    debug!(
                        pipeline = self.name,
                        step = step.name(),
                        error = format!("{e:#}"),
                        "step failed."
                    );
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}
