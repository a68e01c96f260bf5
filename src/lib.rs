/*!
# Overview
s3mon-rs is a synthetic workload monitor for object storage.
It continuously runs small upload, verify, download and delete pipelines
against a store, checks data integrity end to end, records latency and
reports every failure with a normalized, tagged description.

## Features
- **Pipelines**: single-request and multipart upload chains, each verified by
  size and SHA-256 checksum
- **Chain Runners**: one worker pool per catalog entry, each worker running its
  pipeline in a loop until stopped
- **Failure Classification**: timeouts and well-known HTTP status codes are
  turned into report tags; metrics failures are fatal
- **Metrics**: per-pipeline latency histograms and elapsed-time gauges through
  the `metrics` facade
- **Backends**: Amazon S3 (and compatible endpoints) and an in-process memory
  store with fault injection

## As a Library
The s3mon CLI is a thin wrapper over the s3mon-rs library.

```toml
[dependencies]
s3mon-rs = "0.1"
tokio = { version = "1", features = ["full"] }
```

```no_run
use std::sync::Arc;

use s3mon_rs::config::{ChainKind, PipelineConfig, StorageLayout};
use s3mon_rs::report::{FailureProcessor, FailureReporter, TracingReportSink};
use s3mon_rs::storage::create_storage;
use s3mon_rs::telemetry::{MetricsRegistry, SharedMetrics};
use s3mon_rs::{ChainRunner, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::for_memory(vec![PipelineConfig {
        name: "smoke".to_string(),
        chain: ChainKind::FileUploadGetDelete,
        threads: 2,
        min_file_size: 1024,
        max_file_size: 4096,
        iteration_timeout: None,
        layout: StorageLayout::Directories,
    }]);

    let storage = create_storage(&config).await;
    let metrics = SharedMetrics::new(Arc::new(MetricsRegistry::new()));
    let reporter = FailureReporter::new(
        FailureProcessor::new(&storage.base_url(), &config.report_config),
        Arc::new(TracingReportSink),
    );

    let runner = ChainRunner::new(
        config.pipelines[0].clone(),
        storage,
        metrics,
        reporter,
        tokio::runtime::Handle::current(),
    )?;
    runner.start()?;
    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
    runner.stop();
    tokio::task::spawn_blocking(move || runner.join()).await?;
    Ok(())
}
```
*/

pub mod chunk;
pub mod config;
pub mod context;
pub mod path;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod steps;
pub mod storage;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::Config;
pub use config::args::{CLIArgs, build_config_from_args, parse_from_args};
pub use pipeline::Pipeline;
pub use runner::{ChainRunner, RunnerState};
pub use types::error::{S3monError, exit_code_from_error};
pub use types::token::{ShutdownToken, create_shutdown_token};
