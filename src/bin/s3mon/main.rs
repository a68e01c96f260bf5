use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::runtime::Handle;
use tokio::select;
use tracing::{debug, error, info, trace, warn};

use s3mon_rs::config::Config;
use s3mon_rs::report::{FailureProcessor, FailureReporter, TracingReportSink};
use s3mon_rs::storage::create_storage;
use s3mon_rs::telemetry::{MetricsRegistry, SharedMetrics};
use s3mon_rs::{CLIArgs, ChainRunner, ShutdownToken, create_shutdown_token, exit_code_from_error};

mod ctrl_c_handler;
mod tracing_init;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// s3mon - Synthetic workload monitor for object storage.
///
/// This binary is a thin wrapper over the s3mon-rs library.
#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config_exit_if_err();

    start_tracing_if_necessary(&config);

    trace!("config = {:?}", config);

    let shutdown_token = create_shutdown_token();
    ctrl_c_handler::spawn_ctrl_c_handler(shutdown_token.clone());

    if let Err(e) = run(config, shutdown_token).await {
        error!(error = format!("{e:#}"), "s3mon failed.");
        std::process::exit(exit_code_from_error(&e));
    }

    Ok(())
}

fn load_config_exit_if_err() -> Config {
    match Config::try_from(CLIArgs::parse()) {
        Ok(config) => config,
        Err(error_message) => {
            clap::Error::raw(clap::error::ErrorKind::ValueValidation, error_message).exit()
        }
    }
}

fn start_tracing_if_necessary(config: &Config) -> bool {
    let Some(tracing_config) = config.tracing_config.as_ref() else {
        return false;
    };

    tracing_init::init_tracing(tracing_config);
    true
}

async fn run(mut config: Config, shutdown_token: ShutdownToken) -> Result<()> {
    let storage = create_storage(&config).await;
    config.load_pipelines(&storage).await?;
    let registry = Arc::new(MetricsRegistry::new());
    let metrics = SharedMetrics::new(registry.clone());
    let reporter = FailureReporter::new(
        FailureProcessor::new(storage.base_url(), &config.report_config),
        Arc::new(TracingReportSink),
    );

    let mut runners = Vec::with_capacity(config.pipelines.len());
    for pipeline in &config.pipelines {
        runners.push(Arc::new(ChainRunner::new(
            pipeline.clone(),
            storage.clone(),
            metrics.clone(),
            reporter.clone(),
            Handle::current(),
        )?));
    }

    for runner in &runners {
        if let Err(e) = runner.start() {
            shutdown(&runners, false).await;
            return Err(e);
        }
    }
    info!(runners = runners.len(), target = %storage.base_url(), "s3mon started.");

    loop {
        select! {
            _ = shutdown_token.cancelled() => {
                debug!("shutdown requested.");
                break;
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {
                registry.publish();
                if runners.iter().all(|runner| !runner.is_running()) {
                    warn!("every runner has stopped.");
                    break;
                }
            }
        }
    }

    shutdown(&runners, config.purge_on_shutdown).await;
    info!("s3mon stopped.");
    Ok(())
}

/// Stop every runner, wait for its workers and optionally purge its data.
async fn shutdown(runners: &[Arc<ChainRunner>], purge: bool) {
    for runner in runners {
        runner.stop();
    }

    for runner in runners {
        let joined = runner.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || joined.join()).await {
            warn!(runner = runner.name(), error = e.to_string(), "failed to join runner.");
        }
    }

    if !purge {
        return;
    }
    for runner in runners {
        if let Err(e) = runner.purge().await {
            warn!(
                runner = runner.name(),
                error = format!("{e:#}"),
                "failed to purge runner data."
            );
        }
    }
}
