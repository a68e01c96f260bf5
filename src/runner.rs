//! Worker pool executing one pipeline configuration.
//!
//! Every worker is an OS thread that owns one [`OperationContext`] and loops
//! "reset context, run pipeline" until the runner is stopped. Network I/O is
//! driven by a shared tokio runtime; a worker blocks only its own thread.
//! Stopping is cooperative: the flag is checked before each iteration and
//! in-flight requests are never interrupted.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::config::{PipelineConfig, StorageLayout};
use crate::context::OperationContext;
use crate::pipeline::Pipeline;
use crate::report::FailureReporter;
use crate::storage::{Storage, StorageError, is_not_found_error};
use crate::telemetry::SharedMetrics;
use crate::types::error::S3monError;
use crate::types::join_path;

/// Directory below the storage root that holds the data of every chain.
pub const DATA_DIRECTORY: &str = "s3mon-data";

/// Prefix of the containers created in the containers layout.
pub const CONTAINER_PREFIX: &str = "s3mon";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Created,
    Running,
    Stopped,
}

/// Called with the worker thread name when a worker dies of a failure
/// outside the pipeline.
pub type UncaughtHandler = Arc<dyn Fn(&str, &anyhow::Error) + Send + Sync>;

fn default_uncaught_handler() -> UncaughtHandler {
    Arc::new(|worker: &str, e: &anyhow::Error| {
        error!(worker, error = format!("{e:#}"), "worker terminated by an uncaught failure.");
    })
}

pub struct ChainRunner {
    config: PipelineConfig,
    storage: Storage,
    pipeline: Arc<Pipeline>,
    metrics: SharedMetrics,
    reporter: FailureReporter,
    runtime: Handle,
    base_directory: String,
    uncaught_handler: UncaughtHandler,

    state: Mutex<RunnerState>,
    stop_requested: Arc<AtomicBool>,
    active_workers: Arc<AtomicUsize>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ChainRunner {
    /// Validate the configuration against the store and prepare the runner.
    ///
    /// The base directory is computed here, once, and shared by all workers.
    pub fn new(
        config: PipelineConfig,
        storage: Storage,
        metrics: SharedMetrics,
        reporter: FailureReporter,
        runtime: Handle,
    ) -> Result<Self> {
        config.validate()?;
        if config.chain.is_multipart() && config.min_file_size < storage.minimum_part_size() {
            return Err(anyhow!(S3monError::InvalidConfig(format!(
                "pipeline '{}': minFileSize ({}) is smaller than the minimum part size ({}) of the store",
                config.name,
                config.min_file_size,
                storage.minimum_part_size()
            ))));
        }

        let base_directory = match config.layout {
            StorageLayout::Directories => join_path(&[
                &storage.root_directory(),
                DATA_DIRECTORY,
                config.chain.name(),
            ]),
            StorageLayout::Containers => {
                format!("{CONTAINER_PREFIX}-{}", config.chain.container_token())
            }
        };
        metrics.register_histogram(&config.name);
        let pipeline = Arc::new(Pipeline::new(&config, metrics.clone()));

        Ok(Self {
            config,
            storage,
            pipeline,
            metrics,
            reporter,
            runtime,
            base_directory,
            uncaught_handler: default_uncaught_handler(),
            state: Mutex::new(RunnerState::Created),
            stop_requested: Arc::new(AtomicBool::new(false)),
            active_workers: Arc::new(AtomicUsize::new(0)),
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn with_uncaught_handler(mut self, handler: UncaughtHandler) -> Self {
        self.uncaught_handler = handler;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn base_directory(&self) -> &str {
        &self.base_directory
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    pub fn state(&self) -> RunnerState {
        *self.state.lock().unwrap()
    }

    /// Spawn the workers. Only valid once, on a freshly created runner.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if *state != RunnerState::Created {
            return Err(anyhow!(S3monError::InvalidState(format!(
                "runner '{}' cannot be started in state {:?}",
                self.config.name, *state
            ))));
        }

        let threads = self.config.threads as usize;
        self.active_workers.store(threads, Ordering::SeqCst);

        let mut workers = self.workers.lock().unwrap();
        for n in 0..threads {
            let worker = self.worker();
            let active_workers = self.active_workers.clone();
            let uncaught_handler = self.uncaught_handler.clone();
            let thread_name = format!("{}-{n}", self.config.name);

            let spawned = std::thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || {
                    let _guard = ActiveWorkerGuard(active_workers);
                    match std::panic::catch_unwind(AssertUnwindSafe(|| worker.run())) {
                        Ok(Ok(())) => debug!(worker = thread_name, "worker stopped."),
                        Ok(Err(e)) => uncaught_handler(&thread_name, &e),
                        Err(panic) => {
                            let e = anyhow!(S3monError::Pipeline(format!(
                                "worker panicked: {}",
                                panic_message(panic.as_ref())
                            )));
                            uncaught_handler(&thread_name, &e);
                        }
                    }
                });

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    self.stop_requested.store(true, Ordering::SeqCst);
                    self.active_workers.fetch_sub(threads - n, Ordering::SeqCst);
                    *state = RunnerState::Stopped;
                    return Err(anyhow!(S3monError::Io(format!(
                        "failed to spawn worker thread: {e}"
                    ))));
                }
            }
        }

        *state = RunnerState::Running;
        info!(
            runner = self.config.name,
            chain = %self.config.chain,
            threads,
            base_directory = self.base_directory,
            "runner started."
        );
        Ok(())
    }

    /// Ask every worker to exit after its current iteration.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        self.stop_requested.store(true, Ordering::SeqCst);
        if *state != RunnerState::Stopped {
            *state = RunnerState::Stopped;
            info!(runner = self.config.name, "runner stopping.");
        }
    }

    /// True until every worker has exited.
    pub fn is_running(&self) -> bool {
        self.active_workers() > 0
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    /// Wait for all worker threads to exit.
    pub fn join(&self) {
        let workers: Vec<JoinHandle<()>> = self.workers.lock().unwrap().drain(..).collect();
        for worker in workers {
            let name = worker.thread().name().unwrap_or_default().to_string();
            if worker.join().is_err() {
                warn!(worker = name, "worker thread panicked.");
            }
        }
    }

    /// Recursively delete the runner's base directory, or in the containers
    /// layout every container the runner created. Only valid once the runner
    /// has been stopped and every worker has exited.
    pub async fn purge(&self) -> Result<()> {
        if self.state() != RunnerState::Stopped || self.is_running() {
            return Err(anyhow!(S3monError::InvalidState(format!(
                "runner '{}' must be stopped before purging",
                self.config.name
            ))));
        }
        match self.config.layout {
            StorageLayout::Directories => {
                self.storage.delete_recursive(&self.base_directory).await?
            }
            StorageLayout::Containers => self.purge_containers().await?,
        }
        info!(
            runner = self.config.name,
            base_directory = self.base_directory,
            "runner data purged."
        );
        Ok(())
    }

    async fn purge_containers(&self) -> Result<()> {
        let prefix = format!("{}-", self.base_directory);
        for name in self.storage.list_containers(&prefix).await? {
            self.storage
                .delete_recursive(&self.storage.container_path(&name))
                .await?;
            match self.storage.delete_container(&name).await {
                Err(e) if !is_not_found_error(&e) => return Err(e),
                _ => debug!(runner = self.config.name, container = name, "container purged."),
            }
        }
        Ok(())
    }

    fn worker(&self) -> Worker {
        Worker {
            config: self.config.clone(),
            storage: self.storage.clone(),
            pipeline: self.pipeline.clone(),
            metrics: self.metrics.clone(),
            reporter: self.reporter.clone(),
            runtime: self.runtime.clone(),
            base_directory: self.base_directory.clone(),
            stop_requested: self.stop_requested.clone(),
        }
    }
}

struct ActiveWorkerGuard(Arc<AtomicUsize>);

impl Drop for ActiveWorkerGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Worker {
    config: PipelineConfig,
    storage: Storage,
    pipeline: Arc<Pipeline>,
    metrics: SharedMetrics,
    reporter: FailureReporter,
    runtime: Handle,
    base_directory: String,
    stop_requested: Arc<AtomicBool>,
}

impl Worker {
    fn run(&self) -> Result<()> {
        let mut context = OperationContext::new(
            self.storage.clone(),
            &self.config,
            &self.base_directory,
            self.metrics.histograms().clone(),
        );

        while !self.stop_requested.load(Ordering::SeqCst) {
            context.reset()?;
            if let Err(e) = self.runtime.block_on(self.run_iteration(&mut context)) {
                self.reporter.report(&e);
            }
        }
        context.reset()
    }

    async fn run_iteration(&self, context: &mut OperationContext) -> Result<()> {
        let Some(deadline) = self.config.iteration_timeout else {
            return self.pipeline.execute(context).await;
        };

        match tokio::time::timeout(deadline, self.pipeline.execute(context)).await {
            Ok(result) => result,
            Err(_) => {
                self.abort_pending_upload(context).await;
                Err(anyhow!(StorageError::Timeout(format!(
                    "iteration of pipeline '{}' did not finish within {}",
                    self.config.name,
                    format_duration(deadline)
                ))))
            }
        }
    }

    /// Abort the multipart upload a timed-out iteration left behind.
    async fn abort_pending_upload(&self, context: &mut OperationContext) {
        let Some(upload) = context.take_pending_upload() else {
            return;
        };
        match self.storage.abort_multipart_upload(&upload).await {
            Ok(()) => debug!(
                pipeline = self.config.name,
                path = upload.path,
                upload_id = upload.upload_id,
                "abandoned multipart upload aborted."
            ),
            Err(e) => warn!(
                pipeline = self.config.name,
                path = upload.path,
                upload_id = upload.upload_id,
                error = format!("{e:#}"),
                "failed to abort abandoned multipart upload."
            ),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
