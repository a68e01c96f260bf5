pub mod args;
pub mod catalog;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::types::error::S3monError;
use crate::types::{ClientConfigLocation, S3Credentials, StoragePath};

/// Minimum multipart part size used by the memory backend unless overridden.
pub const DEFAULT_MEMORY_MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Main configuration for the monitor.
///
/// Holds the target store, how to reach it, the pipeline catalog and the
/// reporting defaults. Built from the command line through
/// `TryFrom<`[`args::CLIArgs`]`>` or by hand for library usage.
///
/// ```
/// use s3mon_rs::Config;
/// use s3mon_rs::config::{ChainKind, PipelineConfig, StorageLayout};
/// use s3mon_rs::types::StoragePath;
///
/// let mut config = Config::default();
/// config.target = StoragePath::Memory;
/// config.pipelines.push(PipelineConfig {
///     name: "smoke".to_string(),
///     chain: ChainKind::FileUploadGetDelete,
///     threads: 2,
///     min_file_size: 1024,
///     max_file_size: 4096,
///     iteration_timeout: None,
///     layout: StorageLayout::Directories,
/// });
/// assert_eq!(config.pipelines.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub target: StoragePath,
    pub target_client_config: Option<ClientConfig>,
    pub tracing_config: Option<TracingConfig>,
    pub pipelines: Vec<PipelineConfig>,
    /// Source of `pipelines` when they are loaded after the store is created.
    pub catalog: Option<catalog::CatalogLocation>,
    pub report_config: ReportConfig,
    pub purge_on_shutdown: bool,
    pub memory_min_part_size: u64,
}

impl Config {
    /// Configuration running `pipelines` against the in-process memory store.
    pub fn for_memory(pipelines: Vec<PipelineConfig>) -> Self {
        Config {
            target: StoragePath::Memory,
            pipelines,
            ..Config::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            target: StoragePath::S3 {
                bucket: String::new(),
                prefix: String::new(),
            },
            target_client_config: None,
            tracing_config: None,
            pipelines: Vec::new(),
            catalog: None,
            report_config: ReportConfig::default(),
            purge_on_shutdown: false,
            memory_min_part_size: DEFAULT_MEMORY_MIN_PART_SIZE,
        }
    }
}

/// AWS S3 client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub client_config_location: ClientConfigLocation,
    pub credential: S3Credentials,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
    pub retry_config: RetryConfig,
    pub cli_timeout_config: CLITimeoutConfig,
}

/// Retry configuration for AWS SDK operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub aws_max_attempts: u32,
    pub initial_backoff_milliseconds: u64,
}

/// Timeout configuration for AWS SDK operations.
#[derive(Debug, Clone)]
pub struct CLITimeoutConfig {
    pub operation_timeout_milliseconds: Option<u64>,
    pub operation_attempt_timeout_milliseconds: Option<u64>,
    pub connect_timeout_milliseconds: Option<u64>,
    pub read_timeout_milliseconds: Option<u64>,
}

/// Tracing (logging) configuration.
#[derive(Debug, Clone, Copy)]
pub struct TracingConfig {
    pub tracing_level: log::Level,
    pub json_tracing: bool,
    pub aws_sdk_tracing: bool,
    pub span_events_tracing: bool,
    pub disable_color_tracing: bool,
}

/// Values attached to every failure report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportConfig {
    pub base_tags: Vec<String>,
    pub base_context: Vec<(String, String)>,
}

/// Step sequence a pipeline runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainKind {
    /// Single-request upload, then download, delete and cleanup.
    FileUploadGetDelete,
    /// Multipart upload, metadata check, then download, delete and cleanup.
    FileMultipartUploadGetDelete,
}

impl ChainKind {
    /// Identifier used in the catalog and in the runner's base directory.
    pub fn name(&self) -> &'static str {
        match self {
            ChainKind::FileUploadGetDelete => "FileUploadGetDeleteChain",
            ChainKind::FileMultipartUploadGetDelete => "FileMultipartUploadGetDeleteChain",
        }
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self, ChainKind::FileMultipartUploadGetDelete)
    }

    /// Short lowercase token used in container names.
    pub fn container_token(&self) -> &'static str {
        match self {
            ChainKind::FileUploadGetDelete => "upload",
            ChainKind::FileMultipartUploadGetDelete => "multipart",
        }
    }
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChainKind {
    type Err = S3monError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "FileUploadGetDeleteChain" | "file-upload-get-delete" => {
                Ok(ChainKind::FileUploadGetDelete)
            }
            "FileMultipartUploadGetDeleteChain" | "file-multipart-upload-get-delete" => {
                Ok(ChainKind::FileMultipartUploadGetDelete)
            }
            other => Err(S3monError::UnknownChain(other.to_string())),
        }
    }
}

/// Where the test files of a pipeline live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageLayout {
    /// Checksum-derived directories below the runner's base directory.
    #[default]
    Directories,
    /// A fresh container (bucket) per iteration, removed by the cleanup step.
    Containers,
}

impl FromStr for StorageLayout {
    type Err = S3monError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "directories" | "dirs" => Ok(StorageLayout::Directories),
            "containers" | "buckets" => Ok(StorageLayout::Containers),
            other => Err(S3monError::InvalidConfig(format!(
                "unknown storage layout '{other}'"
            ))),
        }
    }
}

/// One entry of the pipeline catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Unique name; used as the histogram key and the worker thread prefix.
    pub name: String,
    pub chain: ChainKind,
    pub threads: u16,
    pub min_file_size: u64,
    /// Exclusive upper bound of the generated file size.
    pub max_file_size: u64,
    /// Abandon an iteration that takes longer than this.
    pub iteration_timeout: Option<Duration>,
    pub layout: StorageLayout,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), S3monError> {
        if self.name.trim().is_empty() {
            return Err(S3monError::InvalidConfig(
                "pipeline name must not be empty".to_string(),
            ));
        }
        if self.threads == 0 {
            return Err(S3monError::InvalidConfig(format!(
                "pipeline '{}': threads must be at least 1",
                self.name
            )));
        }
        if self.min_file_size >= self.max_file_size {
            return Err(S3monError::InvalidConfig(format!(
                "pipeline '{}': minFileSize ({}) must be less than maxFileSize ({})",
                self.name, self.min_file_size, self.max_file_size
            )));
        }
        if self.iteration_timeout.is_some_and(|t| t.is_zero()) {
            return Err(S3monError::InvalidConfig(format!(
                "pipeline '{}': iterationTimeout must be positive",
                self.name
            )));
        }
        Ok(())
    }
}
