//! Pipeline catalog loading.
//!
//! The catalog is a JSON document listing the pipelines to run:
//!
//! ```json
//! {
//!   "testRunners": [
//!     {
//!       "name": "upload-small",
//!       "chain": "FileUploadGetDeleteChain",
//!       "threads": 4,
//!       "minFileSize": "1KiB",
//!       "maxFileSize": 1048576,
//!       "iterationTimeout": 120,
//!       "testType": "buckets"
//!     }
//!   ]
//! }
//! ```
//!
//! Sizes are byte counts or human-readable strings. `iterationTimeout` is in
//! seconds and optional. `testType` (or `layout`) selects the storage layout
//! and defaults to directories.
//!
//! The catalog is read from a local file, from an object in the monitored
//! store (`s3://bucket/key`, `memory:///path`) or from an http(s) URL.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::config::args::value_parser::human_bytes::parse_human_bytes;
use crate::config::{ChainKind, Config, PipelineConfig, StorageLayout};
use crate::storage::Storage;
use crate::types::StoragePath;
use crate::types::error::S3monError;

pub(crate) const ERROR_MESSAGE_EMPTY_CATALOG: &str = "Pipeline catalog must define at least one test runner.";

/// Where the pipeline catalog is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogLocation {
    File(PathBuf),
    /// Object in the monitored store, as a store path.
    Store(String),
    Http(String),
}

impl CatalogLocation {
    /// Classify a catalog argument: URLs by scheme, everything else is a
    /// local path.
    pub fn parse(location: &str) -> Result<Self, String> {
        let Some((scheme, _)) = location.split_once("://") else {
            return Ok(CatalogLocation::File(PathBuf::from(location)));
        };

        let url = url::Url::parse(location)
            .map_err(|e| format!("invalid catalog URL {location}: {e}"))?;
        match scheme.to_ascii_lowercase().as_str() {
            "file" => url
                .to_file_path()
                .map(CatalogLocation::File)
                .map_err(|_| format!("invalid catalog file URL: {location}")),
            "http" | "https" => Ok(CatalogLocation::Http(location.to_string())),
            "s3" => {
                let bucket = url.host_str().unwrap_or_default();
                let key = url.path().trim_start_matches('/');
                if bucket.is_empty() || key.is_empty() {
                    return Err(format!("catalog URL must name a bucket and a key: {location}"));
                }
                Ok(CatalogLocation::Store(format!("s3://{bucket}/{key}")))
            }
            "memory" => {
                if url.path().trim_start_matches('/').is_empty() {
                    return Err(format!("catalog URL must name an object: {location}"));
                }
                Ok(CatalogLocation::Store(url.path().to_string()))
            }
            other => Err(format!("unsupported catalog URL scheme '{other}': {location}")),
        }
    }

    /// Whether the catalog can be read from a store of type `target`.
    pub fn is_readable_from(&self, target: &StoragePath) -> bool {
        match (self, target) {
            (CatalogLocation::Store(path), StoragePath::S3 { .. }) => path.starts_with("s3://"),
            (CatalogLocation::Store(path), StoragePath::Memory) => !path.starts_with("s3://"),
            _ => true,
        }
    }

    /// Read the catalog and parse it.
    pub async fn load(&self, storage: &Storage) -> Result<Vec<PipelineConfig>> {
        let json = self.fetch(storage).await.map_err(|e| {
            anyhow!(S3monError::InvalidConfig(format!(
                "failed to load pipeline catalog from {self}: {e:#}"
            )))
        })?;
        parse_catalog(&json)
    }

    async fn fetch(&self, storage: &Storage) -> Result<String> {
        match self {
            CatalogLocation::File(path) => Ok(tokio::fs::read_to_string(path).await?),
            CatalogLocation::Store(path) => {
                let mut object = storage.get_object(path).await?;
                let mut json = String::new();
                object.body.read_to_string(&mut json).await?;
                Ok(json)
            }
            CatalogLocation::Http(url) => Ok(reqwest::get(url)
                .await?
                .error_for_status()?
                .text()
                .await?),
        }
    }
}

impl fmt::Display for CatalogLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogLocation::File(path) => write!(f, "{}", path.display()),
            CatalogLocation::Store(path) => f.write_str(path),
            CatalogLocation::Http(url) => f.write_str(url),
        }
    }
}

impl Config {
    /// Load the pipelines from the catalog location if they are not known yet.
    ///
    /// Catalogs kept in the monitored store can only be read once the store
    /// has been created.
    pub async fn load_pipelines(&mut self, storage: &Storage) -> Result<()> {
        if self.pipelines.is_empty() {
            if let Some(location) = &self.catalog {
                self.pipelines = location.load(storage).await?;
                info!(
                    catalog = %location,
                    pipelines = self.pipelines.len(),
                    "pipeline catalog loaded."
                );
            }
        }
        if self.pipelines.is_empty() {
            return Err(anyhow!(S3monError::InvalidConfig(
                ERROR_MESSAGE_EMPTY_CATALOG.to_string()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogDocument {
    test_runners: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogEntry {
    name: String,
    #[serde(alias = "testChainClassName")]
    chain: String,
    threads: u16,
    min_file_size: SizeValue,
    max_file_size: SizeValue,
    #[serde(default)]
    iteration_timeout: Option<u64>,
    #[serde(default, alias = "testType")]
    layout: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SizeValue {
    Bytes(u64),
    Human(String),
}

impl SizeValue {
    fn to_bytes(&self, field: &str, runner: &str) -> Result<u64, S3monError> {
        match self {
            SizeValue::Bytes(value) => Ok(*value),
            SizeValue::Human(value) => parse_human_bytes(value).map_err(|e| {
                S3monError::InvalidConfig(format!("pipeline '{runner}': invalid {field}: {e}"))
            }),
        }
    }
}

/// Read and validate the catalog at `path`.
pub fn load_catalog(path: &Path) -> Result<Vec<PipelineConfig>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read pipeline catalog {}", path.display()))?;
    parse_catalog(&json)
}

/// Parse and validate a catalog document.
///
/// Fails on unknown chains, duplicate names, zero threads and inverted size
/// bounds.
pub fn parse_catalog(json: &str) -> Result<Vec<PipelineConfig>> {
    let document: CatalogDocument = serde_json::from_str(json)
        .map_err(|e| anyhow!(S3monError::InvalidConfig(format!("malformed catalog: {e}"))))?;

    let mut names = HashSet::new();
    let mut pipelines = Vec::with_capacity(document.test_runners.len());

    for entry in document.test_runners {
        if !names.insert(entry.name.clone()) {
            return Err(anyhow!(S3monError::InvalidConfig(format!(
                "duplicate pipeline name '{}'",
                entry.name
            ))));
        }

        let layout = match &entry.layout {
            Some(layout) => StorageLayout::from_str(layout).map_err(|_| {
                S3monError::InvalidConfig(format!(
                    "pipeline '{}': unknown storage layout '{layout}'",
                    entry.name
                ))
            })?,
            None => StorageLayout::default(),
        };
        let pipeline = PipelineConfig {
            chain: chain_from_identifier(&entry.chain)?,
            layout,
            threads: entry.threads,
            min_file_size: entry.min_file_size.to_bytes("minFileSize", &entry.name)?,
            max_file_size: entry.max_file_size.to_bytes("maxFileSize", &entry.name)?,
            iteration_timeout: entry.iteration_timeout.map(Duration::from_secs),
            name: entry.name,
        };
        pipeline.validate()?;

        debug!(
            pipeline = pipeline.name,
            chain = %pipeline.chain,
            threads = pipeline.threads,
            "pipeline loaded from catalog."
        );
        pipelines.push(pipeline);
    }

    Ok(pipelines)
}

/// Accepts plain identifiers as well as package-qualified ones
/// (`com.example.chains.FileUploadGetDeleteChain`).
fn chain_from_identifier(identifier: &str) -> Result<ChainKind, S3monError> {
    let short = identifier.rsplit('.').next().unwrap_or(identifier);
    ChainKind::from_str(short).map_err(|_| S3monError::UnknownChain(identifier.to_string()))
}
