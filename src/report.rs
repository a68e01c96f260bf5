//! Failure classification and reporting.
//!
//! [`FailureProcessor`] turns a failed iteration into a [`ProcessedFailure`]:
//! the context of every layer of the cause chain merged into one map, the
//! request the failure was about, and a set of tags derived from timeouts
//! and HTTP status codes. [`FailureReporter`] hands it to a [`ReportSink`],
//! or to the fatal handler when the metrics subsystem failed.

use std::collections::{BTreeMap, BTreeSet};
use std::error::Error as StdError;
use std::sync::Arc;

use anyhow::Result;
use tracing::{error, warn};
use url::Url;

use crate::config::ReportConfig;
use crate::storage::StorageError;
use crate::types::error::{DataValidationError, ErrorContext, MetricsError, OperationError};
use crate::types::join_path;

pub const TAG_SOCKET_TIMEOUT: &str = "socket-timeout";

/// Tag for well-known server-side status codes.
pub fn status_tag(status: u16) -> Option<&'static str> {
    match status {
        500 => Some("internal-server-error"),
        502 => Some("bad-gateway"),
        503 => Some("service-unavailable"),
        504 => Some("gateway-timeout"),
        507 => Some("insufficient-storage"),
        _ => None,
    }
}

/// The request a failure is attributed to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestDescriptor {
    pub url: Option<String>,
    pub server_name: Option<String>,
    pub server_port: Option<u16>,
    pub request_method: Option<String>,
    pub context: BTreeMap<String, String>,
}

/// A failure ready to be reported.
#[derive(Debug)]
pub struct ProcessedFailure<'a> {
    pub error: &'a anyhow::Error,
    pub root_cause: &'a (dyn StdError + 'static),
    pub context: BTreeMap<String, String>,
    pub path: Option<String>,
    pub request: RequestDescriptor,
    pub message: String,
    pub tags: BTreeSet<String>,
    /// The metrics subsystem failed; monitoring cannot continue.
    pub fatal: bool,
}

#[derive(Debug, Clone)]
pub struct FailureProcessor {
    base_url: String,
    base_tags: Vec<String>,
    base_context: Vec<(String, String)>,
}

impl FailureProcessor {
    pub fn new(base_url: impl Into<String>, report_config: &ReportConfig) -> Self {
        Self {
            base_url: base_url.into(),
            base_tags: report_config.base_tags.clone(),
            base_context: report_config.base_context.clone(),
        }
    }

    pub fn process<'a>(&self, error: &'a anyhow::Error) -> ProcessedFailure<'a> {
        let mut context = aggregate_context(error);
        context
            .entry("actualMessage".to_string())
            .or_insert_with(|| error.to_string());

        let request_url = context.get("requestURL").cloned();
        let explicit_path = context.get("path").cloned();
        let path = explicit_path
            .clone()
            .or_else(|| request_url.as_deref().and_then(path_from_url));

        let root_cause = error.root_cause();
        let fatal = error
            .chain()
            .any(|cause| cause.downcast_ref::<MetricsError>().is_some());

        let mut tags: BTreeSet<String> = self.base_tags.iter().cloned().collect();
        let message = if is_timeout(root_cause) {
            tags.insert(TAG_SOCKET_TIMEOUT.to_string());
            root_cause.to_string()
        } else {
            for cause in error.chain() {
                if let Some(StorageError::Http { status, .. }) = cause.downcast_ref::<StorageError>() {
                    if let Some(tag) = status_tag(*status) {
                        tags.insert(tag.to_string());
                    }
                }
            }
            top_level_message(error)
        };

        let request =
            self.build_request(explicit_path.as_deref(), request_url.as_deref(), &context);

        ProcessedFailure {
            error,
            root_cause,
            context,
            path,
            request,
            message,
            tags,
            fatal,
        }
    }

    fn build_request(
        &self,
        explicit_path: Option<&str>,
        request_url: Option<&str>,
        failure_context: &BTreeMap<String, String>,
    ) -> RequestDescriptor {
        let url = match (explicit_path, request_url) {
            (Some(path), _) => self.url_for_path(path),
            (None, Some(request_url)) => Url::parse(request_url).ok(),
            (None, None) => None,
        };

        let mut context: BTreeMap<String, String> = self.base_context.iter().cloned().collect();
        context.extend(
            failure_context
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );

        RequestDescriptor {
            server_name: url.as_ref().and_then(|u| u.host_str().map(str::to_string)),
            server_port: url.as_ref().and_then(Url::port_or_known_default),
            url: url.map(String::from),
            request_method: failure_context.get("requestMethod").cloned(),
            context,
        }
    }

    /// Store base URL with `path` appended to its own path. Paths that
    /// already are URLs (objects in other containers) are used as is.
    fn url_for_path(&self, path: &str) -> Option<Url> {
        if path.contains("://") {
            return Url::parse(path).ok();
        }
        let mut url = Url::parse(&self.base_url).ok()?;
        let joined = join_path(&["/", url.path(), path]);
        url.set_path(&joined);
        Some(url)
    }
}

/// Context of every layer, outermost first, inner layers overriding.
fn aggregate_context(error: &anyhow::Error) -> BTreeMap<String, String> {
    let mut context = BTreeMap::new();
    for cause in error.chain() {
        for (key, value) in layer_context(cause) {
            context.insert(key, value);
        }
    }
    context
}

fn layer_context(cause: &(dyn StdError + 'static)) -> ErrorContext {
    if let Some(e) = cause.downcast_ref::<OperationError>() {
        return e.context.clone();
    }
    if let Some(e) = cause.downcast_ref::<DataValidationError>() {
        return e.context.clone();
    }
    if let Some(e) = cause.downcast_ref::<MetricsError>() {
        return e.context.clone();
    }

    match cause.downcast_ref::<StorageError>() {
        Some(StorageError::Http {
            method,
            url,
            status,
            code,
            request_id,
            ..
        }) => {
            let mut context = vec![
                ("requestURL".to_string(), url.clone()),
                ("requestMethod".to_string(), method.clone()),
                ("statusCode".to_string(), status.to_string()),
            ];
            if let Some(code) = code {
                context.push(("serverCode".to_string(), code.clone()));
            }
            if let Some(request_id) = request_id {
                context.push(("requestId".to_string(), request_id.clone()));
            }
            context
        }
        Some(StorageError::NotFound { path })
        | Some(StorageError::DirectoryNotEmpty { path })
        | Some(StorageError::AlreadyExists { path }) => {
            vec![("path".to_string(), path.clone())]
        }
        _ => Vec::new(),
    }
}

fn path_from_url(request_url: &str) -> Option<String> {
    match Url::parse(request_url) {
        Ok(url) if !url.path().is_empty() && url.path() != "/" => Some(url.path().to_string()),
        Ok(_) => None,
        Err(e) => {
            warn!(request_url, error = e.to_string(), "failed to parse request URL.");
            None
        }
    }
}

fn is_timeout(cause: &(dyn StdError + 'static)) -> bool {
    if let Some(e) = cause.downcast_ref::<StorageError>() {
        return e.is_timeout();
    }
    if let Some(e) = cause.downcast_ref::<std::io::Error>() {
        return e.kind() == std::io::ErrorKind::TimedOut;
    }
    cause.downcast_ref::<tokio::time::error::Elapsed>().is_some()
}

/// Message of the outermost layer, looking through a bare operation wrapper.
fn top_level_message(error: &anyhow::Error) -> String {
    match error.downcast_ref::<OperationError>() {
        Some(operation) => operation
            .source()
            .map_or_else(|| operation.to_string(), |source| source.to_string()),
        None => error.to_string(),
    }
}

/// Receives processed failures. Submission is best effort.
pub trait ReportSink: Send + Sync {
    fn submit(&self, failure: &ProcessedFailure<'_>) -> Result<()>;
}

/// Emits every report as a structured `tracing` event.
#[derive(Debug, Default, Clone)]
pub struct TracingReportSink;

impl ReportSink for TracingReportSink {
    fn submit(&self, failure: &ProcessedFailure<'_>) -> Result<()> {
        let tags = failure.tags.iter().cloned().collect::<Vec<_>>().join(",");
        let context = serde_json::to_string(&failure.request.context)?;

        error!(
            failure = failure.message,
            path = failure.path.as_deref(),
            url = failure.request.url.as_deref(),
            request_method = failure.request.request_method.as_deref(),
            root_cause = failure.root_cause.to_string(),
            tags,
            context,
            "pipeline failure."
        );
        Ok(())
    }
}

/// Invoked instead of the sink for fatal failures.
pub type FatalHandler = Arc<dyn Fn(&ProcessedFailure<'_>) + Send + Sync>;

/// Terminates the process with exit code 1.
pub fn default_fatal_handler() -> FatalHandler {
    Arc::new(|_failure: &ProcessedFailure<'_>| std::process::exit(1))
}

/// Classifies failures and routes them to the sink or the fatal handler.
#[derive(Clone)]
pub struct FailureReporter {
    processor: FailureProcessor,
    sink: Arc<dyn ReportSink>,
    fatal_handler: FatalHandler,
}

impl FailureReporter {
    pub fn new(processor: FailureProcessor, sink: Arc<dyn ReportSink>) -> Self {
        Self {
            processor,
            sink,
            fatal_handler: default_fatal_handler(),
        }
    }

    pub fn with_fatal_handler(mut self, fatal_handler: FatalHandler) -> Self {
        self.fatal_handler = fatal_handler;
        self
    }

    pub fn processor(&self) -> &FailureProcessor {
        &self.processor
    }

    pub fn report(&self, failure: &anyhow::Error) {
        let processed = self.processor.process(failure);

        if processed.fatal {
            error!(
                failure = processed.message,
                context = format!("{:?}", processed.context),
                "metrics subsystem failure. monitoring cannot continue."
            );
            (self.fatal_handler)(&processed);
            return;
        }

        if let Err(e) = self.sink.submit(&processed) {
            warn!(
                failure = processed.message,
                error = format!("{e:#}"),
                "failed to submit failure report."
            );
        }
    }
}
