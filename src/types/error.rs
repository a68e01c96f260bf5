use anyhow::Error;
use thiserror::Error;

/// Ordered key/value pairs attached to a failure for reporting.
///
/// Insertion order is kept so that reports list the keys the way the
/// raising code added them.
pub type ErrorContext = Vec<(String, String)>;

/// Application-level error types for s3mon-rs.
///
/// These represent errors raised by configuration loading, runner lifecycle
/// and argument validation. Failures from storage calls and data checks use
/// the dedicated contextual types below.
///
/// ## Exit Codes
///
/// Each variant maps to an exit code (via `exit_code()`):
/// - 1: General errors (InvalidArgument, InvalidState, Io, Pipeline)
/// - 2: Configuration errors (InvalidConfig, UnknownChain)
#[derive(Error, Debug, PartialEq)]
pub enum S3monError {
    /// Configuration error (non-retryable, fatal at startup).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A pipeline catalog entry names a chain that does not exist.
    #[error("Unknown test chain: {0}")]
    UnknownChain(String),

    /// An argument outside the accepted domain.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation was invoked in a state that does not allow it.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// I/O error on the local filesystem.
    #[error("I/O error: {0}")]
    Io(String),

    /// General pipeline error.
    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

impl S3monError {
    /// Get the appropriate process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            S3monError::InvalidConfig(_) | S3monError::UnknownChain(_) => 2,
            _ => 1,
        }
    }
}

/// Data-integrity failure: generated, uploaded and downloaded content disagree.
///
/// Always non-fatal. Carries the expected and actual values so that a report
/// can be acted upon without reproducing the iteration.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct DataValidationError {
    pub message: String,
    pub context: ErrorContext,
}

impl DataValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: Vec::new(),
        }
    }

    pub fn with_context(mut self, key: &str, value: impl ToString) -> Self {
        self.context.push((key.to_string(), value.to_string()));
        self
    }
}

/// Wraps a failed storage operation together with the object path it targeted.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct OperationError {
    pub message: String,
    pub context: ErrorContext,
    #[source]
    pub source: Error,
}

impl OperationError {
    /// Wrap `source`, reusing its message.
    pub fn wrap(source: Error) -> Self {
        Self {
            message: source.to_string(),
            context: Vec::new(),
            source,
        }
    }

    pub fn with_path(self, path: &str) -> Self {
        self.with_context("path", path)
    }

    pub fn with_context(mut self, key: &str, value: impl ToString) -> Self {
        self.context.push((key.to_string(), value.to_string()));
        self
    }

    pub fn path(&self) -> Option<&str> {
        self.context
            .iter()
            .find(|(key, _)| key == "path")
            .map(|(_, value)| value.as_str())
    }
}

/// Failure of the metrics subsystem.
///
/// The monitor cannot fulfil its contract without metrics, so this class of
/// failure terminates the process.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct MetricsError {
    pub message: String,
    pub context: ErrorContext,
}

impl MetricsError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: Vec::new(),
        }
    }

    pub fn with_context(mut self, key: &str, value: impl ToString) -> Self {
        self.context.push((key.to_string(), value.to_string()));
        self
    }
}

/// Check if an anyhow::Error wraps an invalid-state error.
pub fn is_invalid_state_error(e: &Error) -> bool {
    matches!(
        e.downcast_ref::<S3monError>(),
        Some(S3monError::InvalidState(_))
    )
}

/// Check if an anyhow::Error wraps an invalid-argument error.
pub fn is_invalid_argument_error(e: &Error) -> bool {
    matches!(
        e.downcast_ref::<S3monError>(),
        Some(S3monError::InvalidArgument(_))
    )
}

/// Check if any layer of an anyhow::Error is a data-integrity failure.
pub fn is_data_validation_error(e: &Error) -> bool {
    e.chain()
        .any(|cause| cause.downcast_ref::<DataValidationError>().is_some())
}

/// Extract the exit code from an anyhow::Error, defaulting to 1.
pub fn exit_code_from_error(e: &Error) -> i32 {
    if let Some(err) = e.downcast_ref::<S3monError>() {
        return err.exit_code();
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn exit_code_invalid_config() {
        assert_eq!(S3monError::InvalidConfig("bad".to_string()).exit_code(), 2);
    }

    #[test]
    fn exit_code_unknown_chain() {
        assert_eq!(
            S3monError::UnknownChain("NoSuchChain".to_string()).exit_code(),
            2
        );
    }

    #[test]
    fn exit_code_general_errors() {
        assert_eq!(S3monError::InvalidState("x".to_string()).exit_code(), 1);
        assert_eq!(S3monError::InvalidArgument("x".to_string()).exit_code(), 1);
        assert_eq!(S3monError::Io("x".to_string()).exit_code(), 1);
        assert_eq!(S3monError::Pipeline("x".to_string()).exit_code(), 1);
    }

    #[test]
    fn exit_code_from_generic_error_is_one() {
        assert_eq!(exit_code_from_error(&anyhow!("generic error")), 1);
        assert_eq!(
            exit_code_from_error(&anyhow!(S3monError::InvalidConfig("x".to_string()))),
            2
        );
    }

    #[test]
    fn is_invalid_state_error_test() {
        assert!(is_invalid_state_error(&anyhow!(S3monError::InvalidState(
            "restart".to_string()
        ))));
        assert!(!is_invalid_state_error(&anyhow!(S3monError::Pipeline(
            "test".to_string()
        ))));
        assert!(!is_invalid_state_error(&anyhow!("generic error")));
    }

    #[test]
    fn is_invalid_argument_error_test() {
        assert!(is_invalid_argument_error(&anyhow!(
            S3monError::InvalidArgument("too small".to_string())
        )));
        assert!(!is_invalid_argument_error(&anyhow!("generic error")));
    }

    #[test]
    fn data_validation_error_is_found_below_wrappers() {
        let validation = DataValidationError::new("checksum mismatch")
            .with_context("expectedSha256sum", "aa")
            .with_context("actualSha256sum", "bb");
        let wrapped = anyhow!(OperationError::wrap(anyhow!(validation)).with_path("/a/b.txt"));

        assert!(is_data_validation_error(&wrapped));
        assert!(!is_data_validation_error(&anyhow!("generic error")));
    }

    #[test]
    fn data_validation_error_keeps_context_order() {
        let e = DataValidationError::new("size mismatch")
            .with_context("path", "/a/b.txt")
            .with_context("expectedFileSize", 10)
            .with_context("actualFileSize", 9);

        assert_eq!(e.to_string(), "size mismatch");
        assert_eq!(
            e.context,
            vec![
                ("path".to_string(), "/a/b.txt".to_string()),
                ("expectedFileSize".to_string(), "10".to_string()),
                ("actualFileSize".to_string(), "9".to_string()),
            ]
        );
    }

    #[test]
    fn operation_error_exposes_source_and_path() {
        let e = OperationError::wrap(anyhow!("connection reset")).with_path("/dir/file.txt");

        assert_eq!(e.to_string(), "connection reset");
        assert_eq!(e.path(), Some("/dir/file.txt"));
        let source = std::error::Error::source(&e).unwrap();
        assert_eq!(source.to_string(), "connection reset");
    }

    #[test]
    fn metrics_error_display() {
        let e = MetricsError::new("collector already registered")
            .with_context("collector", "s3mon_chain_elapsed_milliseconds");
        assert_eq!(e.to_string(), "collector already registered");
        assert_eq!(e.context.len(), 1);
    }
}
