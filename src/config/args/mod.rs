use crate::config::catalog::{CatalogLocation, ERROR_MESSAGE_EMPTY_CATALOG, load_catalog};
use crate::config::{
    CLITimeoutConfig, ClientConfig, Config, RetryConfig, ReportConfig, TracingConfig,
};
use crate::types::{AccessKeys, ClientConfigLocation, S3Credentials, StoragePath};
use clap::Parser;
use clap::builder::NonEmptyStringValueParser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::ffi::OsString;
use std::path::PathBuf;

pub mod value_parser;

#[cfg(test)]
mod tests;

use value_parser::{catalog_location, human_bytes, target, url};

// ---------------------------------------------------------------------------
// Default constants
// ---------------------------------------------------------------------------

const DEFAULT_AWS_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_INITIAL_BACKOFF_MILLISECONDS: u64 = 100;
const DEFAULT_JSON_TRACING: bool = false;
const DEFAULT_AWS_SDK_TRACING: bool = false;
const DEFAULT_SPAN_EVENTS_TRACING: bool = false;
const DEFAULT_DISABLE_COLOR_TRACING: bool = false;
const DEFAULT_FORCE_PATH_STYLE: bool = false;
const DEFAULT_PURGE_ON_SHUTDOWN: bool = false;
const DEFAULT_MEMORY_MIN_PART_SIZE: &str = "5MiB";

// ---------------------------------------------------------------------------
// Error messages
// ---------------------------------------------------------------------------

const ERROR_MESSAGE_CATALOG_NOT_IN_TARGET: &str =
    "A catalog kept in a store can only be read from the monitored store.";
const ERROR_MESSAGE_INVALID_REPORT_CONTEXT: &str =
    "Report context entries must have the form key=value.";
const ERROR_MESSAGE_MEMORY_MIN_PART_SIZE_ZERO: &str = "Memory minimum part size must be at least 1.";

// ---------------------------------------------------------------------------
// CLIArgs (clap-derived argument struct)
// ---------------------------------------------------------------------------

/// s3mon - Synthetic workload monitor for object storage.
///
/// Continuously runs upload/verify/download/delete pipelines against a store,
/// verifies data integrity end to end and reports every failure.
///
/// Example:
///   s3mon catalog.json --target s3://my-bucket/monitor/ -v
///   s3mon catalog.json --target memory:// --report-tag staging
///   s3mon s3://my-bucket/s3mon/catalog.json --target s3://my-bucket/monitor/
#[derive(Parser, Clone, Debug)]
#[command(name = "s3mon", version, about, long_about = None)]
pub struct CLIArgs {
    /// Pipeline catalog (JSON): a local path, s3://<BUCKET_NAME>/<KEY>, memory:///<PATH> or an http(s) URL.
    #[arg(env = "S3MON_CATALOG", value_parser = catalog_location::check_catalog_location)]
    pub catalog: String,

    /// Store to monitor: s3://<BUCKET_NAME>[/prefix] or memory://
    #[arg(long, env, value_parser = target::check_target)]
    pub target: String,

    // -----------------------------------------------------------------------
    // Reporting options
    // -----------------------------------------------------------------------
    /// Tag added to every failure report. May be repeated.
    #[arg(long = "report-tag", env = "REPORT_TAGS", value_delimiter = ',',
        value_parser = NonEmptyStringValueParser::new(), help_heading = "Reporting")]
    pub report_tags: Vec<String>,

    /// key=value pair added to the context of every failure report. May be repeated.
    #[arg(long = "report-context", env = "REPORT_CONTEXT", value_delimiter = ',',
        value_parser = NonEmptyStringValueParser::new(), help_heading = "Reporting")]
    pub report_context: Vec<String>,

    // -----------------------------------------------------------------------
    // Lifecycle options
    // -----------------------------------------------------------------------
    /// Recursively delete each runner's data directory on shutdown.
    #[arg(long, env, default_value_t = DEFAULT_PURGE_ON_SHUTDOWN, help_heading = "Lifecycle")]
    pub purge_on_shutdown: bool,

    #[arg(
        long,
        env,
        default_value = DEFAULT_MEMORY_MIN_PART_SIZE,
        value_parser = human_bytes::check_human_bytes,
        help_heading = "Lifecycle",
        long_help = r#"Minimum multipart part size of the memory:// store.
Allow suffixes: KB, KiB, MB, MiB, GB, GiB"#
    )]
    pub memory_min_part_size: String,

    // -----------------------------------------------------------------------
    // Logging options
    // -----------------------------------------------------------------------
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    #[arg(long, env, default_value_t = DEFAULT_JSON_TRACING, help_heading = "Logging")]
    pub json_tracing: bool,

    #[arg(long, env, default_value_t = DEFAULT_AWS_SDK_TRACING, help_heading = "Logging")]
    pub aws_sdk_tracing: bool,

    #[arg(long, env, default_value_t = DEFAULT_SPAN_EVENTS_TRACING, help_heading = "Logging")]
    pub span_events_tracing: bool,

    #[arg(long, env, default_value_t = DEFAULT_DISABLE_COLOR_TRACING, help_heading = "Logging")]
    pub disable_color_tracing: bool,

    // -----------------------------------------------------------------------
    // Retry options
    // -----------------------------------------------------------------------
    #[arg(long, env, default_value_t = DEFAULT_AWS_MAX_ATTEMPTS, help_heading = "Retry")]
    pub aws_max_attempts: u32,

    #[arg(long, env, default_value_t = DEFAULT_INITIAL_BACKOFF_MILLISECONDS, help_heading = "Retry")]
    pub initial_backoff_milliseconds: u64,

    // -----------------------------------------------------------------------
    // Timeout options
    // -----------------------------------------------------------------------
    #[arg(long, env, help_heading = "Timeout")]
    pub operation_timeout_milliseconds: Option<u64>,

    #[arg(long, env, help_heading = "Timeout")]
    pub operation_attempt_timeout_milliseconds: Option<u64>,

    #[arg(long, env, help_heading = "Timeout")]
    pub connect_timeout_milliseconds: Option<u64>,

    #[arg(long, env, help_heading = "Timeout")]
    pub read_timeout_milliseconds: Option<u64>,

    // -----------------------------------------------------------------------
    // AWS configuration
    // -----------------------------------------------------------------------
    #[arg(long, env, help_heading = "AWS")]
    pub aws_config_file: Option<PathBuf>,

    #[arg(long, env, help_heading = "AWS")]
    pub aws_shared_credentials_file: Option<PathBuf>,

    #[arg(long, env, conflicts_with_all = ["target_access_key"],
        value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub target_profile: Option<String>,

    #[arg(long, env, requires = "target_secret_key",
        value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub target_access_key: Option<String>,

    #[arg(long, env, requires = "target_access_key",
        value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub target_secret_key: Option<String>,

    #[arg(long, env, requires = "target_access_key",
        value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub target_session_token: Option<String>,

    #[arg(long, env, value_parser = NonEmptyStringValueParser::new(), help_heading = "AWS")]
    pub target_region: Option<String>,

    #[arg(long, env, value_parser = url::check_scheme, help_heading = "AWS")]
    pub target_endpoint_url: Option<String>,

    #[arg(long, env, default_value_t = DEFAULT_FORCE_PATH_STYLE, help_heading = "AWS")]
    pub target_force_path_style: bool,
}

// ---------------------------------------------------------------------------
// parse_from_args (public API)
// ---------------------------------------------------------------------------

pub fn parse_from_args<I, T>(args: I) -> Result<CLIArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    CLIArgs::try_parse_from(args)
}

pub fn build_config_from_args<I, T>(args: I) -> Result<Config, String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli_args = CLIArgs::try_parse_from(args).map_err(|e| e.to_string())?;
    Config::try_from(cli_args)
}

// ---------------------------------------------------------------------------
// Validation and Config conversion
// ---------------------------------------------------------------------------

impl CLIArgs {
    fn build_client_config(&self) -> ClientConfig {
        let credential = if let Some(ref profile) = self.target_profile {
            S3Credentials::Profile(profile.clone())
        } else if let Some(ref access_key) = self.target_access_key {
            let secret_key = self.target_secret_key.clone().unwrap_or_default();
            S3Credentials::Credentials {
                access_keys: AccessKeys {
                    access_key: access_key.clone(),
                    secret_access_key: secret_key,
                    session_token: self.target_session_token.clone(),
                },
            }
        } else {
            S3Credentials::FromEnvironment
        };

        ClientConfig {
            client_config_location: ClientConfigLocation {
                aws_config_file: self.aws_config_file.clone(),
                aws_shared_credentials_file: self.aws_shared_credentials_file.clone(),
            },
            credential,
            region: self.target_region.clone(),
            endpoint_url: self.target_endpoint_url.clone(),
            force_path_style: self.target_force_path_style,
            retry_config: RetryConfig {
                aws_max_attempts: self.aws_max_attempts,
                initial_backoff_milliseconds: self.initial_backoff_milliseconds,
            },
            cli_timeout_config: CLITimeoutConfig {
                operation_timeout_milliseconds: self.operation_timeout_milliseconds,
                operation_attempt_timeout_milliseconds: self.operation_attempt_timeout_milliseconds,
                connect_timeout_milliseconds: self.connect_timeout_milliseconds,
                read_timeout_milliseconds: self.read_timeout_milliseconds,
            },
        }
    }

    fn build_tracing_config(&self) -> Option<TracingConfig> {
        let log_level = self.verbosity.log_level()?;

        Some(TracingConfig {
            tracing_level: log_level,
            json_tracing: self.json_tracing,
            aws_sdk_tracing: self.aws_sdk_tracing,
            span_events_tracing: self.span_events_tracing,
            disable_color_tracing: self.disable_color_tracing,
        })
    }

    fn build_report_config(&self) -> Result<ReportConfig, String> {
        let base_context = self
            .report_context
            .iter()
            .map(|entry| match entry.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    Ok((key.trim().to_string(), value.trim().to_string()))
                }
                _ => Err(format!("{ERROR_MESSAGE_INVALID_REPORT_CONTEXT} ({entry})")),
            })
            .collect::<Result<Vec<_>, String>>()?;

        Ok(ReportConfig {
            base_tags: self.report_tags.clone(),
            base_context,
        })
    }
}

impl TryFrom<CLIArgs> for Config {
    type Error = String;

    fn try_from(args: CLIArgs) -> Result<Self, Self::Error> {
        let target = target::parse_target(&args.target)?;
        let target_client_config = match target {
            StoragePath::S3 { .. } => Some(args.build_client_config()),
            StoragePath::Memory => None,
        };
        let tracing_config = args.build_tracing_config();
        let report_config = args.build_report_config()?;

        let memory_min_part_size = human_bytes::parse_human_bytes(&args.memory_min_part_size)?;
        if memory_min_part_size == 0 {
            return Err(ERROR_MESSAGE_MEMORY_MIN_PART_SIZE_ZERO.to_string());
        }

        let catalog = CatalogLocation::parse(&args.catalog)?;
        if !catalog.is_readable_from(&target) {
            return Err(format!("{ERROR_MESSAGE_CATALOG_NOT_IN_TARGET} ({catalog})"));
        }
        let pipelines = match &catalog {
            CatalogLocation::File(path) => {
                let pipelines = load_catalog(path).map_err(|e| format!("{e:#}"))?;
                if pipelines.is_empty() {
                    return Err(ERROR_MESSAGE_EMPTY_CATALOG.to_string());
                }
                pipelines
            }
            CatalogLocation::Store(_) | CatalogLocation::Http(_) => Vec::new(),
        };

        Ok(Config {
            target,
            target_client_config,
            tracing_config,
            pipelines,
            catalog: Some(catalog),
            report_config,
            purge_on_shutdown: args.purge_on_shutdown,
            memory_min_part_size,
        })
    }
}
