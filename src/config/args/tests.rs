use super::*;
use crate::config::{ChainKind, Config};
use proptest::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn init_dummy_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dummy=trace")
        .try_init();
}

const CATALOG: &str = r#"{
    "testRunners": [
        {
            "name": "upload",
            "chain": "FileUploadGetDeleteChain",
            "threads": 2,
            "minFileSize": "1KiB",
            "maxFileSize": "4KiB"
        }
    ]
}"#;

fn catalog_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn args_with(catalog: &NamedTempFile, extra: &[&str]) -> Vec<String> {
    let mut args = vec![
        "s3mon".to_string(),
        catalog.path().to_string_lossy().to_string(),
    ];
    args.extend(extra.iter().map(|s| s.to_string()));
    args
}

// ---------------------------------------------------------------------------
// Basic parsing tests
// ---------------------------------------------------------------------------

#[test]
fn parse_minimal_args() {
    init_dummy_tracing_subscriber();

    let catalog = catalog_file(CATALOG);
    let cli = parse_from_args(args_with(&catalog, &["--target", "s3://my-bucket/monitor/"])).unwrap();
    assert_eq!(cli.target, "s3://my-bucket/monitor/");
    assert!(!cli.purge_on_shutdown);
    assert!(cli.report_tags.is_empty());
    assert_eq!(cli.memory_min_part_size, "5MiB");
}

#[test]
fn parse_report_tags_repeated_and_delimited() {
    let catalog = catalog_file(CATALOG);
    let cli = parse_from_args(args_with(
        &catalog,
        &[
            "--target",
            "memory://",
            "--report-tag",
            "staging",
            "--report-tag",
            "us-east,canary",
        ],
    ))
    .unwrap();
    assert_eq!(cli.report_tags, vec!["staging", "us-east", "canary"]);
}

#[test]
fn parse_aws_config_options() {
    let catalog = catalog_file(CATALOG);
    let cli = parse_from_args(args_with(
        &catalog,
        &[
            "--target",
            "s3://bucket/",
            "--target-region",
            "eu-west-1",
            "--target-endpoint-url",
            "http://localhost:9000",
            "--target-force-path-style",
        ],
    ))
    .unwrap();
    assert_eq!(cli.target_region.as_deref(), Some("eu-west-1"));
    assert_eq!(cli.target_endpoint_url.as_deref(), Some("http://localhost:9000"));
    assert!(cli.target_force_path_style);
}

#[test]
fn parse_retry_and_timeout_options() {
    let catalog = catalog_file(CATALOG);
    let cli = parse_from_args(args_with(
        &catalog,
        &[
            "--target",
            "s3://bucket/",
            "--aws-max-attempts",
            "7",
            "--initial-backoff-milliseconds",
            "250",
            "--read-timeout-milliseconds",
            "5000",
        ],
    ))
    .unwrap();
    assert_eq!(cli.aws_max_attempts, 7);
    assert_eq!(cli.initial_backoff_milliseconds, 250);
    assert_eq!(cli.read_timeout_milliseconds, Some(5000));
    assert_eq!(cli.connect_timeout_milliseconds, None);
}

#[test]
fn parse_invalid_target() {
    let catalog = catalog_file(CATALOG);
    assert!(parse_from_args(args_with(&catalog, &["--target", "bucket/prefix"])).is_err());
}

#[test]
fn parse_invalid_endpoint_scheme() {
    let catalog = catalog_file(CATALOG);
    assert!(
        parse_from_args(args_with(
            &catalog,
            &["--target", "s3://bucket/", "--target-endpoint-url", "ftp://host"],
        ))
        .is_err()
    );
}

#[test]
fn parse_missing_catalog_file() {
    let args = vec!["s3mon", "/nonexistent/catalog.json", "--target", "memory://"];
    assert!(parse_from_args(args).is_err());
}

#[test]
fn parse_secret_key_requires_access_key() {
    let catalog = catalog_file(CATALOG);
    assert!(
        parse_from_args(args_with(
            &catalog,
            &["--target", "s3://bucket/", "--target-secret-key", "secret"],
        ))
        .is_err()
    );
}

// ---------------------------------------------------------------------------
// Config::try_from tests
// ---------------------------------------------------------------------------

#[test]
fn config_from_minimal_args() {
    init_dummy_tracing_subscriber();

    let catalog = catalog_file(CATALOG);
    let cli = parse_from_args(args_with(&catalog, &["--target", "s3://my-bucket/monitor/"])).unwrap();
    let config = Config::try_from(cli).unwrap();

    let StoragePath::S3 { bucket, prefix } = &config.target else {
        panic!("expected an S3 target");
    };
    assert_eq!(bucket, "my-bucket");
    assert_eq!(prefix, "monitor/");
    assert_eq!(config.pipelines.len(), 1);
    assert_eq!(config.pipelines[0].chain, ChainKind::FileUploadGetDelete);
    assert_eq!(config.pipelines[0].min_file_size, 1024);
    assert_eq!(config.memory_min_part_size, 5 * 1024 * 1024);
    assert!(config.target_client_config.is_some());
}

#[test]
fn config_memory_target_has_no_client_config() {
    let catalog = catalog_file(CATALOG);
    let cli = parse_from_args(args_with(
        &catalog,
        &["--target", "memory://", "--memory-min-part-size", "1KiB"],
    ))
    .unwrap();
    let config = Config::try_from(cli).unwrap();

    assert_eq!(config.target, StoragePath::Memory);
    assert!(config.target_client_config.is_none());
    assert_eq!(config.memory_min_part_size, 1024);
}

#[test]
fn config_report_settings() {
    let catalog = catalog_file(CATALOG);
    let cli = parse_from_args(args_with(
        &catalog,
        &[
            "--target",
            "memory://",
            "--report-tag",
            "canary",
            "--report-context",
            "datacenter=us-east-1a",
            "--purge-on-shutdown",
        ],
    ))
    .unwrap();
    let config = Config::try_from(cli).unwrap();

    assert_eq!(config.report_config.base_tags, vec!["canary"]);
    assert_eq!(
        config.report_config.base_context,
        vec![("datacenter".to_string(), "us-east-1a".to_string())]
    );
    assert!(config.purge_on_shutdown);
}

#[test]
fn config_rejects_malformed_report_context() {
    let catalog = catalog_file(CATALOG);
    let cli = parse_from_args(args_with(
        &catalog,
        &["--target", "memory://", "--report-context", "no-separator"],
    ))
    .unwrap();
    let result = Config::try_from(cli);
    assert!(result.unwrap_err().contains("key=value"));
}

#[test]
fn config_rejects_zero_memory_part_size() {
    let catalog = catalog_file(CATALOG);
    let cli = parse_from_args(args_with(
        &catalog,
        &["--target", "memory://", "--memory-min-part-size", "0"],
    ))
    .unwrap();
    assert!(Config::try_from(cli).is_err());
}

#[test]
fn config_rejects_invalid_catalog() {
    let catalog = catalog_file(
        r#"{"testRunners": [{"name": "x", "chain": "NoSuchChain",
            "threads": 1, "minFileSize": 1, "maxFileSize": 2}]}"#,
    );
    let cli = parse_from_args(args_with(&catalog, &["--target", "memory://"])).unwrap();
    let result = Config::try_from(cli);
    assert!(result.unwrap_err().contains("Unknown test chain"));
}

#[test]
fn config_rejects_empty_catalog() {
    let catalog = catalog_file(r#"{"testRunners": []}"#);
    let cli = parse_from_args(args_with(&catalog, &["--target", "memory://"])).unwrap();
    let result = Config::try_from(cli);
    assert!(result.unwrap_err().contains("at least one test runner"));
}

#[test]
fn config_tracing_config_none_when_silent() {
    let catalog = catalog_file(CATALOG);
    let cli = parse_from_args(args_with(&catalog, &["--target", "memory://", "-qq"])).unwrap();
    let config = Config::try_from(cli).unwrap();
    assert!(config.tracing_config.is_none());
}

#[test]
fn config_tracing_config_info_with_verbose() {
    // WarnLevel default: no flag → Warn, -v → Info, -vv → Debug, -vvv → Trace
    let catalog = catalog_file(CATALOG);
    let cli = parse_from_args(args_with(&catalog, &["--target", "memory://", "-v"])).unwrap();
    let config = Config::try_from(cli).unwrap();
    assert_eq!(
        config.tracing_config.unwrap().tracing_level,
        log::Level::Info
    );
}

#[test]
fn config_target_client_config_from_profile() {
    let catalog = catalog_file(CATALOG);
    let cli = parse_from_args(args_with(
        &catalog,
        &["--target", "s3://bucket/", "--target-profile", "monitor"],
    ))
    .unwrap();
    let config = Config::try_from(cli).unwrap();
    let client_config = config.target_client_config.unwrap();
    assert!(matches!(client_config.credential, S3Credentials::Profile(ref p) if p == "monitor"));
}

#[test]
fn config_target_client_config_from_access_keys() {
    let catalog = catalog_file(CATALOG);
    let cli = parse_from_args(args_with(
        &catalog,
        &[
            "--target",
            "s3://bucket/",
            "--target-access-key",
            "AKIA...",
            "--target-secret-key",
            "secret123",
        ],
    ))
    .unwrap();
    let config = Config::try_from(cli).unwrap();
    let client_config = config.target_client_config.unwrap();
    assert!(matches!(
        client_config.credential,
        S3Credentials::Credentials { .. }
    ));
}

#[test]
fn config_target_client_config_from_environment() {
    let catalog = catalog_file(CATALOG);
    let cli = parse_from_args(args_with(&catalog, &["--target", "s3://bucket/"])).unwrap();
    let config = Config::try_from(cli).unwrap();
    assert!(matches!(
        config.target_client_config.unwrap().credential,
        S3Credentials::FromEnvironment
    ));
}

#[test]
fn client_config_carries_connection_options() {
    let catalog = catalog_file(CATALOG);
    let cli = parse_from_args(args_with(
        &catalog,
        &[
            "--target",
            "s3://bucket/",
            "--target-region",
            "eu-west-1",
            "--target-endpoint-url",
            "http://localhost:9000",
            "--target-force-path-style",
            "--connect-timeout-milliseconds",
            "800",
        ],
    ))
    .unwrap();

    let client_config = cli.build_client_config();
    assert_eq!(client_config.region.as_deref(), Some("eu-west-1"));
    assert_eq!(client_config.endpoint_url.as_deref(), Some("http://localhost:9000"));
    assert!(client_config.force_path_style);
    assert_eq!(
        client_config.cli_timeout_config.connect_timeout_milliseconds,
        Some(800)
    );
}

#[test]
fn store_catalog_is_loaded_later() {
    let cli = parse_from_args(vec![
        "s3mon",
        "memory:///memory/config/catalog.json",
        "--target",
        "memory://",
    ])
    .unwrap();
    let config = Config::try_from(cli).unwrap();

    assert!(config.pipelines.is_empty());
    assert_eq!(
        config.catalog,
        Some(CatalogLocation::Store("/memory/config/catalog.json".to_string()))
    );
}

#[test]
fn http_catalog_is_loaded_later() {
    let cli = parse_from_args(vec![
        "s3mon",
        "https://config.example.com/s3mon/catalog.json",
        "--target",
        "s3://bucket/",
    ])
    .unwrap();
    let config = Config::try_from(cli).unwrap();

    assert!(config.pipelines.is_empty());
    assert!(matches!(config.catalog, Some(CatalogLocation::Http(_))));
}

#[test]
fn config_rejects_catalog_outside_the_target_store() {
    let cli = parse_from_args(vec![
        "s3mon",
        "s3://catalogs/catalog.json",
        "--target",
        "memory://",
    ])
    .unwrap();
    let result = Config::try_from(cli);
    assert!(result.unwrap_err().contains("monitored store"));
}

#[test]
fn build_config_from_args_convenience() {
    init_dummy_tracing_subscriber();

    let catalog = catalog_file(CATALOG);
    let config = build_config_from_args(args_with(&catalog, &["--target", "memory://"])).unwrap();
    assert_eq!(config.pipelines[0].name, "upload");
}

#[test]
fn build_config_from_args_error() {
    let result = build_config_from_args(vec!["s3mon"]);
    assert!(result.is_err());
}

// ---------------------------------------------------------------------------
// Property tests
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 50,
        .. ProptestConfig::default()
    })]

    #[test]
    fn test_retry_options_take_cli_values(
        aws_max_attempts in 1u32..=20,
        initial_backoff in 1u64..=10_000,
    ) {
        let catalog = catalog_file(CATALOG);
        let max_attempts = aws_max_attempts.to_string();
        let backoff = initial_backoff.to_string();
        let cli = parse_from_args(args_with(
            &catalog,
            &[
                "--target",
                "s3://bucket/",
                "--aws-max-attempts",
                &max_attempts,
                "--initial-backoff-milliseconds",
                &backoff,
            ],
        ))
        .unwrap();
        let config = Config::try_from(cli).unwrap();
        let retry_config = config.target_client_config.unwrap().retry_config;
        prop_assert_eq!(retry_config.aws_max_attempts, aws_max_attempts);
        prop_assert_eq!(retry_config.initial_backoff_milliseconds, initial_backoff);
    }

    #[test]
    fn test_input_validation_accepts_valid_targets(
        bucket in "[a-z][a-z0-9\\-]{2,10}",
        prefix in "[a-z0-9/]{0,20}",
    ) {
        let target = format!("s3://{bucket}/{prefix}");
        let catalog = catalog_file(CATALOG);
        let result = parse_from_args(args_with(&catalog, &["--target", &target]));
        prop_assert!(result.is_ok());
    }

    #[test]
    fn test_input_validation_rejects_invalid_targets(
        bad_target in "[a-z]{1,10}",
    ) {
        let catalog = catalog_file(CATALOG);
        let result = parse_from_args(args_with(&catalog, &["--target", &bad_target]));
        prop_assert!(result.is_err());
    }
}
