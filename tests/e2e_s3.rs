//! E2E tests against a real S3 bucket.
//!
//! Run with `RUSTFLAGS="--cfg e2e_test"`. The bucket is taken from
//! `S3MON_E2E_BUCKET` and credentials from the `s3mon-e2e-test` profile.

#![cfg(e2e_test)]

mod common;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use common::{RecordingSink, init_dummy_tracing_subscriber, reporter, wait_until};
use s3mon_rs::config::ChainKind;
use s3mon_rs::storage::create_storage;
use s3mon_rs::telemetry::{MetricsRegistry, SharedMetrics};
use s3mon_rs::{ChainRunner, Config, build_config_from_args};
use tempfile::NamedTempFile;

const AWS_PROFILE: &str = "s3mon-e2e-test";
const E2E_TIMEOUT: Duration = Duration::from_secs(300);

const CATALOG: &str = r#"{
    "testRunners": [
        {
            "name": "e2e-upload",
            "chain": "FileUploadGetDeleteChain",
            "threads": 2,
            "minFileSize": "1KiB",
            "maxFileSize": "64KiB",
            "iterationTimeout": 60
        },
        {
            "name": "e2e-multipart",
            "chain": "FileMultipartUploadGetDeleteChain",
            "threads": 1,
            "minFileSize": "5MiB",
            "maxFileSize": "12MiB",
            "iterationTimeout": 120
        }
    ]
}"#;

fn build_config(catalog: &NamedTempFile) -> Config {
    let bucket = std::env::var("S3MON_E2E_BUCKET").expect("S3MON_E2E_BUCKET is not set");
    build_config_from_args(vec![
        "s3mon".to_string(),
        catalog.path().to_string_lossy().to_string(),
        "--target".to_string(),
        format!("s3://{bucket}/s3mon-e2e/"),
        "--target-profile".to_string(),
        AWS_PROFILE.to_string(),
    ])
    .unwrap_or_else(|e| panic!("Failed to build config from args: {e}"))
}

#[tokio::test(flavor = "multi_thread")]
async fn e2e_runners_complete_iterations_and_purge() {
    init_dummy_tracing_subscriber();

    let mut catalog = NamedTempFile::new().unwrap();
    catalog.write_all(CATALOG.as_bytes()).unwrap();
    let config = build_config(&catalog);

    let storage = create_storage(&config).await;
    let metrics = SharedMetrics::new(Arc::new(MetricsRegistry::new()));
    let sink = Arc::new(RecordingSink::default());

    let mut runners = Vec::new();
    for pipeline in &config.pipelines {
        assert!(pipeline.chain == ChainKind::FileUploadGetDelete || pipeline.min_file_size >= storage.minimum_part_size());
        runners.push(Arc::new(
            ChainRunner::new(
                pipeline.clone(),
                storage.clone(),
                metrics.clone(),
                reporter(sink.clone(), &config.report_config),
                tokio::runtime::Handle::current(),
            )
            .unwrap(),
        ));
    }

    for runner in &runners {
        runner.start().unwrap();
    }

    let elapsed = metrics.elapsed().clone();
    let completed = tokio::time::timeout(
        E2E_TIMEOUT,
        tokio::task::spawn_blocking(move || {
            wait_until(|| elapsed.contains_key("e2e-upload") && elapsed.contains_key("e2e-multipart"))
        }),
    )
    .await
    .expect("E2E test timed out")
    .unwrap();
    assert!(completed);

    for runner in &runners {
        runner.stop();
    }
    for runner in &runners {
        let joined = runner.clone();
        tokio::task::spawn_blocking(move || joined.join()).await.unwrap();
        runner.purge().await.unwrap();
    }

    assert!(sink.reports().is_empty(), "{:?}", sink.reports());
}
