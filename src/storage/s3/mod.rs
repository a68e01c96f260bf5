pub mod client_builder;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CompletedMultipartUpload, CreateBucketConfiguration, Delete,
    ObjectIdentifier,
};
use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use aws_smithy_types::error::display::DisplayErrorContext;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::storage::{Storage, StorageError, StorageTrait};
use crate::types::{CompletedPart, MultipartUpload, ObjectBody, ObjectHead};

/// Smallest part size Amazon S3 accepts for every part but the last.
pub const S3_MINIMUM_PART_SIZE: u64 = 5 * 1024 * 1024;

const DELETE_OBJECTS_MAX_KEYS: i32 = 1000;

/// Paths of this form address an object in another bucket.
const BUCKET_PATH_SCHEME: &str = "s3://";

/// Region that must not be sent as a bucket location constraint.
const DEFAULT_BUCKET_REGION: &str = "us-east-1";

/// Extracts the S3 error code and message from an AWS SDK error.
///
/// For service errors (S3 API responses), returns the S3 error code
/// (e.g. "AccessDenied", "InternalError") and the error message from the
/// response. For other error types (network, timeout, construction failure),
/// returns "N/A" as the code and the full error description as the message.
fn extract_sdk_error_details<E: std::error::Error + ProvideErrorMetadata + 'static>(
    e: &SdkError<E, HttpResponse>,
) -> (String, String) {
    if let Some(service_err) = e.as_service_error() {
        (
            service_err.code().unwrap_or("unknown").to_string(),
            service_err.message().unwrap_or("no message").to_string(),
        )
    } else {
        ("N/A".to_string(), DisplayErrorContext(e).to_string())
    }
}

/// Translate an SDK failure into the backend-neutral [`StorageError`].
fn to_storage_error<E: std::error::Error + ProvideErrorMetadata + 'static>(
    e: &SdkError<E, HttpResponse>,
    method: &str,
    url: &str,
) -> StorageError {
    match e {
        SdkError::ServiceError(service) => {
            let err = service.err();
            StorageError::Http {
                method: method.to_string(),
                url: url.to_string(),
                status: service.raw().status().as_u16(),
                code: err.code().map(str::to_string),
                message: err
                    .message()
                    .map(str::to_string)
                    .unwrap_or_else(|| DisplayErrorContext(e).to_string()),
                request_id: err.meta().extra("aws_request_id").map(str::to_string),
            }
        }
        SdkError::TimeoutError(_) => StorageError::Timeout(format!("{method} {url} timed out")),
        SdkError::DispatchFailure(failure) if failure.is_timeout() => {
            StorageError::Timeout(format!("{method} {url} timed out"))
        }
        _ => StorageError::Transport(DisplayErrorContext(e).to_string()),
    }
}

fn service_error_code<E: ProvideErrorMetadata>(e: &SdkError<E, HttpResponse>) -> Option<&str> {
    e.as_service_error().and_then(|service| service.code())
}

/// Factory for creating S3 storage instances.
pub struct S3StorageFactory;

impl S3StorageFactory {
    /// Create a storage handle for `bucket`, keeping monitor data below `prefix`.
    ///
    /// Without a client configuration the SDK's default provider chains are used.
    pub async fn create(
        bucket: String,
        prefix: String,
        client_config: Option<ClientConfig>,
    ) -> Storage {
        let (client, base_url) = match &client_config {
            Some(client_config) => (
                client_config.create_client().await,
                build_base_url(&bucket, client_config),
            ),
            None => {
                let sdk_config =
                    aws_config::defaults(aws_config::BehaviorVersion::latest()).load().await;
                (
                    Client::new(&sdk_config),
                    format!("https://{bucket}.s3.amazonaws.com"),
                )
            }
        };

        Box::new(S3Storage {
            bucket,
            prefix: prefix.trim_matches('/').to_string(),
            base_url,
            client: Arc::new(client),
        })
    }
}

/// Amazon S3 (and compatible) backend.
///
/// Directories are emulated with zero-byte `dir/` marker objects, so
/// "directory not empty" is detected by listing the marker's prefix.
/// Containers are buckets; paths of the form `s3://bucket/key` address
/// objects outside the configured bucket.
#[derive(Clone)]
struct S3Storage {
    bucket: String,
    prefix: String,
    base_url: String,
    client: Arc<Client>,
}

impl S3Storage {
    /// Bucket and key of a store path.
    fn locate(&self, path: &str) -> (String, String) {
        match path.strip_prefix(BUCKET_PATH_SCHEME) {
            Some(rest) => {
                let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
                (bucket.to_string(), key.to_string())
            }
            None => (self.bucket.clone(), object_key(path)),
        }
    }

    fn request_url(&self, bucket: &str, key: &str) -> String {
        if bucket == self.bucket {
            format!("{}/{}", self.base_url, key)
        } else {
            format!("{BUCKET_PATH_SCHEME}{bucket}/{key}")
        }
    }

    fn sdk_error<E: std::error::Error + ProvideErrorMetadata + Send + Sync + 'static>(
        &self,
        e: SdkError<E, HttpResponse>,
        method: &str,
        operation: &str,
        bucket: &str,
        key: &str,
    ) -> anyhow::Error {
        let (s3_error_code, s3_error_message) = extract_sdk_error_details(&e);
        debug!(
            bucket = bucket,
            key = key,
            s3_error_code = s3_error_code,
            s3_error_message = s3_error_message,
            "S3 {} API call failed for s3://{}/{}: {} ({}).",
            operation,
            bucket,
            key,
            s3_error_code,
            s3_error_message,
        );
        anyhow!(to_storage_error(&e, method, &self.request_url(bucket, key)))
    }

    async fn put_directory_marker(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from_static(b""))
            .send()
            .await
            .map_err(|e| self.sdk_error(e, "PUT", "PutObject", bucket, key))?;
        Ok(())
    }

    async fn list_keys(
        &self,
        bucket: &str,
        prefix: &str,
        max_keys: i32,
        token: Option<String>,
    ) -> Result<(Vec<String>, Option<String>)> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .max_keys(max_keys)
            .set_continuation_token(token)
            .send()
            .await
            .map_err(|e| self.sdk_error(e, "GET", "ListObjectsV2", bucket, prefix))?;

        let keys = output
            .contents()
            .iter()
            .filter_map(|object| object.key().map(str::to_string))
            .collect();
        let next = if output.is_truncated() == Some(true) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };
        Ok((keys, next))
    }

    /// Location constraint for new buckets, taken from the client's region.
    fn bucket_configuration(&self) -> Option<CreateBucketConfiguration> {
        let region = self.client.config().region()?;
        if region.as_ref() == DEFAULT_BUCKET_REGION {
            return None;
        }
        Some(
            CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(region.as_ref()))
                .build(),
        )
    }
}

#[async_trait]
impl StorageTrait for S3Storage {
    fn root_directory(&self) -> String {
        self.prefix.clone()
    }

    fn base_url(&self) -> String {
        self.base_url.clone()
    }

    fn minimum_part_size(&self) -> u64 {
        S3_MINIMUM_PART_SIZE
    }

    fn container_path(&self, name: &str) -> String {
        format!("{BUCKET_PATH_SCHEME}{name}/")
    }

    async fn create_container(&self, name: &str) -> Result<()> {
        let result = self
            .client
            .create_bucket()
            .bucket(name)
            .set_create_bucket_configuration(self.bucket_configuration())
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if service_error_code(&e) == Some("BucketAlreadyOwnedByYou") => {
                Err(anyhow!(StorageError::AlreadyExists {
                    path: self.container_path(name)
                }))
            }
            Err(e) => Err(self.sdk_error(e, "PUT", "CreateBucket", name, "")),
        }
    }

    async fn delete_container(&self, name: &str) -> Result<()> {
        match self.client.delete_bucket().bucket(name).send().await {
            Ok(_) => Ok(()),
            Err(e) if service_error_code(&e) == Some("BucketNotEmpty") => {
                Err(anyhow!(StorageError::DirectoryNotEmpty {
                    path: self.container_path(name)
                }))
            }
            Err(e) => Err(self.sdk_error(e, "DELETE", "DeleteBucket", name, "")),
        }
    }

    async fn list_containers(&self, prefix: &str) -> Result<Vec<String>> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| self.sdk_error(e, "GET", "ListBuckets", "", ""))?;

        Ok(output
            .buckets()
            .iter()
            .filter_map(|bucket| bucket.name())
            .filter(|name| name.starts_with(prefix))
            .map(str::to_string)
            .collect())
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        let (bucket, key) = self.locate(path);
        for marker in directory_markers(&key) {
            self.put_directory_marker(&bucket, &marker).await?;
        }
        Ok(())
    }

    async fn put_object(
        &self,
        path: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        let (bucket, key) = self.locate(path);
        self.client
            .put_object()
            .bucket(&bucket)
            .key(&key)
            .content_type(content_type)
            .set_metadata(Some(metadata))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| self.sdk_error(e, "PUT", "PutObject", &bucket, &key))?;
        Ok(())
    }

    async fn initiate_multipart_upload(
        &self,
        path: &str,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> Result<MultipartUpload> {
        let (bucket, key) = self.locate(path);
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&bucket)
            .key(&key)
            .content_type(content_type)
            .set_metadata(Some(metadata))
            .send()
            .await
            .map_err(|e| self.sdk_error(e, "POST", "CreateMultipartUpload", &bucket, &key))?;

        let upload_id = output.upload_id().ok_or_else(|| {
            anyhow!(StorageError::Transport(format!(
                "CreateMultipartUpload for {key} returned no upload id"
            )))
        })?;

        Ok(MultipartUpload {
            path: path.to_string(),
            upload_id: upload_id.to_string(),
        })
    }

    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<CompletedPart> {
        let (bucket, key) = self.locate(&upload.path);
        let output = self
            .client
            .upload_part()
            .bucket(&bucket)
            .key(&key)
            .upload_id(&upload.upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| self.sdk_error(e, "PUT", "UploadPart", &bucket, &key))?;

        Ok(CompletedPart {
            part_number,
            e_tag: output.e_tag().unwrap_or_default().to_string(),
        })
    }

    async fn complete_multipart_upload(
        &self,
        upload: &MultipartUpload,
        parts: Vec<CompletedPart>,
    ) -> Result<()> {
        let (bucket, key) = self.locate(&upload.path);
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .into_iter()
                    .map(|part| {
                        aws_sdk_s3::types::CompletedPart::builder()
                            .part_number(part.part_number)
                            .e_tag(part.e_tag)
                            .build()
                    })
                    .collect(),
            ))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&bucket)
            .key(&key)
            .upload_id(&upload.upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| self.sdk_error(e, "POST", "CompleteMultipartUpload", &bucket, &key))?;
        Ok(())
    }

    async fn abort_multipart_upload(&self, upload: &MultipartUpload) -> Result<()> {
        let (bucket, key) = self.locate(&upload.path);
        self.client
            .abort_multipart_upload()
            .bucket(&bucket)
            .key(&key)
            .upload_id(&upload.upload_id)
            .send()
            .await
            .map_err(|e| self.sdk_error(e, "DELETE", "AbortMultipartUpload", &bucket, &key))?;
        Ok(())
    }

    async fn head_object(&self, path: &str) -> Result<ObjectHead> {
        let (bucket, key) = self.locate(path);
        let output = self
            .client
            .head_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| self.sdk_error(e, "HEAD", "HeadObject", &bucket, &key))?;

        Ok(ObjectHead {
            content_length: output.content_length().map(|len| len.max(0) as u64),
            metadata: output.metadata().cloned().unwrap_or_default(),
        })
    }

    async fn get_object(&self, path: &str) -> Result<ObjectBody> {
        let (bucket, key) = self.locate(path);
        let output = self
            .client
            .get_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| self.sdk_error(e, "GET", "GetObject", &bucket, &key))?;

        Ok(ObjectBody {
            content_length: output.content_length().map(|len| len.max(0) as u64),
            body: Box::pin(output.body.into_async_read()),
        })
    }

    async fn delete_object(&self, path: &str) -> Result<()> {
        let (bucket, key) = self.locate(path);
        self.client
            .delete_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| self.sdk_error(e, "DELETE", "DeleteObject", &bucket, &key))?;
        Ok(())
    }

    async fn delete_directory(&self, path: &str) -> Result<()> {
        let (bucket, key) = self.locate(path);
        let marker = directory_key(&key);
        let (keys, _) = self.list_keys(&bucket, &marker, 2, None).await?;

        if keys.is_empty() {
            return Err(anyhow!(StorageError::NotFound { path: marker }));
        }
        if keys.iter().any(|key| key != &marker) {
            return Err(anyhow!(StorageError::DirectoryNotEmpty { path: marker }));
        }

        self.client
            .delete_object()
            .bucket(&bucket)
            .key(&marker)
            .send()
            .await
            .map_err(|e| self.sdk_error(e, "DELETE", "DeleteObject", &bucket, &marker))?;
        Ok(())
    }

    async fn delete_recursive(&self, path: &str) -> Result<()> {
        let (bucket, key) = self.locate(path);
        let prefix = directory_key(&key);
        let mut continuation_token = None;

        loop {
            let (keys, next) = self
                .list_keys(&bucket, &prefix, DELETE_OBJECTS_MAX_KEYS, continuation_token)
                .await?;
            if !keys.is_empty() {
                let object_count = keys.len();
                let objects = keys
                    .into_iter()
                    .map(|key| ObjectIdentifier::builder().key(key).build())
                    .collect::<Result<Vec<_>, _>>()?;
                let delete = Delete::builder().set_objects(Some(objects)).build()?;

                let output = self
                    .client
                    .delete_objects()
                    .bucket(&bucket)
                    .delete(delete)
                    .send()
                    .await
                    .map_err(|e| self.sdk_error(e, "POST", "DeleteObjects", &bucket, &prefix))?;

                for error in output.errors() {
                    warn!(
                        bucket = bucket,
                        key = error.key().unwrap_or_default(),
                        s3_error_code = error.code().unwrap_or_default(),
                        "failed to delete object during purge."
                    );
                }
                debug!(
                    bucket = bucket,
                    prefix = prefix,
                    object_count = object_count,
                    "purged objects."
                );
            }

            match next {
                Some(token) => continuation_token = Some(token),
                None => break,
            }
        }

        Ok(())
    }
}

fn build_base_url(bucket: &str, client_config: &ClientConfig) -> String {
    match (&client_config.endpoint_url, client_config.force_path_style) {
        (Some(endpoint), true) => format!("{}/{bucket}", endpoint.trim_end_matches('/')),
        (Some(endpoint), false) => match url::Url::parse(endpoint) {
            Ok(url) if url.host_str().is_some() => {
                let host = url.host_str().unwrap_or_default();
                let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
                format!("{}://{bucket}.{host}{port}", url.scheme())
            }
            _ => format!("{}/{bucket}", endpoint.trim_end_matches('/')),
        },
        (None, _) => match &client_config.region {
            Some(region) => format!("https://{bucket}.s3.{region}.amazonaws.com"),
            None => format!("https://{bucket}.s3.amazonaws.com"),
        },
    }
}

/// S3 keys never start with `/`.
fn object_key(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

fn directory_key(path: &str) -> String {
    let key = object_key(path);
    if key.ends_with('/') || key.is_empty() {
        key
    } else {
        format!("{key}/")
    }
}

/// Marker keys for a directory and all of its parents, outermost first.
fn directory_markers(path: &str) -> Vec<String> {
    let mut current = String::new();
    object_key(path)
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            current.push_str(segment);
            current.push('/');
            current.clone()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CLITimeoutConfig, RetryConfig};
    use crate::types::{AccessKeys, ClientConfigLocation, S3Credentials};

    fn init_dummy_tracing_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("dummy=trace")
            .try_init();
    }

    fn make_test_client_config() -> ClientConfig {
        ClientConfig {
            client_config_location: ClientConfigLocation {
                aws_config_file: None,
                aws_shared_credentials_file: None,
            },
            credential: S3Credentials::Credentials {
                access_keys: AccessKeys {
                    access_key: "test".to_string(),
                    secret_access_key: "test".to_string(),
                    session_token: None,
                },
            },
            region: Some("us-east-1".to_string()),
            endpoint_url: Some("https://localhost:9000".to_string()),
            force_path_style: true,
            retry_config: RetryConfig {
                aws_max_attempts: 3,
                initial_backoff_milliseconds: 100,
            },
            cli_timeout_config: CLITimeoutConfig {
                operation_timeout_milliseconds: None,
                operation_attempt_timeout_milliseconds: None,
                connect_timeout_milliseconds: None,
                read_timeout_milliseconds: None,
            },
        }
    }

    #[test]
    fn object_key_strips_leading_slash() {
        init_dummy_tracing_subscriber();

        assert_eq!(object_key("/monitor/a.txt"), "monitor/a.txt");
        assert_eq!(object_key("monitor/a.txt"), "monitor/a.txt");
    }

    #[test]
    fn directory_key_adds_trailing_slash() {
        init_dummy_tracing_subscriber();

        assert_eq!(directory_key("monitor/0/1"), "monitor/0/1/");
        assert_eq!(directory_key("monitor/0/1/"), "monitor/0/1/");
        assert_eq!(directory_key(""), "");
    }

    #[test]
    fn directory_markers_cover_every_level() {
        init_dummy_tracing_subscriber();

        assert_eq!(
            directory_markers("prefix/s3mon-data/Chain/0/"),
            vec![
                "prefix/",
                "prefix/s3mon-data/",
                "prefix/s3mon-data/Chain/",
                "prefix/s3mon-data/Chain/0/",
            ]
        );
        assert!(directory_markers("").is_empty());
    }

    #[test]
    fn base_url_with_path_style_endpoint() {
        init_dummy_tracing_subscriber();

        let client_config = make_test_client_config();
        assert_eq!(
            build_base_url("bucket", &client_config),
            "https://localhost:9000/bucket"
        );
    }

    #[test]
    fn base_url_with_virtual_hosted_endpoint() {
        init_dummy_tracing_subscriber();

        let mut client_config = make_test_client_config();
        client_config.force_path_style = false;
        assert_eq!(
            build_base_url("bucket", &client_config),
            "https://bucket.localhost:9000"
        );
    }

    #[test]
    fn base_url_for_aws_region() {
        init_dummy_tracing_subscriber();

        let mut client_config = make_test_client_config();
        client_config.endpoint_url = None;
        client_config.region = Some("eu-west-1".to_string());
        assert_eq!(
            build_base_url("bucket", &client_config),
            "https://bucket.s3.eu-west-1.amazonaws.com"
        );
    }

    fn storage_in(region: &str) -> S3Storage {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region.to_string()))
            .build();
        S3Storage {
            bucket: "monitored".to_string(),
            prefix: "monitor".to_string(),
            base_url: "https://monitored.s3.amazonaws.com".to_string(),
            client: Arc::new(Client::from_conf(config)),
        }
    }

    #[test]
    fn bucket_paths_address_other_buckets() {
        init_dummy_tracing_subscriber();

        let storage = storage_in("eu-west-1");
        assert_eq!(
            storage.locate("/monitor/a.txt"),
            ("monitored".to_string(), "monitor/a.txt".to_string())
        );
        assert_eq!(
            storage.locate("s3://s3mon-upload-1/abc.txt"),
            ("s3mon-upload-1".to_string(), "abc.txt".to_string())
        );
        assert_eq!(
            storage.locate(&storage.container_path("s3mon-upload-1")),
            ("s3mon-upload-1".to_string(), String::new())
        );
        assert_eq!(
            storage.locate("s3://catalogs"),
            ("catalogs".to_string(), String::new())
        );

        assert_eq!(
            storage.request_url("monitored", "monitor/a.txt"),
            "https://monitored.s3.amazonaws.com/monitor/a.txt"
        );
        assert_eq!(
            storage.request_url("s3mon-upload-1", "abc.txt"),
            "s3://s3mon-upload-1/abc.txt"
        );
    }

    #[test]
    fn new_buckets_are_constrained_to_the_client_region() {
        init_dummy_tracing_subscriber();

        let configuration = storage_in("eu-west-1").bucket_configuration().unwrap();
        assert_eq!(
            configuration.location_constraint(),
            Some(&BucketLocationConstraint::EuWest1)
        );
        assert!(storage_in("us-east-1").bucket_configuration().is_none());
    }

    #[tokio::test]
    async fn s3_storage_factory_creates_with_client_config() {
        init_dummy_tracing_subscriber();

        let storage = S3StorageFactory::create(
            "test-bucket".to_string(),
            "/monitor/".to_string(),
            Some(make_test_client_config()),
        )
        .await;

        assert_eq!(storage.root_directory(), "monitor");
        assert_eq!(storage.base_url(), "https://localhost:9000/test-bucket");
        assert_eq!(storage.minimum_part_size(), S3_MINIMUM_PART_SIZE);
    }
}
