use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use dyn_clone::DynClone;
use thiserror::Error;

use crate::config::Config;
use crate::types::{CompletedPart, MultipartUpload, ObjectBody, ObjectHead, StoragePath};

pub mod memory;
pub mod s3;

/// Type alias for a boxed Storage trait object.
pub type Storage = Box<dyn StorageTrait + Send + Sync>;

/// Failures reported by a storage backend.
///
/// `Http` carries everything the failure classifier needs to tag a report:
/// the status code, the request line and the server's error code.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("Object not found: {path}")]
    NotFound { path: String },

    /// A directory or container that still holds something.
    #[error("Directory not empty: {path}")]
    DirectoryNotEmpty { path: String },

    #[error("Already exists: {path}")]
    AlreadyExists { path: String },

    #[error("{method} {url} failed with HTTP status {status}: {message}")]
    Http {
        method: String,
        url: String,
        status: u16,
        code: Option<String>,
        message: String,
        request_id: Option<String>,
    },

    #[error("{0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl StorageError {
    /// True for failures that mean the target is already gone.
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::NotFound { .. } => true,
            StorageError::Http { status, .. } => *status == 404,
            _ => false,
        }
    }

    pub fn is_directory_not_empty(&self) -> bool {
        matches!(self, StorageError::DirectoryNotEmpty { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StorageError::AlreadyExists { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StorageError::Timeout(_))
    }
}

/// Check whether an anyhow::Error wraps a not-found storage failure.
pub fn is_not_found_error(e: &anyhow::Error) -> bool {
    e.chain().any(|cause| {
        cause
            .downcast_ref::<StorageError>()
            .is_some_and(StorageError::is_not_found)
    })
}

/// Check whether an anyhow::Error wraps a directory-not-empty storage failure.
pub fn is_directory_not_empty_error(e: &anyhow::Error) -> bool {
    e.chain().any(|cause| {
        cause
            .downcast_ref::<StorageError>()
            .is_some_and(StorageError::is_directory_not_empty)
    })
}

/// Check whether an anyhow::Error wraps an already-exists storage failure.
pub fn is_already_exists_error(e: &anyhow::Error) -> bool {
    e.chain().any(|cause| {
        cause
            .downcast_ref::<StorageError>()
            .is_some_and(StorageError::is_already_exists)
    })
}

/// Storage operations needed by the monitor pipelines.
///
/// Paths are store-relative object paths as produced by
/// [`PathGenerator`](crate::path::PathGenerator) or below a
/// [`container_path`](StorageTrait::container_path). Directory paths end with `/`.
#[async_trait]
pub trait StorageTrait: DynClone {
    /// Root under which the monitor keeps its data.
    fn root_directory(&self) -> String;

    /// Base URL used to build request descriptors for reports.
    fn base_url(&self) -> String;

    /// Smallest part size the store accepts for a multipart upload
    /// (except the last part).
    fn minimum_part_size(&self) -> u64;

    /// Path under which the objects of container `name` are stored.
    fn container_path(&self, name: &str) -> String;

    /// Create a top-level container. Fails with [`StorageError::AlreadyExists`]
    /// if it is already there.
    async fn create_container(&self, name: &str) -> Result<()>;

    /// Delete an empty container. Fails with [`StorageError::DirectoryNotEmpty`]
    /// if it still holds objects and [`StorageError::NotFound`] if it is gone.
    async fn delete_container(&self, name: &str) -> Result<()>;

    /// Names of the containers starting with `prefix`.
    async fn list_containers(&self, prefix: &str) -> Result<Vec<String>>;

    /// Create a directory and all missing parents.
    async fn create_directory(&self, path: &str) -> Result<()>;

    /// Upload a whole object in a single request.
    async fn put_object(
        &self,
        path: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> Result<()>;

    async fn initiate_multipart_upload(
        &self,
        path: &str,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> Result<MultipartUpload>;

    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<CompletedPart>;

    async fn complete_multipart_upload(
        &self,
        upload: &MultipartUpload,
        parts: Vec<CompletedPart>,
    ) -> Result<()>;

    async fn abort_multipart_upload(&self, upload: &MultipartUpload) -> Result<()>;

    /// Metadata-only request for an object.
    async fn head_object(&self, path: &str) -> Result<ObjectHead>;

    /// Download an object as a stream.
    async fn get_object(&self, path: &str) -> Result<ObjectBody>;

    /// Delete a single object.
    async fn delete_object(&self, path: &str) -> Result<()>;

    /// Delete an empty directory. Fails with [`StorageError::DirectoryNotEmpty`]
    /// if anything remains below it and [`StorageError::NotFound`] if it is gone.
    async fn delete_directory(&self, path: &str) -> Result<()>;

    /// Delete a directory and everything below it.
    async fn delete_recursive(&self, path: &str) -> Result<()>;
}

dyn_clone::clone_trait_object!(StorageTrait);

/// Create the storage backend selected by the configuration.
pub async fn create_storage(config: &Config) -> Storage {
    match &config.target {
        StoragePath::S3 { bucket, prefix } => {
            s3::S3StorageFactory::create(
                bucket.clone(),
                prefix.clone(),
                config.target_client_config.clone(),
            )
            .await
        }
        StoragePath::Memory => Box::new(memory::MemoryStorage::new(config.memory_min_part_size)),
    }
}
