//! In-process storage backend.
//!
//! Keeps objects and directories in a shared map so that several workers
//! (and the test that drives them) observe the same store. Directory
//! semantics follow a hierarchical object store: uploads need an existing
//! parent directory and only empty directories can be removed.
//!
//! Containers are top-level directories below `/containers`, outside the
//! monitor's root directory.
//!
//! Faults can be injected per operation to exercise the failure paths of the
//! pipelines without a remote service.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tracing::trace;

use crate::storage::{StorageError, StorageTrait};
use crate::types::{CompletedPart, MultipartUpload, ObjectBody, ObjectHead};

const MEMORY_ROOT_DIRECTORY: &str = "/memory";
const MEMORY_CONTAINER_ROOT: &str = "/containers";
const MEMORY_BASE_URL: &str = "memory://localhost";

/// Storage operation a fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateContainer,
    DeleteContainer,
    CreateDirectory,
    PutObject,
    UploadPart,
    HeadObject,
    GetObject,
    DeleteObject,
    DeleteDirectory,
}

/// What happens when an injected fault fires.
#[derive(Debug, Clone)]
pub enum FaultKind {
    /// The operation fails with the given error.
    Error(StorageError),
    /// GET returns a body whose first byte has been altered.
    CorruptBody,
    /// GET returns the body without its last byte.
    TruncatedBody,
    /// HEAD reports a different checksum in the metadata.
    WrongChecksum,
    /// The operation sleeps before proceeding.
    Stall(Duration),
}

#[derive(Debug, Clone)]
pub struct Fault {
    pub operation: Operation,
    pub kind: FaultKind,
}

impl Fault {
    pub fn new(operation: Operation, kind: FaultKind) -> Self {
        Self { operation, kind }
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    metadata: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct PendingUpload {
    metadata: HashMap<String, String>,
    parts: BTreeMap<i32, Vec<u8>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<String, StoredObject>,
    directories: BTreeSet<String>,
    uploads: HashMap<String, (String, PendingUpload)>,
    faults: Vec<Fault>,
    next_upload_id: u64,
}

impl MemoryState {
    fn take_fault(&mut self, operation: Operation) -> Option<FaultKind> {
        let index = self.faults.iter().position(|f| f.operation == operation)?;
        Some(self.faults.remove(index).kind)
    }

    /// Remove an empty directory.
    fn remove_empty_directory(&mut self, dir: String) -> Result<()> {
        if !self.directories.contains(&dir) {
            return Err(anyhow!(StorageError::NotFound { path: dir }));
        }
        if self.has_children(&dir) {
            return Err(anyhow!(StorageError::DirectoryNotEmpty { path: dir }));
        }
        self.directories.remove(&dir);
        Ok(())
    }

    fn has_children(&self, dir: &str) -> bool {
        self.objects.keys().any(|key| key.starts_with(dir))
            || self
                .directories
                .iter()
                .any(|d| d.starts_with(dir) && d.as_str() != dir)
    }
}

/// Storage backend holding everything in memory.
#[derive(Clone, Debug)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
    min_part_size: u64,
}

impl MemoryStorage {
    pub fn new(min_part_size: u64) -> Self {
        let mut state = MemoryState::default();
        state
            .directories
            .insert(as_directory(MEMORY_ROOT_DIRECTORY));
        Self {
            state: Arc::new(Mutex::new(state)),
            min_part_size,
        }
    }

    /// Queue a fault; it fires once, on the next matching operation.
    pub fn inject_fault(&self, fault: Fault) {
        self.state.lock().unwrap().faults.push(fault);
    }

    /// Number of injected faults that have not fired yet.
    pub fn pending_faults(&self) -> usize {
        self.state.lock().unwrap().faults.len()
    }

    pub fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(path)
            .map(|o| o.body.clone())
    }

    pub fn object_paths(&self) -> Vec<String> {
        self.state.lock().unwrap().objects.keys().cloned().collect()
    }

    pub fn directories(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .directories
            .iter()
            .cloned()
            .collect()
    }

    pub fn has_directory(&self, path: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .directories
            .contains(&as_directory(path))
    }

    pub fn pending_uploads(&self) -> usize {
        self.state.lock().unwrap().uploads.len()
    }

    async fn apply_fault(&self, operation: Operation) -> Result<Option<FaultKind>> {
        let fault = self.state.lock().unwrap().take_fault(operation);
        match fault {
            Some(FaultKind::Error(e)) => {
                trace!(operation = ?operation, "injected storage failure.");
                Err(anyhow!(e))
            }
            Some(FaultKind::Stall(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(None)
            }
            other => Ok(other),
        }
    }
}

#[async_trait]
impl StorageTrait for MemoryStorage {
    fn root_directory(&self) -> String {
        MEMORY_ROOT_DIRECTORY.to_string()
    }

    fn base_url(&self) -> String {
        MEMORY_BASE_URL.to_string()
    }

    fn minimum_part_size(&self) -> u64 {
        self.min_part_size
    }

    fn container_path(&self, name: &str) -> String {
        format!("{MEMORY_CONTAINER_ROOT}/{name}/")
    }

    async fn create_container(&self, name: &str) -> Result<()> {
        self.apply_fault(Operation::CreateContainer).await?;

        let path = self.container_path(name);
        let mut state = self.state.lock().unwrap();
        if !state.directories.insert(path.clone()) {
            return Err(anyhow!(StorageError::AlreadyExists { path }));
        }
        Ok(())
    }

    async fn delete_container(&self, name: &str) -> Result<()> {
        self.apply_fault(Operation::DeleteContainer).await?;

        let path = self.container_path(name);
        self.state.lock().unwrap().remove_empty_directory(path)
    }

    async fn list_containers(&self, prefix: &str) -> Result<Vec<String>> {
        let root = format!("{MEMORY_CONTAINER_ROOT}/");
        Ok(self
            .state
            .lock()
            .unwrap()
            .directories
            .iter()
            .filter_map(|dir| dir.strip_prefix(&root))
            .map(|name| name.trim_end_matches('/'))
            .filter(|name| !name.is_empty() && !name.contains('/') && name.starts_with(prefix))
            .map(str::to_string)
            .collect())
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        self.apply_fault(Operation::CreateDirectory).await?;

        let mut state = self.state.lock().unwrap();
        for dir in ancestors_and_self(path) {
            state.directories.insert(dir);
        }
        Ok(())
    }

    async fn put_object(
        &self,
        path: &str,
        body: Vec<u8>,
        _content_type: &str,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        self.apply_fault(Operation::PutObject).await?;

        let mut state = self.state.lock().unwrap();
        let parent = parent_directory(path);
        if !state.directories.contains(&parent) {
            return Err(anyhow!(StorageError::Http {
                method: "PUT".to_string(),
                url: format!("{MEMORY_BASE_URL}{path}"),
                status: 404,
                code: Some("DirectoryDoesNotExist".to_string()),
                message: format!("{parent} does not exist"),
                request_id: None,
            }));
        }

        state
            .objects
            .insert(path.to_string(), StoredObject { body, metadata });
        Ok(())
    }

    async fn initiate_multipart_upload(
        &self,
        path: &str,
        _content_type: &str,
        metadata: HashMap<String, String>,
    ) -> Result<MultipartUpload> {
        let mut state = self.state.lock().unwrap();
        state.next_upload_id += 1;
        let upload_id = format!("upload-{}", state.next_upload_id);
        state.uploads.insert(
            upload_id.clone(),
            (
                path.to_string(),
                PendingUpload {
                    metadata,
                    ..Default::default()
                },
            ),
        );

        Ok(MultipartUpload {
            path: path.to_string(),
            upload_id,
        })
    }

    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<CompletedPart> {
        self.apply_fault(Operation::UploadPart).await?;

        let mut state = self.state.lock().unwrap();
        let (_, pending) = state.uploads.get_mut(&upload.upload_id).ok_or_else(|| {
            anyhow!(StorageError::NotFound {
                path: upload.path.clone()
            })
        })?;
        let e_tag = format!("\"{}-{}\"", upload.upload_id, part_number);
        pending.parts.insert(part_number, body);

        Ok(CompletedPart { part_number, e_tag })
    }

    async fn complete_multipart_upload(
        &self,
        upload: &MultipartUpload,
        parts: Vec<CompletedPart>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let (path, pending) = state.uploads.remove(&upload.upload_id).ok_or_else(|| {
            anyhow!(StorageError::NotFound {
                path: upload.path.clone()
            })
        })?;

        let mut body = Vec::new();
        for part in &parts {
            let data = pending.parts.get(&part.part_number).ok_or_else(|| {
                anyhow!(StorageError::Http {
                    method: "POST".to_string(),
                    url: format!("{MEMORY_BASE_URL}{path}"),
                    status: 400,
                    code: Some("InvalidPart".to_string()),
                    message: format!("part {} was never uploaded", part.part_number),
                    request_id: None,
                })
            })?;
            body.extend_from_slice(data);
        }

        state.objects.insert(
            path,
            StoredObject {
                body,
                metadata: pending.metadata,
            },
        );
        Ok(())
    }

    async fn abort_multipart_upload(&self, upload: &MultipartUpload) -> Result<()> {
        self.state.lock().unwrap().uploads.remove(&upload.upload_id);
        Ok(())
    }

    async fn head_object(&self, path: &str) -> Result<ObjectHead> {
        let fault = self.apply_fault(Operation::HeadObject).await?;

        let state = self.state.lock().unwrap();
        let object = state.objects.get(path).ok_or_else(|| {
            anyhow!(StorageError::NotFound {
                path: path.to_string()
            })
        })?;

        let mut metadata = object.metadata.clone();
        if let Some(FaultKind::WrongChecksum) = fault {
            for value in metadata.values_mut() {
                *value = value.chars().rev().collect();
            }
        }

        Ok(ObjectHead {
            content_length: Some(object.body.len() as u64),
            metadata,
        })
    }

    async fn get_object(&self, path: &str) -> Result<ObjectBody> {
        let fault = self.apply_fault(Operation::GetObject).await?;

        let mut body = self
            .state
            .lock()
            .unwrap()
            .objects
            .get(path)
            .map(|o| o.body.clone())
            .ok_or_else(|| {
                anyhow!(StorageError::NotFound {
                    path: path.to_string()
                })
            })?;
        let content_length = Some(body.len() as u64);

        match fault {
            Some(FaultKind::CorruptBody) => {
                if let Some(first) = body.first_mut() {
                    *first = first.wrapping_add(1);
                }
            }
            Some(FaultKind::TruncatedBody) => {
                body.pop();
            }
            _ => {}
        }

        Ok(ObjectBody {
            content_length,
            body: Box::pin(Cursor::new(body)),
        })
    }

    async fn delete_object(&self, path: &str) -> Result<()> {
        self.apply_fault(Operation::DeleteObject).await?;

        self.state
            .lock()
            .unwrap()
            .objects
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| {
                anyhow!(StorageError::NotFound {
                    path: path.to_string()
                })
            })
    }

    async fn delete_directory(&self, path: &str) -> Result<()> {
        self.apply_fault(Operation::DeleteDirectory).await?;

        self.state
            .lock()
            .unwrap()
            .remove_empty_directory(as_directory(path))
    }

    async fn delete_recursive(&self, path: &str) -> Result<()> {
        let dir = as_directory(path);
        let mut state = self.state.lock().unwrap();
        state.objects.retain(|key, _| !key.starts_with(&dir));
        state.directories.retain(|d| !d.starts_with(&dir));
        Ok(())
    }
}

fn as_directory(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

fn parent_directory(path: &str) -> String {
    match path.trim_end_matches('/').rfind('/') {
        Some(index) => path[..=index].to_string(),
        None => String::new(),
    }
}

fn ancestors_and_self(path: &str) -> Vec<String> {
    let absolute = path.starts_with('/');
    let mut current = if absolute {
        "/".to_string()
    } else {
        String::new()
    };
    let mut dirs = Vec::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current.push_str(segment);
        current.push('/');
        dirs.push(current.clone());
    }
    dirs
}
