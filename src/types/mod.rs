use std::collections::HashMap;
use std::fmt;
use std::fmt::{Debug, Formatter};
use std::path::PathBuf;
use std::pin::Pin;

use tokio::io::AsyncRead;
use zeroize_derive::{Zeroize, ZeroizeOnDrop};

pub mod error;
pub mod token;

/// User metadata key under which the hex SHA-256 of an uploaded object is stored.
pub const CHECKSUM_METADATA_KEY: &str = "sha256-checksum";

/// Content type sent with every generated object.
pub const TEST_FILE_CONTENT_TYPE: &str = "text/plain; charset=UTF-8";

/// Target store specification.
#[derive(Debug, Clone, PartialEq)]
pub enum StoragePath {
    S3 { bucket: String, prefix: String },
    Memory,
}

/// AWS configuration file locations.
#[derive(Debug, Clone)]
pub struct ClientConfigLocation {
    pub aws_config_file: Option<PathBuf>,
    pub aws_shared_credentials_file: Option<PathBuf>,
}

/// AWS credential types supported by s3mon-rs.
#[derive(Debug, Clone)]
pub enum S3Credentials {
    Profile(String),
    Credentials { access_keys: AccessKeys },
    FromEnvironment,
}

/// AWS access key pair with secure zeroization.
///
/// The secret_access_key and session_token are securely cleared from memory
/// when this struct is dropped, using the zeroize crate.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AccessKeys {
    pub access_key: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Debug for AccessKeys {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut keys = f.debug_struct("AccessKeys");
        let session_token = self
            .session_token
            .as_ref()
            .map_or("None", |_| "** redacted **");
        keys.field("access_key", &self.access_key)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &session_token);
        keys.finish()
    }
}

/// Result of a metadata-only request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectHead {
    pub content_length: Option<u64>,
    pub metadata: HashMap<String, String>,
}

/// Streaming body returned by a GET request.
pub struct ObjectBody {
    pub content_length: Option<u64>,
    pub body: Pin<Box<dyn AsyncRead + Send>>,
}

impl Debug for ObjectBody {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectBody")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// A part accepted by the store during a multipart upload.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub e_tag: String,
}

/// Handle for an in-progress multipart upload.
#[derive(Debug, Clone, PartialEq)]
pub struct MultipartUpload {
    pub path: String,
    pub upload_id: String,
}

/// Join path segments with a single `/`, ignoring empty segments.
///
/// A leading `/` on the first segment is preserved.
pub fn join_path(segments: &[&str]) -> String {
    let absolute = segments.first().is_some_and(|s| s.starts_with('/'));
    let joined = segments
        .iter()
        .map(|s| s.trim_matches('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}
