//! Checksum-derived placement of test files.
//!
//! Every test file lands in a directory computed from its SHA-256 digest,
//! seven levels below the runner's base directory.

use anyhow::{Result, anyhow};

use crate::types::error::S3monError;

/// Number of checksum bytes that become a directory level.
pub const DIRECTORY_DEPTH: usize = 7;

/// Number of distinct directories on each of the first three levels.
const TOP_LEVEL_FANOUT: i8 = 3;

/// Derives the directory of a test file from its checksum.
///
/// The same checksum always maps to the same directory, so directories are
/// reused across iterations and can be pruned bottom up. The first three
/// levels have a fan-out of 3, the remaining four a fan-out of 16.
///
/// ```
/// use s3mon_rs::path::PathGenerator;
///
/// let checksum = hex::decode("85a23692b73fc9f14a92d8530efbb92024ffaae01a88854a4e71acee641ade92").unwrap();
/// let generator = PathGenerator::new("/user/stor/files");
/// assert_eq!(generator.generate(&checksum).unwrap(), "/user/stor/files/0/1/0/9/b/3/c/");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathGenerator {
    root: String,
}

impl PathGenerator {
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Directory (ending with `/`) for a file with the given checksum.
    pub fn generate(&self, checksum: &[u8]) -> Result<String> {
        if checksum.len() < DIRECTORY_DEPTH {
            return Err(anyhow!(S3monError::InvalidArgument(format!(
                "checksum must be at least {DIRECTORY_DEPTH} bytes, got {}",
                checksum.len()
            ))));
        }

        let mut path = self.root.trim_end_matches('/').to_string();
        path.push('/');
        for (i, byte) in checksum.iter().take(DIRECTORY_DEPTH).enumerate() {
            if i < 3 {
                let level = ((*byte as i8) % TOP_LEVEL_FANOUT).unsigned_abs();
                path.push(char::from(b'0' + level));
            } else {
                path.push_str(&format!("{:x}", byte >> 4));
            }
            path.push('/');
        }

        Ok(path)
    }

    /// The directories `generate` creates below the root, deepest first.
    pub fn created_directories(&self, directory: &str) -> Vec<String> {
        let root = format!("{}/", self.root.trim_end_matches('/'));
        let Some(relative) = directory.strip_prefix(&root) else {
            return Vec::new();
        };

        let mut current = root;
        let mut directories = Vec::new();
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            current.push_str(segment);
            current.push('/');
            directories.push(current.clone());
        }
        directories.reverse();
        directories
    }
}
