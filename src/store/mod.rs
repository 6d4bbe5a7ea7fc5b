//! Versioned object store boundary.
//!
//! Memory files live behind the [`ObjectStore`] trait: an opaque
//! slash-delimited key space with read/write/list/delete plus version
//! history. The filesystem backend in [`fs`] is the default; any blob
//! store with the same contract can stand in.

pub mod fs;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

/// A stored memory file with its content.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryFile {
    pub path: String,
    pub content: String,
    /// RFC 3339 last-modified timestamp.
    pub updated_at: String,
    pub size: u64,
    /// Latest version id, when the backend versions this path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

/// A listing row. Synthetic directory rows have a path ending in `/`
/// and a size of zero.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectMeta {
    pub path: String,
    pub size: u64,
    pub updated_at: String,
}

impl ObjectMeta {
    pub fn is_directory(&self) -> bool {
        self.path.ends_with('/')
    }
}

/// One entry of a path's version history, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    pub version_id: String,
    pub timestamp: String,
    pub size: u64,
}

/// Receipt from a write.
#[derive(Debug, Clone, Serialize)]
pub struct WriteReceipt {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

/// Typed interface over a versioned blob store. Content is UTF-8 text.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read a file, or `None` if the path does not exist.
    async fn read(&self, path: &str) -> Result<Option<MemoryFile>>;

    /// Create or overwrite a file. Prior content is retained as a version
    /// when the backend supports versioning.
    async fn write(&self, path: &str, content: &str) -> Result<WriteReceipt>;

    /// List keys under a string prefix. When `recursive` is false, keys
    /// nested below the first `/` past the prefix collapse into synthetic
    /// directory rows, one per first-level sub-prefix.
    async fn list(&self, prefix: &str, recursive: bool) -> Result<Vec<ObjectMeta>>;

    /// Delete a file. Errors if the path does not exist. Version history
    /// is retained.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Version history for a path, newest first. Empty when the backend
    /// does not version.
    async fn get_versions(&self, path: &str, limit: usize) -> Result<Vec<VersionInfo>>;

    /// Content of one historical version, or `None` if unknown.
    async fn get_version(&self, path: &str, version_id: &str) -> Result<Option<String>>;
}
