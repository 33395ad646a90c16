//! Storage backends for the content store

pub mod filesystem;
pub mod object;

use crate::storage::error::StorageResult;
use crate::storage::types::{BackendConfig, BlobMeta, BlobReader, Promotion};
use object_store::memory::InMemory;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::NamedTempFile;

pub use filesystem::FileSystemBackend;
pub use object::ObjectStoreBackend;

/// Storage backend enum for unified access to local and remote storage
#[derive(Debug, Clone)]
pub enum StorageBackend {
    FileSystem(FileSystemBackend),
    ObjectStore(ObjectStoreBackend),
}

impl StorageBackend {
    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        StorageBackend::FileSystem(FileSystemBackend::new(root))
    }

    pub fn object_store(url: &str, prefix: &str) -> StorageResult<Self> {
        Ok(StorageBackend::ObjectStore(ObjectStoreBackend::from_url(
            url, prefix,
        )?))
    }

    /// Volatile in-process object store
    pub fn in_memory() -> Self {
        StorageBackend::ObjectStore(ObjectStoreBackend::new(Arc::new(InMemory::new()), ""))
    }

    pub fn from_config(config: &BackendConfig) -> StorageResult<Self> {
        match config {
            BackendConfig::Filesystem { root } => Ok(Self::filesystem(root.clone())),
            BackendConfig::ObjectStore { url, prefix } => Self::object_store(url, prefix),
        }
    }

    /// Get the name of this backend (for logging)
    pub fn name(&self) -> &'static str {
        match self {
            StorageBackend::FileSystem(_) => "filesystem",
            StorageBackend::ObjectStore(_) => "object_store",
        }
    }

    pub async fn head(&self, location: &str) -> StorageResult<Option<BlobMeta>> {
        match self {
            StorageBackend::FileSystem(b) => b.head(location).await,
            StorageBackend::ObjectStore(b) => b.head(location).await,
        }
    }

    pub async fn exists(&self, location: &str) -> StorageResult<bool> {
        Ok(self.head(location).await?.is_some())
    }

    /// Hand a fully written staging file over to the backend
    pub async fn promote(&self, staged: NamedTempFile, location: &str) -> StorageResult<Promotion> {
        match self {
            StorageBackend::FileSystem(b) => b.promote(staged, location).await,
            StorageBackend::ObjectStore(b) => b.promote(staged, location).await,
        }
    }

    /// Read `[start, end)` of the object at `location`
    pub async fn read_range(&self, location: &str, start: u64, end: u64) -> StorageResult<BlobReader> {
        match self {
            StorageBackend::FileSystem(b) => b.read_range(location, start, end).await,
            StorageBackend::ObjectStore(b) => b.read_range(location, start, end).await,
        }
    }
}
