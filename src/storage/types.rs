use crate::integrity::{ContentDigests, ContentHash};
use crate::storage::error::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncRead;

/// Streaming handle on (part of) a stored blob
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// A blob committed to the content store
///
/// Write-once and unique per `sha256`; storing identical bytes again yields
/// the same location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBlob {
    pub sha256: ContentHash,
    /// Hex-encoded MD5
    pub md5: String,
    pub size: u64,
    /// Backend-relative location derived from the hash
    pub location: String,
    pub created_at: DateTime<Utc>,
}

impl StoredBlob {
    pub fn new(digests: &ContentDigests, location: String, created_at: DateTime<Utc>) -> Self {
        Self {
            sha256: digests.sha256,
            md5: digests.md5_hex(),
            size: digests.size,
            location,
            created_at,
        }
    }
}

/// Byte range of a blob, end exclusive; `end: None` reads to the end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn full() -> Self {
        Self::default()
    }

    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    pub fn starting_at(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Resolve against a blob size into concrete `(start, end)` offsets
    pub fn resolve(&self, size: u64) -> StorageResult<(u64, u64)> {
        let end = self.end.unwrap_or(size);
        if self.start > end || end > size {
            return Err(StorageError::InvalidRange {
                start: self.start,
                end: self.end,
                size,
            });
        }
        Ok((self.start, end))
    }
}

/// Size and modification time of a stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobMeta {
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// What happened when a staged file was handed to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Promotion {
    /// New content, now stored at its location
    Stored,
    /// Identical content already existed; the staged copy was discarded
    Deduplicated,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    Filesystem {
        root: PathBuf,
    },
    ObjectStore {
        /// Any URL `object_store::parse_url` understands, e.g. `s3://bucket`
        /// or `memory:///`
        url: String,
        #[serde(default)]
        prefix: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendConfig,
    /// Where uploads are spooled before promotion
    pub staging_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::Filesystem {
                root: PathBuf::from("./data/blobs"),
            },
            staging_dir: PathBuf::from("./data/staging"),
        }
    }
}
