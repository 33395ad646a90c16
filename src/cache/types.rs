use crate::integrity::ContentHash;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false, reads go straight to the content store
    pub enabled: bool,
    pub dir: PathBuf,
    /// Blobs larger than this are never admitted
    pub max_cacheable_size: u64,
    pub max_size_bytes: u64,
    pub max_entries: usize,
    /// Eviction stops once usage is below this fraction of the limits
    pub low_watermark: f64,
    #[serde(rename = "eviction_interval_ms", with = "crate::config::duration_ms")]
    pub eviction_interval: Duration,
    /// Bytes written by each health probe
    pub probe_size: u64,
    #[serde(rename = "probe_interval_ms", with = "crate::config::duration_ms")]
    pub probe_interval: Duration,
    #[serde(rename = "probe_timeout_ms", with = "crate::config::duration_ms")]
    pub probe_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("./data/cache"),
            max_cacheable_size: 1024 * 1024 * 1024,
            max_size_bytes: 10 * 1024 * 1024 * 1024,
            max_entries: 100_000,
            low_watermark: 0.9,
            eviction_interval: Duration::from_secs(60),
            probe_size: 1024 * 1024,
            probe_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// A blob copied into the cache directory
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub hash: ContentHash,
    pub local_path: PathBuf,
    pub size: u64,
    pub last_access: Instant,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub entries: usize,
    pub used_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub admissions: u64,
    pub evictions: u64,
    pub degraded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Another eviction pass was already running
    pub skipped: bool,
    pub evicted: usize,
    pub freed_bytes: u64,
}

/// A blob available as a local, seekable file
///
/// Cached blobs hold an open handle, so eviction of the entry after this was
/// handed out does not affect readers.
#[derive(Debug)]
pub enum LocalBlob {
    /// Served from the cache directory
    Cached { path: PathBuf, file: File, size: u64 },
    /// Copied to a temporary file that is removed on drop
    Spilled { file: NamedTempFile, size: u64 },
}

impl LocalBlob {
    pub fn path(&self) -> &Path {
        match self {
            LocalBlob::Cached { path, .. } => path,
            LocalBlob::Spilled { file, .. } => file.path(),
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            LocalBlob::Cached { size, .. } | LocalBlob::Spilled { size, .. } => *size,
        }
    }

    /// A handle positioned at the start of the blob
    pub fn open(&self) -> io::Result<File> {
        let mut file = match self {
            LocalBlob::Cached { file, .. } => file.try_clone()?,
            LocalBlob::Spilled { file, .. } => file.reopen()?,
        };
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    }
}
