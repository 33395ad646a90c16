//! Local filesystem backend

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BlobMeta, BlobReader, Promotion};
use chrono::{DateTime, Utc};
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct FileSystemBackend {
    root: PathBuf,
}

impl FileSystemBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, location: &str) -> PathBuf {
        self.root.join(location)
    }

    pub async fn head(&self, location: &str) -> StorageResult<Option<BlobMeta>> {
        match tokio::fs::metadata(self.path_of(location)).await {
            Ok(meta) => {
                let last_modified = meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                Ok(Some(BlobMeta {
                    size: meta.len(),
                    last_modified,
                }))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Move a staged file to `location` without ever overwriting
    ///
    /// Racing writers of the same hash converge: the loser sees
    /// `AlreadyExists` and its staged copy is dropped.
    pub async fn promote(&self, staged: NamedTempFile, location: &str) -> StorageResult<Promotion> {
        let target = self.path_of(location);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::task::spawn_blocking(move || match staged.persist_noclobber(&target) {
            Ok(_) => {
                debug!("Promoted blob to {}", target.display());
                Ok(Promotion::Stored)
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(Promotion::Deduplicated),
            Err(e) => Err(StorageError::Io(e.error)),
        })
        .await
        .map_err(|e| StorageError::Backend(format!("promotion task failed: {}", e)))?
    }

    pub async fn read_range(&self, location: &str, start: u64, end: u64) -> StorageResult<BlobReader> {
        let mut file = match tokio::fs::File::open(self.path_of(location)).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(location.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        if start > 0 {
            file.seek(SeekFrom::Start(start)).await?;
        }
        Ok(Box::new(file.take(end - start)))
    }
}
