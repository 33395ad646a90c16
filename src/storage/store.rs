//! Content-addressable blob store
//!
//! Bytes go in, a SHA-256 comes out. Writers spool into a staging file
//! while digesting, then the staging file is promoted to the location the
//! [`FileLocator`] derives from the digest. Identical content is stored once.

use crate::integrity::{ContentDigester, ContentDigests, ContentHash};
use crate::metrics;
use crate::storage::backend::StorageBackend;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::locator::{FileLocator, HashFileLocator};
use crate::storage::types::{BlobReader, ByteRange, Promotion, StoredBlob};
use chrono::Utc;
use dashmap::DashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info};

const STAGING_BUFFER_SIZE: usize = 64 * 1024;

/// A staging file owned by one writer
///
/// Dropping it without committing deletes the file.
#[derive(Debug)]
pub struct StagedBlob {
    file: NamedTempFile,
}

impl StagedBlob {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn as_file_mut(&mut self) -> &mut File {
        self.file.as_file_mut()
    }
}

pub struct ContentStore {
    backend: StorageBackend,
    locator: Arc<dyn FileLocator>,
    staging_dir: PathBuf,
    /// Advisory per-hash locks so concurrent writers of one hash promote once
    inflight: DashMap<ContentHash, Arc<Mutex<()>>>,
}

impl ContentStore {
    pub async fn new(backend: StorageBackend, staging_dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let staging_dir = staging_dir.into();
        tokio::fs::create_dir_all(&staging_dir).await?;

        info!(
            "Content store ready (backend: {}, staging: {})",
            backend.name(),
            staging_dir.display()
        );

        Ok(Self {
            backend,
            locator: Arc::new(HashFileLocator::default()),
            staging_dir,
            inflight: DashMap::new(),
        })
    }

    pub fn with_locator(mut self, locator: Arc<dyn FileLocator>) -> Self {
        self.locator = locator;
        self
    }

    pub fn backend(&self) -> &StorageBackend {
        &self.backend
    }

    pub fn location_of(&self, hash: &ContentHash) -> String {
        self.locator.locate(hash)
    }

    /// Store a stream, hashing it in the same pass
    pub async fn put<R: AsyncRead + Unpin>(&self, reader: R) -> StorageResult<StoredBlob> {
        let (staged, digests) = self.spool(reader).await?;
        self.commit_staged(staged, &digests).await
    }

    /// Copy a stream into a new staging file, digesting it on the way
    ///
    /// Nothing is committed; the caller decides whether to promote the result.
    pub async fn spool<R: AsyncRead + Unpin>(
        &self,
        mut reader: R,
    ) -> StorageResult<(StagedBlob, ContentDigests)> {
        let staged = self.stage()?;
        let mut out = tokio::fs::File::from_std(staged.file.as_file().try_clone()?);
        let mut digester = ContentDigester::new();
        let mut buffer = vec![0u8; STAGING_BUFFER_SIZE];

        loop {
            let n = reader.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            digester.update(&buffer[..n]);
            out.write_all(&buffer[..n]).await?;
        }
        out.flush().await?;
        out.sync_data().await?;
        drop(out);

        Ok((staged, digester.finalize()))
    }

    /// Open a fresh staging file for a writer that digests on its own
    pub fn stage(&self) -> StorageResult<StagedBlob> {
        let file = tempfile::Builder::new()
            .prefix("stage-")
            .tempfile_in(&self.staging_dir)?;
        Ok(StagedBlob { file })
    }

    /// Promote a staged file whose content has digests `digests`
    ///
    /// The caller vouches for the digests; they are not recomputed here.
    pub async fn commit_staged(&self, staged: StagedBlob, digests: &ContentDigests) -> StorageResult<StoredBlob> {
        let hash = digests.sha256;
        let location = self.location_of(&hash);

        let lock = self.inflight.entry(hash).or_default().clone();
        let (promotion, existing) = {
            let _guard = lock.lock().await;
            match self.backend.head(&location).await? {
                Some(existing) => {
                    drop(staged);
                    (Promotion::Deduplicated, Some(existing))
                }
                None => (self.backend.promote(staged.file, &location).await?, None),
            }
        };
        drop(lock);
        self.inflight
            .remove_if(&hash, |_, lock| Arc::strong_count(lock) == 1);

        // The stored object's own timestamp, so repeated puts agree
        let existing = match existing {
            Some(meta) => Some(meta),
            None => self.backend.head(&location).await?,
        };
        let created_at = existing
            .map(|meta| meta.last_modified)
            .unwrap_or_else(Utc::now);

        let deduplicated = promotion == Promotion::Deduplicated;
        metrics::record_blob_committed(deduplicated, digests.size);
        debug!(
            "Committed {} ({} bytes) at {}{}",
            hash,
            digests.size,
            location,
            if deduplicated { " [dedup]" } else { "" }
        );

        Ok(StoredBlob::new(digests, location, created_at))
    }

    /// Stream `range` of the blob with `hash`
    pub async fn get(&self, hash: &ContentHash, range: ByteRange) -> StorageResult<BlobReader> {
        let location = self.location_of(hash);
        let meta = self
            .backend
            .head(&location)
            .await?
            .ok_or_else(|| StorageError::NotFound(hash.to_hex()))?;
        let (start, end) = range.resolve(meta.size)?;
        self.backend.read_range(&location, start, end).await
    }

    pub async fn exists(&self, hash: &ContentHash) -> StorageResult<bool> {
        self.backend.exists(&self.location_of(hash)).await
    }

    pub async fn size_of(&self, hash: &ContentHash) -> StorageResult<Option<u64>> {
        Ok(self
            .backend
            .head(&self.location_of(hash))
            .await?
            .map(|meta| meta.size))
    }
}
