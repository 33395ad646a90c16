//! Receiving side of a delta upload
//!
//! Serves block signatures of stored resources, rebuilds new versions from
//! a base plus an op stream, and accepts full uploads. Rebuilt content is
//! written to a store staging file and committed only once its SHA-256 and
//! size match what the uploader declared.

use crate::cache::{CacheError, CacheLayer, LocalBlob};
use crate::integrity::{ContentDigests, ContentHash};
use crate::metrics;
use crate::network::protocol::{DeltaSubmission, PeerResponse, ResponseStatus};
use crate::storage::{BlobReader, ByteRange, StagedBlob, StorageError, StoredBlob};
use crate::sync::{signature_to_bytes, DeltaReader, PatchApplier, PatchError, SignatureIndexer};
use bytes::Bytes;
use dashmap::DashMap;
use std::io::{self, BufReader, BufWriter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Unknown resource: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Rebuilt content does not match: expected sha256 {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("Patch failed: {0}")]
    Patch(PatchError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<PatchError> for ServiceError {
    fn from(err: PatchError) -> Self {
        match err {
            PatchError::IntegrityMismatch { expected, actual } => {
                ServiceError::IntegrityMismatch { expected, actual }
            }
            PatchError::SizeMismatch { expected, actual } => ServiceError::BadRequest(format!(
                "rebuilt size {actual} differs from declared {expected}"
            )),
            PatchError::BaseOutOfRange { .. } | PatchError::Wire(_) => {
                ServiceError::BadRequest(err.to_string())
            }
            PatchError::Io(_) => ServiceError::Patch(err),
        }
    }
}

impl ServiceError {
    pub fn to_response(&self) -> PeerResponse {
        let status = match self {
            ServiceError::NotFound(_) => ResponseStatus::NotFound,
            ServiceError::BadRequest(_) => ResponseStatus::BadRequest,
            ServiceError::IntegrityMismatch { expected, actual } => {
                ResponseStatus::IntegrityMismatch {
                    expected: expected.clone(),
                    actual: actual.clone(),
                }
            }
            ServiceError::Storage(e) if e.is_not_found() => ResponseStatus::NotFound,
            ServiceError::Cache(e) if e.is_not_found() => ResponseStatus::NotFound,
            ServiceError::Storage(StorageError::InvalidRange { .. }) => ResponseStatus::BadRequest,
            _ => ResponseStatus::Internal,
        };
        PeerResponse::error(status, self.to_string())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

pub struct PeerService {
    cache: Arc<CacheLayer>,
    /// Resource name to the hash of its current content
    resources: DashMap<String, ContentHash>,
    spool_dir: PathBuf,
}

impl PeerService {
    pub fn new(cache: Arc<CacheLayer>) -> Self {
        Self {
            cache,
            resources: DashMap::new(),
            spool_dir: std::env::temp_dir(),
        }
    }

    /// Directory for incoming op streams awaiting application
    pub fn with_spool_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spool_dir = dir.into();
        self
    }

    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    /// Point `resource` at stored content
    pub fn register(&self, resource: impl Into<String>, hash: ContentHash) {
        let resource = resource.into();
        debug!("Resource {} -> {}", resource, hash);
        self.resources.insert(resource, hash);
    }

    /// Resolve a resource name, or failing that a hex SHA-256
    pub fn resolve(&self, id: &str) -> ServiceResult<ContentHash> {
        if let Some(hash) = self.resources.get(id) {
            return Ok(*hash);
        }
        id.parse::<ContentHash>()
            .map_err(|_| ServiceError::NotFound(id.to_string()))
    }

    /// Block signatures of the current content of `resource`, wire encoded
    pub async fn signature(&self, resource: &str, block_size: u32) -> ServiceResult<Bytes> {
        if block_size == 0 {
            return Err(ServiceError::BadRequest("block size must be positive".into()));
        }
        let hash = self.resolve(resource)?;
        let local = self.cache.open_local(&hash).await?;
        let started = Instant::now();

        let (encoded, blocks) = run_blocking(move || {
            let file = local.open()?;
            let signature =
                SignatureIndexer::new(block_size as usize).index_reader(BufReader::new(file))?;
            Ok((signature_to_bytes(&signature), signature.len()))
        })
        .await?;

        metrics::record_signature_served(blocks);
        debug!(
            "Signed {} ({} blocks of {} bytes) in {:?}",
            resource,
            blocks,
            block_size,
            started.elapsed()
        );
        Ok(encoded)
    }

    /// Rebuild `resource` from the submitted base and the op stream in `body`
    pub async fn apply_delta<R>(
        &self,
        resource: &str,
        submission: &DeltaSubmission,
        mut body: R,
    ) -> ServiceResult<StoredBlob>
    where
        R: AsyncRead + Unpin,
    {
        if submission.block_size == 0 {
            return Err(ServiceError::BadRequest("block size must be positive".into()));
        }
        let started = Instant::now();
        let base_hash = self.resolve(&submission.base_id)?;
        let base = self.cache.open_local(&base_hash).await?;

        let spool = tempfile::Builder::new()
            .prefix("delta-")
            .tempfile_in(&self.spool_dir)?;
        let mut out = tokio::fs::File::from_std(spool.as_file().try_clone()?);
        let delta_bytes = tokio::io::copy(&mut body, &mut out).await?;
        out.flush().await?;
        drop(out);

        let staged = self.cache.store().stage()?;
        let applier = PatchApplier::new(submission.block_size as usize);
        let expected = submission.sha256;
        let expected_size = submission.size;

        let result = run_blocking(move || {
            apply_spooled(applier, &base, &spool, staged, &expected, expected_size)
        })
        .await;

        let (staged, digests) = match result {
            Ok(applied) => applied,
            Err(e) => {
                if matches!(e, ServiceError::IntegrityMismatch { .. }) {
                    metrics::record_integrity_failure();
                }
                warn!("Patch of {} against {} rejected: {}", resource, base_hash, e);
                return Err(e);
            }
        };

        let blob = self.cache.store().commit_staged(staged, &digests).await?;
        self.register(resource, blob.sha256);
        metrics::record_patch_applied(delta_bytes, blob.size);

        info!(
            "Patched {}: {} byte delta -> {} bytes ({}) in {:?}",
            resource,
            delta_bytes,
            blob.size,
            blob.sha256,
            started.elapsed()
        );
        Ok(blob)
    }

    /// Store `body` as the new content of `resource`
    pub async fn store_full<R>(&self, resource: &str, size: u64, body: R) -> ServiceResult<StoredBlob>
    where
        R: AsyncRead + Unpin,
    {
        let started = Instant::now();
        let store = self.cache.store();
        let (staged, digests) = store.spool(body).await?;
        if digests.size != size {
            // Dropping the staged file discards the short body
            return Err(ServiceError::BadRequest(format!(
                "received {} bytes, declared {}",
                digests.size, size
            )));
        }

        let blob = store.commit_staged(staged, &digests).await?;

        self.register(resource, blob.sha256);
        info!(
            "Stored {} in full: {} bytes ({}) in {:?}",
            resource,
            blob.size,
            blob.sha256,
            started.elapsed()
        );
        Ok(blob)
    }

    /// Stream (part of) the current content of `resource`
    pub async fn fetch(&self, resource: &str, range: ByteRange) -> ServiceResult<BlobReader> {
        let hash = self.resolve(resource)?;
        Ok(self.cache.get_range(&hash, range).await?)
    }

    /// Size of the current content of `resource`
    pub async fn size_of(&self, resource: &str) -> ServiceResult<u64> {
        let hash = self.resolve(resource)?;
        self.cache
            .store()
            .size_of(&hash)
            .await?
            .ok_or_else(|| ServiceError::NotFound(resource.to_string()))
    }
}

fn apply_spooled(
    applier: PatchApplier,
    base: &LocalBlob,
    spool: &NamedTempFile,
    mut staged: StagedBlob,
    expected: &ContentHash,
    expected_size: u64,
) -> ServiceResult<(StagedBlob, ContentDigests)> {
    let mut base_file = base.open()?;
    let ops = DeltaReader::new(BufReader::new(spool.reopen()?));

    let digests = {
        let mut out = BufWriter::new(staged.as_file_mut());
        let digests =
            applier.apply_verified(&mut base_file, ops, &mut out, expected, Some(expected_size))?;
        out.into_inner().map_err(|e| e.into_error())?.sync_data()?;
        digests
    };
    Ok((staged, digests))
}

async fn run_blocking<T, F>(f: F) -> ServiceResult<T>
where
    F: FnOnce() -> ServiceResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?
}

/// Drain a request body that the handler did not consume
pub(crate) async fn discard<R: AsyncRead + Unpin>(mut body: R) -> io::Result<u64> {
    let mut buffer = [0u8; 8192];
    let mut total = 0u64;
    loop {
        let n = body.read(&mut buffer).await?;
        if n == 0 {
            return Ok(total);
        }
        total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::integrity::IntegrityVerifier;
    use crate::storage::{ContentStore, StorageBackend};
    use crate::sync::{decode_signature, DeltaWriter, DiffEngine, DiffOp};
    use tempfile::TempDir;

    async fn service(dir: &TempDir) -> PeerService {
        let store = ContentStore::new(
            StorageBackend::filesystem(dir.path().join("blobs")),
            dir.path().join("staging"),
        )
        .await
        .unwrap();
        let cache = CacheLayer::new(
            Arc::new(store),
            CacheConfig {
                dir: dir.path().join("cache"),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        PeerService::new(Arc::new(cache)).with_spool_dir(dir.path())
    }

    fn encode(ops: &[DiffOp]) -> Vec<u8> {
        let mut writer = DeltaWriter::new(Vec::new());
        for op in ops {
            writer.write_op(op).unwrap();
        }
        writer.finish().unwrap()
    }

    fn submission(base_id: &str, target: &[u8], block_size: u32) -> DeltaSubmission {
        let digests = IntegrityVerifier::calculate_digests(target);
        DeltaSubmission {
            base_id: base_id.to_string(),
            block_size,
            sha256: digests.sha256,
            size: digests.size,
            headers: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_sign_and_patch() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir).await;
        let base = b"ABCDEFGHIJKL".repeat(100);
        service.store_full("app", base.len() as u64, &base[..]).await.unwrap();

        let encoded = service.signature("app", 64).await.unwrap();
        let signature = decode_signature(&mut &encoded[..]).unwrap();
        assert_eq!(signature.file_size(), base.len() as u64);

        let mut target = base.clone();
        target.splice(500..500, b"inserted".iter().copied());
        let diff = DiffEngine::new(64).diff(&target[..], &signature).unwrap();
        let body = encode(&diff.ops);

        let blob = service
            .apply_delta("app", &submission("app", &target, 64), &body[..])
            .await
            .unwrap();
        assert_eq!(blob.sha256, IntegrityVerifier::calculate_digests(&target).sha256);
        assert_eq!(service.resolve("app").unwrap(), blob.sha256);

        let mut stored = Vec::new();
        service
            .fetch("app", ByteRange::full())
            .await
            .unwrap()
            .read_to_end(&mut stored)
            .await
            .unwrap();
        assert_eq!(stored, target);
    }

    #[tokio::test]
    async fn test_integrity_mismatch_commits_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir).await;
        let base = b"original content".to_vec();
        let base_blob = service.store_full("doc", base.len() as u64, &base[..]).await.unwrap();

        // Ops rebuild something other than the declared target
        let body = encode(&[DiffOp::Data(b"tampered".to_vec())]);
        let err = service
            .apply_delta("doc", &submission("doc", b"expected", 16), &body[..])
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::IntegrityMismatch { .. }));
        assert!(matches!(
            err.to_response().status,
            ResponseStatus::IntegrityMismatch { .. }
        ));
        assert_eq!(service.resolve("doc").unwrap(), base_blob.sha256);
        let tampered = IntegrityVerifier::calculate_digests(b"tampered").sha256;
        assert!(!service.cache().store().exists(&tampered).await.unwrap());
    }

    #[tokio::test]
    async fn test_base_by_hash_and_unknown_base() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir).await;
        let base_blob = service.store_full("v1", 10, &b"0123456789"[..]).await.unwrap();

        let ops = [DiffOp::Copy {
            block_index: 0,
            length: 10,
        }];
        let blob = service
            .apply_delta(
                "v2",
                &submission(&base_blob.sha256.to_hex(), b"0123456789", 16),
                &encode(&ops)[..],
            )
            .await
            .unwrap();
        assert_eq!(blob.sha256, base_blob.sha256);

        let err = service
            .apply_delta("v3", &submission("missing", b"x", 16), &encode(&[])[..])
            .await
            .unwrap_err();
        assert_eq!(err.to_response().status, ResponseStatus::NotFound);
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir).await;
        service.store_full("small", 4, &b"tiny"[..]).await.unwrap();

        let err = service.signature("small", 0).await.unwrap_err();
        assert_eq!(err.to_response().status, ResponseStatus::BadRequest);

        let err = service.store_full("short", 100, &b"tiny"[..]).await.unwrap_err();
        assert!(matches!(err, ServiceError::BadRequest(_)));
        assert!(service.resolve("short").is_err());

        // Copy past the end of a 4 byte base
        let ops = [DiffOp::Copy {
            block_index: 3,
            length: 16,
        }];
        let err = service
            .apply_delta("small", &submission("small", b"x", 16), &encode(&ops)[..])
            .await
            .unwrap_err();
        assert_eq!(err.to_response().status, ResponseStatus::BadRequest);
    }

    #[tokio::test]
    async fn test_truncated_full_upload_commits_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(&temp_dir).await;
        let partial = b"the first few bytes of a larger file";

        let err = service
            .store_full("app", 4096, &partial[..])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::BadRequest(_)));

        let store = service.cache().store();
        let partial_hash = IntegrityVerifier::calculate_digests(partial).sha256;
        assert!(!store.exists(&partial_hash).await.unwrap());
        assert!(service.resolve("app").is_err());
        assert_eq!(
            std::fs::read_dir(temp_dir.path().join("staging")).unwrap().count(),
            0
        );
    }

    #[tokio::test]
    async fn test_discard_counts_bytes() {
        assert_eq!(discard(&b"leftover"[..]).await.unwrap(), 8);
    }
}
