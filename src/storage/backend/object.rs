//! Remote object storage backend using the object_store crate

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BlobMeta, BlobReader, Promotion};
use futures::TryStreamExt;
use object_store::path::Path as ObjectPath;
use object_store::{GetOptions, GetRange, ObjectStore, PutPayload, WriteMultipart};
use std::io;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};
use url::Url;

/// Files up to this size go up in one PUT; larger ones use multipart
const UPLOAD_PART_SIZE: usize = 8 * 1024 * 1024;

/// Parts in flight during a multipart upload
const UPLOAD_CONCURRENCY: usize = 4;

#[derive(Clone)]
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl std::fmt::Debug for ObjectStoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreBackend")
            .field("store", &self.store.to_string())
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl ObjectStoreBackend {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    /// Build from a URL such as `s3://bucket/path` or `memory:///`
    pub fn from_url(url: &str, prefix: &str) -> StorageResult<Self> {
        let parsed = Url::parse(url)
            .map_err(|e| StorageError::InvalidConfig(format!("{}: {}", url, e)))?;
        let (store, base) = object_store::parse_url(&parsed)
            .map_err(|e| StorageError::InvalidConfig(format!("{}: {}", url, e)))?;

        let prefix = [base.as_ref(), prefix.trim_matches('/')]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        Ok(Self::new(Arc::from(store), prefix))
    }

    fn key(&self, location: &str) -> ObjectPath {
        if self.prefix.is_empty() {
            ObjectPath::from(location)
        } else {
            ObjectPath::from(format!("{}/{}", self.prefix, location))
        }
    }

    pub async fn head(&self, location: &str) -> StorageResult<Option<BlobMeta>> {
        match self.store.head(&self.key(location)).await {
            Ok(meta) => Ok(Some(BlobMeta {
                size: meta.size as u64,
                last_modified: meta.last_modified,
            })),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Upload a staged file unless an object already exists at `location`
    pub async fn promote(&self, staged: NamedTempFile, location: &str) -> StorageResult<Promotion> {
        let key = self.key(location);
        if self.head(location).await?.is_some() {
            return Ok(Promotion::Deduplicated);
        }

        let mut file = tokio::fs::File::from_std(staged.reopen()?);
        let size = file.metadata().await?.len();

        if size <= UPLOAD_PART_SIZE as u64 {
            let mut data = Vec::with_capacity(size as usize);
            file.read_to_end(&mut data).await?;
            self.store.put(&key, PutPayload::from(data)).await?;
        } else {
            let upload = self.store.put_multipart(&key).await?;
            let mut writer = WriteMultipart::new_with_chunk_size(upload, UPLOAD_PART_SIZE);
            let mut buffer = vec![0u8; UPLOAD_PART_SIZE];

            let streamed = async {
                loop {
                    let n = file.read(&mut buffer).await?;
                    if n == 0 {
                        break;
                    }
                    writer.wait_for_capacity(UPLOAD_CONCURRENCY).await?;
                    writer.write(&buffer[..n]);
                }
                Ok::<(), StorageError>(())
            }
            .await;

            if let Err(e) = streamed {
                warn!("Multipart upload of {} failed: {}", key, e);
                if let Err(abort_err) = writer.abort().await {
                    warn!("Failed to abort multipart upload of {}: {}", key, abort_err);
                }
                return Err(e);
            }
            writer.finish().await?;
        }

        debug!("Uploaded {} bytes to {}", size, key);
        Ok(Promotion::Stored)
    }

    /// Stream `[start, end)` as the store delivers it
    pub async fn read_range(&self, location: &str, start: u64, end: u64) -> StorageResult<BlobReader> {
        if start == end {
            return Ok(Box::new(tokio::io::empty()));
        }
        let options = GetOptions {
            range: Some(GetRange::Bounded(start as usize..end as usize)),
            ..Default::default()
        };
        let result = self.store.get_opts(&self.key(location), options).await?;
        let body = result
            .into_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        Ok(Box::new(StreamReader::new(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use std::io::Write;

    fn staged_with(data: &[u8]) -> NamedTempFile {
        let mut staged = NamedTempFile::new().unwrap();
        staged.write_all(data).unwrap();
        staged.flush().unwrap();
        staged
    }

    #[tokio::test]
    async fn test_put_and_range_read() {
        let backend = ObjectStoreBackend::new(Arc::new(InMemory::new()), "repo");

        let outcome = backend
            .promote(staged_with(b"object payload"), "ab/cd/blob")
            .await
            .unwrap();
        assert_eq!(outcome, Promotion::Stored);
        assert_eq!(backend.head("ab/cd/blob").await.unwrap().unwrap().size, 14);

        let mut reader = backend.read_range("ab/cd/blob", 7, 14).await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"payload");
    }

    #[tokio::test]
    async fn test_existing_object_deduplicated() {
        let store = Arc::new(InMemory::new());
        let backend = ObjectStoreBackend::new(store.clone(), "");

        backend.promote(staged_with(b"one"), "blob").await.unwrap();
        let outcome = backend.promote(staged_with(b"one"), "blob").await.unwrap();
        assert_eq!(outcome, Promotion::Deduplicated);

        let listed = store.head(&ObjectPath::from("blob")).await.unwrap();
        assert_eq!(listed.size, 3);
    }

    #[tokio::test]
    async fn test_multipart_upload() {
        let backend = ObjectStoreBackend::new(Arc::new(InMemory::new()), "");
        let data: Vec<u8> = (0..UPLOAD_PART_SIZE + 1234).map(|i| (i % 253) as u8).collect();

        backend.promote(staged_with(&data), "big").await.unwrap();
        assert_eq!(
            backend.head("big").await.unwrap().unwrap().size,
            data.len() as u64
        );

        let mut reader = backend
            .read_range("big", UPLOAD_PART_SIZE as u64, data.len() as u64)
            .await
            .unwrap();
        let mut tail = Vec::new();
        reader.read_to_end(&mut tail).await.unwrap();
        assert_eq!(tail, &data[UPLOAD_PART_SIZE..]);
    }

    #[tokio::test]
    async fn test_from_memory_url() {
        let backend = ObjectStoreBackend::from_url("memory:///", "artifacts/").unwrap();
        assert_eq!(backend.key("x/y").as_ref(), "artifacts/x/y");
        assert!(backend.head("x/y").await.unwrap().is_none());
    }

    #[test]
    fn test_bad_url() {
        assert!(matches!(
            ObjectStoreBackend::from_url("not a url", ""),
            Err(StorageError::InvalidConfig(_))
        ));
    }
}
