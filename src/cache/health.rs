//! Write probe for the cache volume

use crate::cache::error::{CacheError, CacheResult};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;

const PROBE_CHUNK_SIZE: usize = 64 * 1024;

/// Writes a zero-filled file of fixed size and deletes it again
#[derive(Debug, Clone)]
pub struct HealthProbe {
    dir: PathBuf,
    probe_size: u64,
    timeout: Duration,
}

impl HealthProbe {
    pub fn new(dir: impl Into<PathBuf>, probe_size: u64, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            probe_size,
            timeout,
        }
    }

    /// Run one probe, returning how long the write took
    ///
    /// The probe file is removed whether or not the write succeeded.
    pub async fn check(&self) -> CacheResult<Duration> {
        let path = self.dir.join(format!(".probe-{}", uuid::Uuid::new_v4()));
        let started = Instant::now();

        let result = tokio::time::timeout(self.timeout, self.write_probe(&path)).await;
        let _ = tokio::fs::remove_file(&path).await;

        match result {
            Ok(Ok(())) => Ok(started.elapsed()),
            Ok(Err(e)) => Err(CacheError::StorageDegraded(format!(
                "probe write to {} failed: {}",
                self.dir.display(),
                e
            ))),
            Err(_) => Err(CacheError::ProbeTimeout(self.timeout)),
        }
    }

    async fn write_probe(&self, path: &Path) -> std::io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;

        let zeros = vec![0u8; PROBE_CHUNK_SIZE];
        let mut remaining = self.probe_size;
        while remaining > 0 {
            let step = remaining.min(PROBE_CHUNK_SIZE as u64) as usize;
            file.write_all(&zeros[..step]).await?;
            remaining -= step as u64;
        }
        file.sync_data().await
    }
}

/// Whether a path is a probe or promotion leftover rather than a blob
pub(crate) fn is_scratch_file(name: &str) -> bool {
    name.starts_with(".probe-") || name.starts_with(".promote-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_probe_leaves_no_file() {
        let temp_dir = TempDir::new().unwrap();
        let probe = HealthProbe::new(temp_dir.path(), 200 * 1024, Duration::from_secs(5));

        probe.check().await.unwrap();
        assert!(std::fs::read_dir(temp_dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_probe_fails_on_missing_dir() {
        let temp_dir = TempDir::new().unwrap();
        let probe = HealthProbe::new(
            temp_dir.path().join("gone"),
            1024,
            Duration::from_secs(5),
        );

        assert!(matches!(
            probe.check().await,
            Err(CacheError::StorageDegraded(_))
        ));
    }

    #[test]
    fn test_scratch_names() {
        assert!(is_scratch_file(".probe-1234"));
        assert!(is_scratch_file(".promote-abcd"));
        assert!(!is_scratch_file("ba7816bf"));
    }
}
