//! Read-through cache over the content store
//!
//! Blobs are copied into a local directory on first read and evicted in LRU
//! order once the configured limits are exceeded. Entries are removed from
//! the index before their file is deleted, and any reader that fails to open
//! a cached file falls back to the store, so callers never observe a
//! half-present entry.

use crate::cache::error::{CacheError, CacheResult};
use crate::cache::health::{is_scratch_file, HealthProbe};
use crate::cache::types::{CacheConfig, CacheEntry, CacheStats, EvictionReport, LocalBlob};
use crate::integrity::ContentHash;
use crate::metrics;
use crate::storage::{BlobReader, ByteRange, ContentStore, FileLocator, HashFileLocator, StorageError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    admissions: AtomicU64,
    evictions: AtomicU64,
}

pub struct CacheLayer {
    store: Arc<ContentStore>,
    config: CacheConfig,
    locator: HashFileLocator,
    probe: HealthProbe,
    entries: DashMap<ContentHash, CacheEntry>,
    used_bytes: AtomicU64,
    degraded: AtomicBool,
    /// Held only by the eviction routine; reads and writes never take it
    eviction_lock: Mutex<()>,
    counters: Counters,
}

impl CacheLayer {
    /// Create the cache and rebuild its index from the cache directory
    pub async fn new(store: Arc<ContentStore>, config: CacheConfig) -> CacheResult<Self> {
        tokio::fs::create_dir_all(&config.dir).await?;
        let probe = HealthProbe::new(&config.dir, config.probe_size, config.probe_timeout);

        let layer = Self {
            store,
            locator: HashFileLocator::default(),
            probe,
            entries: DashMap::new(),
            used_bytes: AtomicU64::new(0),
            degraded: AtomicBool::new(false),
            eviction_lock: Mutex::new(()),
            counters: Counters::default(),
            config,
        };

        if layer.config.enabled {
            layer.rebuild_index().await?;
        }
        Ok(layer)
    }

    pub fn store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Suspend or resume admission of new entries
    pub fn set_degraded(&self, degraded: bool) {
        let was = self.degraded.swap(degraded, Ordering::AcqRel);
        if was != degraded {
            if degraded {
                warn!("Cache marked degraded, admission suspended");
            } else {
                info!("Cache recovered, admission resumed");
            }
            metrics::set_cache_degraded(degraded);
        }
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.entries.contains_key(hash)
    }

    /// Read a whole blob
    pub async fn get(&self, hash: &ContentHash) -> CacheResult<BlobReader> {
        self.get_range(hash, ByteRange::full()).await
    }

    /// Read part of a blob, populating the cache on a miss when admissible
    pub async fn get_range(&self, hash: &ContentHash, range: ByteRange) -> CacheResult<BlobReader> {
        if !self.config.enabled {
            return Ok(self.store.get(hash, range).await?);
        }

        if let Some((path, size)) = self.lookup(hash) {
            match open_range(&path, size, range).await {
                Ok(reader) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    metrics::record_cache_hit();
                    return Ok(reader);
                }
                Err(CacheError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("Cached file for {} vanished, reading from store", hash);
                    self.forget(hash);
                }
                Err(e) => return Err(e),
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_miss();

        let size = self
            .store
            .size_of(hash)
            .await?
            .ok_or_else(|| StorageError::NotFound(hash.to_hex()))?;

        if self.admissible(size) {
            match self.populate(hash, size).await {
                Ok(path) => match open_range(&path, size, range).await {
                    Ok(reader) => return Ok(reader),
                    Err(e) => debug!("Freshly cached {} unreadable: {}", hash, e),
                },
                Err(e) => warn!("Caching {} failed, serving from store: {}", hash, e),
            }
        }

        Ok(self.store.get(hash, range).await?)
    }

    /// A seekable local copy of a blob, for use as a patch base
    pub async fn open_local(&self, hash: &ContentHash) -> CacheResult<LocalBlob> {
        if self.config.enabled {
            if let Some((path, size)) = self.lookup(hash) {
                match tokio::fs::File::open(&path).await {
                    Ok(file) => {
                        self.counters.hits.fetch_add(1, Ordering::Relaxed);
                        metrics::record_cache_hit();
                        let file = file.into_std().await;
                        return Ok(LocalBlob::Cached { path, file, size });
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        self.forget(hash);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            metrics::record_cache_miss();
        }

        let size = self
            .store
            .size_of(hash)
            .await?
            .ok_or_else(|| StorageError::NotFound(hash.to_hex()))?;

        if self.config.enabled && self.admissible(size) {
            match self.populate(hash, size).await {
                Ok(path) => match tokio::fs::File::open(&path).await {
                    Ok(file) => {
                        let file = file.into_std().await;
                        return Ok(LocalBlob::Cached { path, file, size });
                    }
                    Err(e) => debug!("Freshly cached {} unreadable: {}", hash, e),
                },
                Err(e) => warn!("Caching {} failed, spilling to temp file: {}", hash, e),
            }
        }

        let file = NamedTempFile::new()?;
        let mut out = tokio::fs::File::from_std(file.as_file().try_clone()?);
        let mut reader = self.store.get(hash, ByteRange::full()).await?;
        tokio::io::copy(&mut reader, &mut out).await?;
        out.flush().await?;
        Ok(LocalBlob::Spilled { file, size })
    }

    fn admissible(&self, size: u64) -> bool {
        if self.is_degraded() {
            debug!("Cache degraded, skipping admission");
            return false;
        }
        size <= self.config.max_cacheable_size && size <= self.config.max_size_bytes
    }

    /// Copy a blob from the store into the cache directory and index it
    async fn populate(&self, hash: &ContentHash, size: u64) -> CacheResult<PathBuf> {
        let target = self.config.dir.join(self.locator.locate(hash));
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let scratch = tempfile::Builder::new()
            .prefix(".promote-")
            .tempfile_in(&self.config.dir)?;
        let mut out = tokio::fs::File::from_std(scratch.as_file().try_clone()?);
        let mut reader = self.store.get(hash, ByteRange::full()).await?;
        let copied = tokio::io::copy(&mut reader, &mut out).await?;
        out.flush().await?;
        drop(out);

        if copied != size {
            return Err(CacheError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("expected {} bytes for {}, copied {}", size, hash, copied),
            )));
        }

        let destination = target.clone();
        tokio::task::spawn_blocking(move || scratch.persist(&destination).map(|_| ()))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?
            .map_err(|e| e.error)?;

        self.admit(*hash, target.clone(), size);
        if self.over_limits() {
            self.evict().await?;
        }
        Ok(target)
    }

    fn admit(&self, hash: ContentHash, path: PathBuf, size: u64) {
        match self.entries.entry(hash) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().last_access = Instant::now();
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry {
                    hash,
                    local_path: path,
                    size,
                    last_access: Instant::now(),
                });
                self.used_bytes.fetch_add(size, Ordering::AcqRel);
                self.counters.admissions.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_admission(size);
            }
        }
        self.publish_usage();
    }

    fn lookup(&self, hash: &ContentHash) -> Option<(PathBuf, u64)> {
        self.entries.get_mut(hash).map(|mut entry| {
            entry.last_access = Instant::now();
            (entry.local_path.clone(), entry.size)
        })
    }

    fn forget(&self, hash: &ContentHash) -> Option<CacheEntry> {
        let (_, entry) = self.entries.remove(hash)?;
        self.used_bytes.fetch_sub(entry.size, Ordering::AcqRel);
        self.publish_usage();
        Some(entry)
    }

    fn over_limits(&self) -> bool {
        self.used_bytes.load(Ordering::Acquire) > self.config.max_size_bytes
            || self.entries.len() > self.config.max_entries
    }

    /// Evict least recently used entries until usage is under the low watermark
    ///
    /// Only one pass runs at a time; a concurrent call returns immediately
    /// with `skipped` set.
    pub async fn evict(&self) -> CacheResult<EvictionReport> {
        let Ok(_guard) = self.eviction_lock.try_lock() else {
            debug!("Eviction already in progress");
            return Ok(EvictionReport {
                skipped: true,
                ..Default::default()
            });
        };

        if !self.over_limits() {
            return Ok(EvictionReport::default());
        }

        let target_bytes = (self.config.max_size_bytes as f64 * self.config.low_watermark) as u64;
        let target_entries = (self.config.max_entries as f64 * self.config.low_watermark) as usize;

        let mut candidates: Vec<(Instant, ContentHash)> = self
            .entries
            .iter()
            .map(|entry| (entry.last_access, entry.hash))
            .collect();
        candidates.sort_unstable();

        let mut report = EvictionReport::default();
        for (_, hash) in candidates {
            if self.used_bytes.load(Ordering::Acquire) <= target_bytes
                && self.entries.len() <= target_entries
            {
                break;
            }

            let Some(entry) = self.forget(&hash) else {
                continue;
            };
            match tokio::fs::remove_file(&entry.local_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(
                    "Failed to delete evicted file {}: {}",
                    entry.local_path.display(),
                    e
                ),
            }
            report.evicted += 1;
            report.freed_bytes += entry.size;
        }

        self.counters
            .evictions
            .fetch_add(report.evicted as u64, Ordering::Relaxed);
        metrics::record_cache_eviction(report.evicted, report.freed_bytes);
        info!(
            "Evicted {} cache entries ({} bytes), {} remaining",
            report.evicted,
            report.freed_bytes,
            self.entries.len()
        );
        Ok(report)
    }

    /// Probe the cache volume and update the degraded flag
    pub async fn check_health(&self) -> CacheResult<Duration> {
        match self.probe.check().await {
            Ok(elapsed) => {
                self.set_degraded(false);
                Ok(elapsed)
            }
            Err(e) => {
                warn!("Cache health probe failed: {}", e);
                self.set_degraded(true);
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            used_bytes: self.used_bytes.load(Ordering::Acquire),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            admissions: self.counters.admissions.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            degraded: self.is_degraded(),
        }
    }

    fn publish_usage(&self) {
        metrics::set_cache_usage(self.used_bytes.load(Ordering::Acquire), self.entries.len());
    }

    /// Scan the cache directory and index every blob file found
    async fn rebuild_index(&self) -> CacheResult<()> {
        let dir = self.config.dir.clone();
        let found = tokio::task::spawn_blocking(move || scan_cache_dir(&dir))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        let now = Instant::now();
        let wall_now = SystemTime::now();
        let mut bytes = 0u64;
        for (hash, path, size, modified) in found {
            let age = wall_now.duration_since(modified).unwrap_or_default();
            self.entries.insert(
                hash,
                CacheEntry {
                    hash,
                    local_path: path,
                    size,
                    last_access: now.checked_sub(age).unwrap_or(now),
                },
            );
            bytes += size;
        }
        self.used_bytes.store(bytes, Ordering::Release);
        self.publish_usage();

        info!(
            "Cache index rebuilt: {} entries, {} bytes in {}",
            self.entries.len(),
            bytes,
            self.config.dir.display()
        );
        Ok(())
    }

    /// Start periodic eviction and health probing
    pub fn spawn_maintenance(self: &Arc<Self>) -> CacheMaintenance {
        let evictor = {
            let layer = Arc::clone(self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(layer.config.eviction_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if let Err(e) = layer.evict().await {
                        warn!("Cache eviction failed: {}", e);
                    }
                }
            })
        };

        let prober = {
            let layer = Arc::clone(self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(layer.config.probe_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if let Err(e) = layer.check_health().await {
                        debug!("Cache health check failed: {}", e);
                    }
                }
            })
        };

        CacheMaintenance {
            tasks: vec![evictor, prober],
        }
    }
}

/// Handles of the background maintenance tasks; aborts them on drop
pub struct CacheMaintenance {
    tasks: Vec<JoinHandle<()>>,
}

impl CacheMaintenance {
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for CacheMaintenance {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn open_range(path: &Path, size: u64, range: ByteRange) -> CacheResult<BlobReader> {
    let (start, end) = range.resolve(size)?;
    let mut file = tokio::fs::File::open(path).await?;
    if start > 0 {
        file.seek(SeekFrom::Start(start)).await?;
    }
    Ok(Box::new(file.take(end - start)))
}

fn scan_cache_dir(dir: &Path) -> Vec<(ContentHash, PathBuf, u64, SystemTime)> {
    let mut found = Vec::new();
    for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if is_scratch_file(&name) {
            if let Err(e) = std::fs::remove_file(entry.path()) {
                debug!("Could not remove leftover {}: {}", entry.path().display(), e);
            }
            continue;
        }
        let Ok(hash) = name.parse::<ContentHash>() else {
            continue;
        };
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let modified = meta
            .accessed()
            .or_else(|_| meta.modified())
            .unwrap_or_else(|_| SystemTime::now());
        found.push((hash, entry.path().to_path_buf(), meta.len(), modified));
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageBackend;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        cache_dir: PathBuf,
        store: Arc<ContentStore>,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::new(
            StorageBackend::filesystem(dir.path().join("blobs")),
            dir.path().join("staging"),
        )
        .await
        .unwrap();
        Fixture {
            cache_dir: dir.path().join("cache"),
            _dir: dir,
            store: Arc::new(store),
        }
    }

    fn config(fixture: &Fixture) -> CacheConfig {
        CacheConfig {
            dir: fixture.cache_dir.clone(),
            max_cacheable_size: 1024,
            max_size_bytes: 4096,
            max_entries: 100,
            low_watermark: 0.5,
            probe_size: 4096,
            ..CacheConfig::default()
        }
    }

    async fn read_all(mut reader: BlobReader) -> Vec<u8> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let fx = fixture().await;
        let blob = fx.store.put(&b"cached content"[..]).await.unwrap();
        let cache = CacheLayer::new(fx.store.clone(), config(&fx)).await.unwrap();

        let first = read_all(cache.get(&blob.sha256).await.unwrap()).await;
        assert_eq!(first, b"cached content");
        assert!(cache.contains(&blob.sha256));

        let second = read_all(cache.get_range(&blob.sha256, ByteRange::new(7, 14)).await.unwrap()).await;
        assert_eq!(second, b"content");

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.used_bytes, 14);
    }

    #[tokio::test]
    async fn test_large_blob_not_admitted() {
        let fx = fixture().await;
        let data = vec![1u8; 2048];
        let blob = fx.store.put(&data[..]).await.unwrap();
        let cache = CacheLayer::new(fx.store.clone(), config(&fx)).await.unwrap();

        let content = read_all(cache.get(&blob.sha256).await.unwrap()).await;
        assert_eq!(content, data);
        assert!(!cache.contains(&blob.sha256));
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_degraded_skips_admission() {
        let fx = fixture().await;
        let blob = fx.store.put(&b"small"[..]).await.unwrap();
        let cache = CacheLayer::new(fx.store.clone(), config(&fx)).await.unwrap();

        cache.set_degraded(true);
        let content = read_all(cache.get(&blob.sha256).await.unwrap()).await;
        assert_eq!(content, b"small");
        assert!(!cache.contains(&blob.sha256));

        cache.set_degraded(false);
        cache.get(&blob.sha256).await.unwrap();
        assert!(cache.contains(&blob.sha256));
    }

    #[tokio::test]
    async fn test_lru_eviction_order() {
        let fx = fixture().await;
        let cache = CacheLayer::new(
            fx.store.clone(),
            CacheConfig {
                max_size_bytes: u64::MAX,
                max_entries: 4,
                ..config(&fx)
            },
        )
        .await
        .unwrap();

        let mut hashes = Vec::new();
        for i in 0..4u8 {
            let blob = fx.store.put(&[i; 100][..]).await.unwrap();
            cache.get(&blob.sha256).await.unwrap();
            hashes.push(blob.sha256);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // Touch the oldest so the second-oldest becomes LRU
        cache.get(&hashes[0]).await.unwrap();

        let extra = fx.store.put(&[9u8; 100][..]).await.unwrap();
        cache.get(&extra.sha256).await.unwrap();

        // 5 entries > 4: evicted down to 2 (low watermark 0.5)
        assert_eq!(cache.stats().entries, 2);
        assert!(cache.contains(&hashes[0]));
        assert!(cache.contains(&extra.sha256));
        assert!(!cache.contains(&hashes[1]));

        // Evicted blobs are still served from the store
        let content = read_all(cache.get(&hashes[1]).await.unwrap()).await;
        assert_eq!(content, vec![1u8; 100]);
    }

    #[tokio::test]
    async fn test_eviction_is_single_flight() {
        let fx = fixture().await;
        let cache = CacheLayer::new(fx.store.clone(), config(&fx)).await.unwrap();

        let guard = cache.eviction_lock.lock().await;
        let report = cache.evict().await.unwrap();
        assert!(report.skipped);
        drop(guard);

        let report = cache.evict().await.unwrap();
        assert!(!report.skipped);
    }

    #[tokio::test]
    async fn test_vanished_file_falls_back_to_store() {
        let fx = fixture().await;
        let blob = fx.store.put(&b"will vanish"[..]).await.unwrap();
        let cache = CacheLayer::new(fx.store.clone(), config(&fx)).await.unwrap();

        cache.get(&blob.sha256).await.unwrap();
        let path = cache.config().dir.join(HashFileLocator::default().locate(&blob.sha256));
        std::fs::remove_file(&path).unwrap();

        let content = read_all(cache.get(&blob.sha256).await.unwrap()).await;
        assert_eq!(content, b"will vanish");
    }

    #[tokio::test]
    async fn test_index_rebuilt_on_restart() {
        let fx = fixture().await;
        let blob = fx.store.put(&b"persisted in cache"[..]).await.unwrap();
        {
            let cache = CacheLayer::new(fx.store.clone(), config(&fx)).await.unwrap();
            cache.get(&blob.sha256).await.unwrap();
        }
        std::fs::write(fx.cache_dir.join(".promote-leftover"), b"junk").unwrap();

        let cache = CacheLayer::new(fx.store.clone(), config(&fx)).await.unwrap();
        assert!(cache.contains(&blob.sha256));
        assert_eq!(cache.stats().used_bytes, 18);
        assert!(!fx.cache_dir.join(".promote-leftover").exists());
    }

    #[tokio::test]
    async fn test_open_local_cached_and_spilled() {
        let fx = fixture().await;
        let small = fx.store.put(&b"small base"[..]).await.unwrap();
        let large_data = vec![3u8; 4000];
        let large = fx.store.put(&large_data[..]).await.unwrap();
        let cache = CacheLayer::new(fx.store.clone(), config(&fx)).await.unwrap();

        let local = cache.open_local(&small.sha256).await.unwrap();
        assert!(matches!(local, LocalBlob::Cached { size: 10, .. }));
        assert_eq!(std::fs::read(local.path()).unwrap(), b"small base");

        let spilled = cache.open_local(&large.sha256).await.unwrap();
        let spill_path = spilled.path().to_path_buf();
        assert!(matches!(spilled, LocalBlob::Spilled { size: 4000, .. }));
        assert_eq!(std::fs::read(&spill_path).unwrap(), large_data);
        drop(spilled);
        assert!(!spill_path.exists());

        let missing = crate::integrity::IntegrityVerifier::calculate_digests(b"nope").sha256;
        assert!(cache.open_local(&missing).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_health_check_toggles_degraded() {
        let fx = fixture().await;
        let cache = CacheLayer::new(fx.store.clone(), config(&fx)).await.unwrap();

        cache.check_health().await.unwrap();
        assert!(!cache.is_degraded());

        std::fs::remove_dir_all(&fx.cache_dir).unwrap();
        assert!(cache.check_health().await.is_err());
        assert!(cache.is_degraded());

        std::fs::create_dir_all(&fx.cache_dir).unwrap();
        cache.check_health().await.unwrap();
        assert!(!cache.is_degraded());
    }

    #[tokio::test]
    async fn test_maintenance_marks_unwritable_cache_degraded() {
        let fx = fixture().await;
        let cache = Arc::new(
            CacheLayer::new(
                fx.store.clone(),
                CacheConfig {
                    probe_interval: Duration::from_millis(20),
                    ..config(&fx)
                },
            )
            .await
            .unwrap(),
        );
        let maintenance = cache.spawn_maintenance();

        std::fs::remove_dir_all(&fx.cache_dir).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cache.is_degraded() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        std::fs::create_dir_all(&fx.cache_dir).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while cache.is_degraded() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        maintenance.shutdown();
    }

    #[tokio::test]
    async fn test_disabled_cache_passes_through() {
        let fx = fixture().await;
        let blob = fx.store.put(&b"direct"[..]).await.unwrap();
        let cache = CacheLayer::new(
            fx.store.clone(),
            CacheConfig {
                enabled: false,
                ..config(&fx)
            },
        )
        .await
        .unwrap();

        let content = read_all(cache.get(&blob.sha256).await.unwrap()).await;
        assert_eq!(content, b"direct");
        assert_eq!(cache.stats(), CacheStats::default());
    }
}
