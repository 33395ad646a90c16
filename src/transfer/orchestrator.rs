//! Client-side delta upload flow
//!
//! Sign, diff, decide by hit rate, then patch or fall back to a full upload.
//! The diff is written to a temporary file that is deleted on every exit
//! path when its handle drops.

use crate::metrics;
use crate::network::{DeltaSubmission, NetworkError, PeerEndpoint};
use crate::storage::StoredBlob;
use crate::sync::{DeltaWriter, DiffEngine, DiffSummary, SignatureSet};
use crate::transfer::error::{TransferError, TransferResult};
use crate::transfer::peer::DeltaPeer;
use crate::transfer::state_machine::UploadStateMachine;
use crate::transfer::types::{
    DeltaConfig, FallbackReason, UploadEvent, UploadOutcome, UploadRequest, UploadRoute,
};
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// A delta written to disk, removed when dropped
struct DeltaFile {
    file: NamedTempFile,
    summary: DiffSummary,
    encoded_len: u64,
}

pub struct TransferOrchestrator<P> {
    peer: P,
    config: DeltaConfig,
}

impl<P: DeltaPeer> TransferOrchestrator<P> {
    pub fn new(peer: P, config: DeltaConfig) -> Self {
        Self { peer, config }
    }

    pub fn peer(&self) -> &P {
        &self.peer
    }

    pub fn config(&self) -> &DeltaConfig {
        &self.config
    }

    /// Run one upload to completion
    pub async fn upload(&self, request: &UploadRequest) -> TransferResult<UploadOutcome> {
        self.upload_with(request, &UploadStateMachine::new()).await
    }

    /// Run one upload, reporting progress through `machine`
    pub async fn upload_with(
        &self,
        request: &UploadRequest,
        machine: &UploadStateMachine,
    ) -> TransferResult<UploadOutcome> {
        let started = Instant::now();
        let content_size = tokio::fs::metadata(&request.content).await?.len();
        let block_size = u32::try_from(self.config.block_size)
            .ok()
            .filter(|bs| *bs > 0)
            .ok_or_else(|| {
                TransferError::Configuration(format!("invalid block size {}", self.config.block_size))
            })?;
        metrics::record_upload_started();
        machine.transition(UploadEvent::Begin)?;

        info!(
            "Uploading {} ({} bytes) to {} against base {}",
            request.content.display(),
            content_size,
            request.delta_endpoint,
            request.old_file_identifier
        );

        // SIGN
        let sign_started = Instant::now();
        let signature = match self
            .peer
            .fetch_signature(&request.sign_endpoint, block_size, &request.headers)
            .await
        {
            Ok(signature) => signature,
            Err(e) => {
                return self
                    .fall_back(
                        request,
                        machine,
                        Fallback {
                            reason: FallbackReason::SignFailed(e.to_string()),
                            cause: TransferError::SignRequestFailed(e.to_string()),
                            hit_rate: None,
                        },
                        content_size,
                        started,
                    )
                    .await;
            }
        };
        info!(
            "Received {} block signatures for {} byte base in {:?}",
            signature.len(),
            signature.file_size(),
            sign_started.elapsed()
        );
        machine.transition(UploadEvent::SignatureReceived {
            blocks: signature.len(),
        })?;

        // DIFF
        let diff_started = Instant::now();
        let delta = match self.compute_delta(&request.content, signature).await {
            Ok(delta) => delta,
            Err(e) => {
                return self
                    .fall_back(
                        request,
                        machine,
                        Fallback {
                            reason: FallbackReason::DiffFailed(e.to_string()),
                            cause: TransferError::DiffFailed(e.to_string()),
                            hit_rate: None,
                        },
                        content_size,
                        started,
                    )
                    .await;
            }
        };
        let hit_rate = delta.summary.hit_rate();
        let diff_elapsed = diff_started.elapsed();
        info!(
            "{} ({} byte delta) in {:?}, {:.1} MB/s",
            delta.summary,
            delta.encoded_len,
            diff_elapsed,
            throughput_mb_s(content_size, diff_elapsed.as_secs_f64())
        );
        metrics::record_diff(hit_rate, diff_elapsed);
        machine.transition(UploadEvent::DiffComputed { hit_rate })?;

        // THRESHOLD_CHECK
        if hit_rate < self.config.reuse_threshold {
            info!(
                "Hit rate {:.3} below threshold {:.3}, using full upload",
                hit_rate, self.config.reuse_threshold
            );
            drop(delta);
            let reason = FallbackReason::BelowThreshold {
                hit_rate,
                threshold: self.config.reuse_threshold,
            };
            return self
                .fall_back(
                    request,
                    machine,
                    Fallback {
                        cause: TransferError::Configuration(format!(
                            "{reason} and no fallback endpoint is configured"
                        )),
                        reason,
                        hit_rate: Some(hit_rate),
                    },
                    content_size,
                    started,
                )
                .await;
        }
        machine.transition(UploadEvent::ThresholdMet)?;

        // PATCH
        let submission = DeltaSubmission {
            base_id: request.old_file_identifier.clone(),
            block_size,
            sha256: delta.summary.target.sha256,
            size: delta.summary.target.size,
            headers: request.headers.clone(),
        };
        let patch_started = Instant::now();
        let patched = self
            .peer
            .submit_delta(&request.delta_endpoint, &submission, delta.file.path())
            .await;
        let bytes_sent = delta.encoded_len;
        drop(delta);

        match patched {
            Ok(blob) => {
                machine.transition(UploadEvent::PatchAccepted)?;
                info!(
                    "Delta upload to {} accepted: {} bytes sent for {} byte file in {:?}",
                    request.delta_endpoint,
                    bytes_sent,
                    content_size,
                    patch_started.elapsed()
                );
                Ok(self.finish(
                    machine,
                    UploadRoute::Delta,
                    None,
                    Some(hit_rate),
                    bytes_sent,
                    content_size,
                    blob,
                    started,
                ))
            }
            Err(NetworkError::IntegrityRejected { expected, actual }) => {
                Err(self.fail(machine, TransferError::IntegrityMismatch { expected, actual }))
            }
            Err(e) => {
                self.fall_back(
                    request,
                    machine,
                    Fallback {
                        reason: FallbackReason::PatchFailed(e.to_string()),
                        cause: TransferError::PatchRequestFailed(e.to_string()),
                        hit_rate: Some(hit_rate),
                    },
                    content_size,
                    started,
                )
                .await
            }
        }
    }

    /// Diff `content` against `signature` into a temporary delta file
    async fn compute_delta(&self, content: &Path, signature: SignatureSet) -> io::Result<DeltaFile> {
        let engine =
            DiffEngine::new(self.config.block_size).max_literal_run(self.config.max_literal_run);
        let content = content.to_path_buf();
        let temp_dir = self.config.temp_dir.clone();

        tokio::task::spawn_blocking(move || write_delta(engine, &content, &signature, temp_dir))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?
    }

    /// Take the full-upload route once, or give up with `fallback.cause`
    async fn fall_back(
        &self,
        request: &UploadRequest,
        machine: &UploadStateMachine,
        fallback: Fallback,
        content_size: u64,
        started: Instant,
    ) -> TransferResult<UploadOutcome> {
        let Some(endpoint) = &request.fallback_endpoint else {
            warn!("No fallback endpoint: {}", fallback.reason);
            return Err(self.fail(machine, fallback.cause));
        };

        warn!("Falling back to full upload to {}: {}", endpoint, fallback.reason);
        metrics::record_fallback(&fallback.reason);
        machine.transition(UploadEvent::FallBack {
            reason: fallback.reason.clone(),
        })?;

        match self.full_upload(endpoint, request, content_size).await {
            Ok(blob) => {
                machine.transition(UploadEvent::FullUploadAccepted)?;
                Ok(self.finish(
                    machine,
                    UploadRoute::Full,
                    Some(fallback.reason),
                    fallback.hit_rate,
                    content_size,
                    content_size,
                    blob,
                    started,
                ))
            }
            Err(NetworkError::IntegrityRejected { expected, actual }) => {
                Err(self.fail(machine, TransferError::IntegrityMismatch { expected, actual }))
            }
            Err(e) => Err(self.fail(machine, TransferError::FullUploadFailed(e.to_string()))),
        }
    }

    async fn full_upload(
        &self,
        endpoint: &PeerEndpoint,
        request: &UploadRequest,
        content_size: u64,
    ) -> Result<StoredBlob, NetworkError> {
        let upload_started = Instant::now();
        let blob = self
            .peer
            .upload_full(endpoint, &request.content, content_size, &request.headers)
            .await?;
        let elapsed = upload_started.elapsed();
        info!(
            "Full upload to {} done: {} bytes in {:?}, {:.1} MB/s",
            endpoint,
            content_size,
            elapsed,
            throughput_mb_s(content_size, elapsed.as_secs_f64())
        );
        Ok(blob)
    }

    fn fail(&self, machine: &UploadStateMachine, error: TransferError) -> TransferError {
        if let Err(e) = machine.transition(UploadEvent::Fail {
            error: error.to_string(),
        }) {
            warn!("Could not record failure: {}", e);
        }
        metrics::record_upload_failed();
        warn!("Upload failed: {}", error);
        error
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        machine: &UploadStateMachine,
        route: UploadRoute,
        fallback_reason: Option<FallbackReason>,
        hit_rate: Option<f64>,
        bytes_sent: u64,
        content_size: u64,
        blob: StoredBlob,
        started: Instant,
    ) -> UploadOutcome {
        let elapsed = started.elapsed();
        metrics::record_upload_completed(route, bytes_sent, content_size, elapsed);
        info!(
            "Upload of {} bytes finished via {:?} route in {:?} ({})",
            content_size, route, elapsed, blob.sha256
        );

        UploadOutcome {
            route,
            fallback_reason,
            hit_rate,
            bytes_sent,
            content_size,
            blob,
            elapsed,
            history: machine.history(),
        }
    }
}

/// A failed or declined delta step, with the error to report if no
/// fallback endpoint exists
struct Fallback {
    reason: FallbackReason,
    cause: TransferError,
    hit_rate: Option<f64>,
}

fn write_delta(
    engine: DiffEngine,
    content: &Path,
    signature: &SignatureSet,
    temp_dir: Option<PathBuf>,
) -> io::Result<DeltaFile> {
    let builder = {
        let mut builder = tempfile::Builder::new();
        builder.prefix("delta-").suffix(".ops");
        builder
    };
    let file = match temp_dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };

    let target = BufReader::new(File::open(content)?);
    let mut writer = DeltaWriter::new(BufWriter::new(file.as_file().try_clone()?));
    let summary = engine.diff_with(target, signature, |op| writer.write_op(&op))?;
    let encoded_len = writer.bytes_written() + 1;
    writer
        .finish()?
        .into_inner()
        .map_err(|e| e.into_error())?
        .sync_data()?;

    Ok(DeltaFile {
        file,
        summary,
        encoded_len,
    })
}

fn throughput_mb_s(bytes: u64, secs: f64) -> f64 {
    if secs <= 0.0 {
        return 0.0;
    }
    bytes as f64 / secs / (1024.0 * 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::IntegrityVerifier;
    use crate::network::Headers;
    use crate::sync::{DeltaReader, PatchApplier, PatchError, SignatureIndexer};
    use crate::transfer::types::UploadState;
    use chrono::Utc;
    use parking_lot::Mutex;
    use rand::{rngs::StdRng, RngCore, SeedableRng};
    use std::io::Cursor;
    use tempfile::TempDir;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum PatchMode {
        Apply,
        Reject,
        /// Rebuild against a corrupted base so the digest disagrees
        Corrupt,
    }

    #[derive(Debug, Default)]
    struct Calls {
        sign: usize,
        patch: usize,
        full: usize,
        delta_paths: Vec<PathBuf>,
    }

    struct MockPeer {
        base: Vec<u8>,
        fail_sign: bool,
        patch_mode: PatchMode,
        fail_full: bool,
        calls: Mutex<Calls>,
    }

    impl MockPeer {
        fn new(base: Vec<u8>) -> Self {
            Self {
                base,
                fail_sign: false,
                patch_mode: PatchMode::Apply,
                fail_full: false,
                calls: Mutex::new(Calls::default()),
            }
        }

        fn stored(data: &[u8]) -> StoredBlob {
            let digests = IntegrityVerifier::calculate_digests(data);
            StoredBlob::new(&digests, digests.sha256.to_hex(), Utc::now())
        }
    }

    impl DeltaPeer for MockPeer {
        async fn fetch_signature(
            &self,
            _endpoint: &PeerEndpoint,
            block_size: u32,
            _headers: &Headers,
        ) -> Result<SignatureSet, NetworkError> {
            self.calls.lock().sign += 1;
            if self.fail_sign {
                return Err(NetworkError::NotFound("base".into()));
            }
            Ok(SignatureIndexer::new(block_size as usize)
                .index_bytes(&self.base)
                .unwrap())
        }

        async fn submit_delta(
            &self,
            _endpoint: &PeerEndpoint,
            submission: &DeltaSubmission,
            delta: &Path,
        ) -> Result<StoredBlob, NetworkError> {
            {
                let mut calls = self.calls.lock();
                calls.patch += 1;
                calls.delta_paths.push(delta.to_path_buf());
            }

            let mut base = self.base.clone();
            match self.patch_mode {
                PatchMode::Reject => {
                    return Err(NetworkError::Rejected {
                        status: "internal error".into(),
                        message: "disk full".into(),
                    })
                }
                PatchMode::Corrupt => base[0] ^= 0xff,
                PatchMode::Apply => {}
            }

            let encoded = std::fs::read(delta)?;
            let mut rebuilt = Vec::new();
            let result = PatchApplier::new(submission.block_size as usize).apply_verified(
                &mut Cursor::new(base),
                DeltaReader::new(&encoded[..]),
                &mut rebuilt,
                &submission.sha256,
                Some(submission.size),
            );
            match result {
                Ok(_) => Ok(Self::stored(&rebuilt)),
                Err(PatchError::IntegrityMismatch { expected, actual }) => {
                    Err(NetworkError::IntegrityRejected { expected, actual })
                }
                Err(e) => Err(NetworkError::Rejected {
                    status: "bad request".into(),
                    message: e.to_string(),
                }),
            }
        }

        async fn upload_full(
            &self,
            _endpoint: &PeerEndpoint,
            source: &Path,
            size: u64,
            _headers: &Headers,
        ) -> Result<StoredBlob, NetworkError> {
            self.calls.lock().full += 1;
            if self.fail_full {
                return Err(NetworkError::Timeout(std::time::Duration::from_secs(1)));
            }
            let data = std::fs::read(source)?;
            assert_eq!(data.len() as u64, size);
            Ok(Self::stored(&data))
        }
    }

    fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
        let mut data = vec![0u8; len];
        StdRng::seed_from_u64(seed).fill_bytes(&mut data);
        data
    }

    fn endpoint(resource: &str) -> PeerEndpoint {
        PeerEndpoint {
            addr: "127.0.0.1:4433".parse().unwrap(),
            resource: resource.into(),
        }
    }

    fn request(dir: &TempDir, target: &[u8], with_fallback: bool) -> UploadRequest {
        let content = dir.path().join("target.bin");
        std::fs::write(&content, target).unwrap();
        UploadRequest {
            content,
            sign_endpoint: endpoint("app-v1"),
            delta_endpoint: endpoint("app-v2"),
            fallback_endpoint: with_fallback.then(|| endpoint("app-v2")),
            old_file_identifier: "app-v1".into(),
            headers: Headers::new(),
        }
    }

    fn config(dir: &TempDir, block_size: usize) -> DeltaConfig {
        let temp_dir = dir.path().join("deltas");
        std::fs::create_dir_all(&temp_dir).unwrap();
        DeltaConfig {
            block_size,
            temp_dir: Some(temp_dir),
            ..Default::default()
        }
    }

    fn deltas_left(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path().join("deltas")).unwrap().count()
    }

    fn edited(base: &[u8]) -> Vec<u8> {
        let mut target = base.to_vec();
        target.splice(30_000..30_100, b"a small edit in the middle".iter().copied());
        target.extend_from_slice(b"and a new tail");
        target
    }

    #[tokio::test]
    async fn test_delta_route() {
        let temp_dir = TempDir::new().unwrap();
        let base = random_bytes(64 * 1024, 1);
        let target = edited(&base);
        let orchestrator =
            TransferOrchestrator::new(MockPeer::new(base), config(&temp_dir, 2048));

        let outcome = orchestrator
            .upload(&request(&temp_dir, &target, true))
            .await
            .unwrap();

        assert_eq!(outcome.route, UploadRoute::Delta);
        assert!(outcome.fallback_reason.is_none());
        assert!(outcome.hit_rate.unwrap() > 0.9);
        assert!(outcome.bytes_sent < target.len() as u64 / 4);
        assert_eq!(outcome.content_size, target.len() as u64);
        assert_eq!(
            outcome.blob.sha256,
            IntegrityVerifier::calculate_digests(&target).sha256
        );
        assert_eq!(
            outcome.history,
            vec![
                UploadState::Start,
                UploadState::Sign,
                UploadState::Diff,
                UploadState::ThresholdCheck,
                UploadState::Patch,
                UploadState::Done,
            ]
        );

        let calls = orchestrator.peer().calls.lock();
        assert_eq!((calls.sign, calls.patch, calls.full), (1, 1, 0));
        assert!(!calls.delta_paths[0].exists());
        assert_eq!(deltas_left(&temp_dir), 0);
    }

    #[tokio::test]
    async fn test_no_shared_blocks_falls_back_without_patch() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = TransferOrchestrator::new(
            MockPeer::new(b"AAAABBBBCCCC".to_vec()),
            config(&temp_dir, 4),
        );

        let outcome = orchestrator
            .upload(&request(&temp_dir, b"WXYZWXYZWXYZ", true))
            .await
            .unwrap();

        assert_eq!(outcome.route, UploadRoute::Full);
        assert_eq!(outcome.hit_rate, Some(0.0));
        assert!(matches!(
            outcome.fallback_reason,
            Some(FallbackReason::BelowThreshold { .. })
        ));
        assert_eq!(outcome.bytes_sent, 12);
        assert!(outcome.history.contains(&UploadState::Fallback));
        assert!(!outcome.history.contains(&UploadState::Patch));

        let calls = orchestrator.peer().calls.lock();
        assert_eq!((calls.sign, calls.patch, calls.full), (1, 0, 1));
        assert_eq!(deltas_left(&temp_dir), 0);
    }

    #[tokio::test]
    async fn test_below_threshold_without_fallback_is_configuration_error() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = TransferOrchestrator::new(
            MockPeer::new(b"AAAABBBBCCCC".to_vec()),
            config(&temp_dir, 4),
        );
        let machine = UploadStateMachine::new();

        let err = orchestrator
            .upload_with(&request(&temp_dir, b"WXYZWXYZWXYZ", false), &machine)
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Configuration(_)));
        assert!(matches!(machine.current_state(), UploadState::Failed { .. }));
        assert_eq!(orchestrator.peer().calls.lock().patch, 0);
        assert_eq!(deltas_left(&temp_dir), 0);
    }

    #[tokio::test]
    async fn test_sign_failure() {
        let temp_dir = TempDir::new().unwrap();
        let target = random_bytes(10_000, 2);
        let mut peer = MockPeer::new(Vec::new());
        peer.fail_sign = true;
        let orchestrator = TransferOrchestrator::new(peer, config(&temp_dir, 2048));

        let outcome = orchestrator
            .upload(&request(&temp_dir, &target, true))
            .await
            .unwrap();
        assert_eq!(outcome.route, UploadRoute::Full);
        assert!(matches!(
            outcome.fallback_reason,
            Some(FallbackReason::SignFailed(_))
        ));
        assert_eq!(outcome.hit_rate, None);

        let err = orchestrator
            .upload(&request(&temp_dir, &target, false))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::SignRequestFailed(_)));
    }

    #[tokio::test]
    async fn test_patch_failure_falls_back_exactly_once() {
        let temp_dir = TempDir::new().unwrap();
        let base = random_bytes(32 * 1024, 3);
        let target = edited(&base);
        let mut peer = MockPeer::new(base);
        peer.patch_mode = PatchMode::Reject;
        let orchestrator = TransferOrchestrator::new(peer, config(&temp_dir, 2048));

        let outcome = orchestrator
            .upload(&request(&temp_dir, &target, true))
            .await
            .unwrap();
        assert_eq!(outcome.route, UploadRoute::Full);
        assert!(matches!(
            outcome.fallback_reason,
            Some(FallbackReason::PatchFailed(_))
        ));
        {
            let calls = orchestrator.peer().calls.lock();
            assert_eq!((calls.patch, calls.full), (1, 1));
            assert!(!calls.delta_paths[0].exists());
        }

        let err = orchestrator
            .upload(&request(&temp_dir, &target, false))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::PatchRequestFailed(_)));
        assert_eq!(orchestrator.peer().calls.lock().full, 1);
        assert_eq!(deltas_left(&temp_dir), 0);
    }

    #[tokio::test]
    async fn test_failed_fallback_is_not_retried() {
        let temp_dir = TempDir::new().unwrap();
        let base = random_bytes(32 * 1024, 4);
        let target = edited(&base);
        let mut peer = MockPeer::new(base);
        peer.patch_mode = PatchMode::Reject;
        peer.fail_full = true;
        let orchestrator = TransferOrchestrator::new(peer, config(&temp_dir, 2048));

        let err = orchestrator
            .upload(&request(&temp_dir, &target, true))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::FullUploadFailed(_)));

        let calls = orchestrator.peer().calls.lock();
        assert_eq!((calls.patch, calls.full), (1, 1));
    }

    #[tokio::test]
    async fn test_integrity_mismatch_propagates() {
        let temp_dir = TempDir::new().unwrap();
        let base = random_bytes(32 * 1024, 5);
        let target = edited(&base);
        let mut peer = MockPeer::new(base);
        peer.patch_mode = PatchMode::Corrupt;
        let orchestrator = TransferOrchestrator::new(peer, config(&temp_dir, 2048));
        let machine = UploadStateMachine::new();

        let err = orchestrator
            .upload_with(&request(&temp_dir, &target, true), &machine)
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::IntegrityMismatch { .. }));
        assert!(matches!(machine.current_state(), UploadState::Failed { .. }));
        assert!(!machine.history().contains(&UploadState::Fallback));

        let calls = orchestrator.peer().calls.lock();
        assert_eq!((calls.patch, calls.full), (1, 0));
        assert_eq!(deltas_left(&temp_dir), 0);
    }

    #[tokio::test]
    async fn test_empty_target_takes_delta_route() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = TransferOrchestrator::new(
            MockPeer::new(b"old content".to_vec()),
            config(&temp_dir, 4),
        );

        let outcome = orchestrator
            .upload(&request(&temp_dir, b"", false))
            .await
            .unwrap();
        assert_eq!(outcome.route, UploadRoute::Delta);
        assert_eq!(outcome.hit_rate, Some(1.0));
        assert_eq!(outcome.blob.size, 0);
    }
}
