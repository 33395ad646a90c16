use crate::network::{Headers, PeerEndpoint};
use crate::storage::StoredBlob;
use crate::sync::DEFAULT_BLOCK_SIZE;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// One delta upload to perform
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Local file holding the new version
    pub content: PathBuf,
    /// Where to fetch the base's signatures from
    pub sign_endpoint: PeerEndpoint,
    /// Where to submit the op stream; names the new version
    pub delta_endpoint: PeerEndpoint,
    /// Full-upload destination used when the delta route is not taken
    pub fallback_endpoint: Option<PeerEndpoint>,
    /// Base version the ops are relative to
    pub old_file_identifier: String,
    pub headers: Headers,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UploadState {
    Start,
    Sign,
    Diff,
    ThresholdCheck,
    Patch,
    Fallback,
    Done,
    Failed { error: String },
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Done | UploadState::Failed { .. })
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadState::Start => f.write_str("START"),
            UploadState::Sign => f.write_str("SIGN"),
            UploadState::Diff => f.write_str("DIFF"),
            UploadState::ThresholdCheck => f.write_str("THRESHOLD_CHECK"),
            UploadState::Patch => f.write_str("PATCH"),
            UploadState::Fallback => f.write_str("FALLBACK"),
            UploadState::Done => f.write_str("DONE"),
            UploadState::Failed { .. } => f.write_str("FAILED"),
        }
    }
}

/// Why the full-upload route was taken
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FallbackReason {
    /// Too little of the target matched the base for a delta to pay off
    BelowThreshold { hit_rate: f64, threshold: f64 },
    SignFailed(String),
    DiffFailed(String),
    PatchFailed(String),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::BelowThreshold {
                hit_rate,
                threshold,
            } => write!(f, "hit rate {:.3} below threshold {:.3}", hit_rate, threshold),
            FallbackReason::SignFailed(e) => write!(f, "sign request failed: {e}"),
            FallbackReason::DiffFailed(e) => write!(f, "diff failed: {e}"),
            FallbackReason::PatchFailed(e) => write!(f, "patch request failed: {e}"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum UploadEvent {
    Begin,
    SignatureReceived { blocks: usize },
    DiffComputed { hit_rate: f64 },
    ThresholdMet,
    PatchAccepted,
    FallBack { reason: FallbackReason },
    FullUploadAccepted,
    Fail { error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadRoute {
    Delta,
    Full,
}

/// What an upload ended up doing
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub route: UploadRoute,
    pub fallback_reason: Option<FallbackReason>,
    /// Present once a diff was computed
    pub hit_rate: Option<f64>,
    /// Body bytes sent for the route taken
    pub bytes_sent: u64,
    pub content_size: u64,
    pub blob: StoredBlob,
    pub elapsed: Duration,
    pub history: Vec<UploadState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaConfig {
    pub block_size: usize,
    /// Minimum hit rate for the delta route
    pub reuse_threshold: f64,
    /// Longest DATA op emitted
    pub max_literal_run: usize,
    /// Where delta files are written; the system temp dir when unset
    pub temp_dir: Option<PathBuf>,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            reuse_threshold: 0.2,
            max_literal_run: 1024 * 1024,
            temp_dir: None,
        }
    }
}
