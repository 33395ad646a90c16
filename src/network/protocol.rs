//! Request and response frames exchanged between peers
//!
//! Every request runs on its own bidirectional QUIC stream:
//!
//! ```text
//! client -> u32 BE length | bincode(PeerRequest) | body ... FIN
//! server -> u32 BE length | bincode(PeerResponse) | body ... FIN
//! ```
//!
//! Bodies are raw bytes running to the end of the stream: op streams for
//! `Patch`, file content for `Upload`, signature records for `Sign` and blob
//! bytes for `Fetch`.

use crate::integrity::ContentHash;
use crate::network::error::{NetworkError, NetworkResult};
use crate::storage::{ByteRange, StoredBlob};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest encoded frame header accepted
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Caller-supplied metadata forwarded with a request
pub type Headers = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PeerRequest {
    /// Ask for the block signatures of the peer's current copy
    Sign {
        resource: String,
        block_size: u32,
        headers: Headers,
    },
    /// Rebuild `resource` from a base the peer already has plus the op stream body
    Patch {
        resource: String,
        submission: DeltaSubmission,
    },
    /// Store the body as the new content of `resource`
    Upload {
        resource: String,
        size: u64,
        headers: Headers,
    },
    Fetch { resource: String, range: ByteRange },
}

impl PeerRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            PeerRequest::Sign { .. } => "sign",
            PeerRequest::Patch { .. } => "patch",
            PeerRequest::Upload { .. } => "upload",
            PeerRequest::Fetch { .. } => "fetch",
        }
    }

    pub fn resource(&self) -> &str {
        match self {
            PeerRequest::Sign { resource, .. }
            | PeerRequest::Patch { resource, .. }
            | PeerRequest::Upload { resource, .. }
            | PeerRequest::Fetch { resource, .. } => resource,
        }
    }
}

/// Metadata accompanying a delta upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaSubmission {
    /// Base the ops were computed against: a resource name or a hex SHA-256
    pub base_id: String,
    pub block_size: u32,
    /// SHA-256 the rebuilt content must have
    pub sha256: ContentHash,
    pub size: u64,
    pub headers: Headers,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Ok,
    NotFound,
    BadRequest,
    IntegrityMismatch { expected: String, actual: String },
    Internal,
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseStatus::Ok => f.write_str("ok"),
            ResponseStatus::NotFound => f.write_str("not found"),
            ResponseStatus::BadRequest => f.write_str("bad request"),
            ResponseStatus::IntegrityMismatch { .. } => f.write_str("integrity mismatch"),
            ResponseStatus::Internal => f.write_str("internal error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerResponse {
    pub status: ResponseStatus,
    pub message: String,
    /// The committed blob, for requests that store content
    pub blob: Option<StoredBlob>,
}

impl PeerResponse {
    pub fn ok(blob: Option<StoredBlob>) -> Self {
        Self {
            status: ResponseStatus::Ok,
            message: String::new(),
            blob,
        }
    }

    pub fn error(status: ResponseStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            blob: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    /// Turn a non-OK status into the matching error
    pub fn into_result(self) -> NetworkResult<Self> {
        match self.status {
            ResponseStatus::Ok => Ok(self),
            ResponseStatus::NotFound => Err(NetworkError::NotFound(self.message)),
            ResponseStatus::IntegrityMismatch { expected, actual } => {
                Err(NetworkError::IntegrityRejected { expected, actual })
            }
            status => Err(NetworkError::Rejected {
                status: status.to_string(),
                message: self.message,
            }),
        }
    }
}

/// Write one length-prefixed bincode frame
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> NetworkResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let encoded = bincode::serialize(value)?;
    if encoded.len() > MAX_FRAME_LEN {
        return Err(NetworkError::FrameTooLarge(encoded.len()));
    }

    writer
        .write_u32(encoded.len() as u32)
        .await
        .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
    writer
        .write_all(&encoded)
        .await
        .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
    Ok(())
}

/// Read one length-prefixed bincode frame
pub async fn read_frame<R, T>(reader: &mut R) -> NetworkResult<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = reader
        .read_u32()
        .await
        .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))? as usize;
    if len > MAX_FRAME_LEN {
        return Err(NetworkError::FrameTooLarge(len));
    }

    let mut encoded = vec![0u8; len];
    reader
        .read_exact(&mut encoded)
        .await
        .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;
    Ok(bincode::deserialize(&encoded)?)
}
