use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Sign request failed: {0}")]
    SignRequestFailed(String),

    #[error("Patch request failed: {0}")]
    PatchRequestFailed(String),

    #[error("Integrity mismatch: expected sha256 {expected}, peer computed {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Full upload failed: {0}")]
    FullUploadFailed(String),

    #[error("Diff failed: {0}")]
    DiffFailed(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type TransferResult<T> = Result<T, TransferError>;
