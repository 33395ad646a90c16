use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("SHA-256 mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        expected: String,
        actual: String,
    },

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid checksum length: expected {expected} hex chars, got {actual}")]
    InvalidChecksumLength { expected: usize, actual: usize },

    #[error("Invalid hex digest: {0}")]
    InvalidHex(String),
}

pub type IntegrityResult<T> = Result<T, IntegrityError>;
