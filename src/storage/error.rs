use crate::integrity::IntegrityError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid range {start}..{end:?} for blob of {size} bytes")]
    InvalidRange {
        start: u64,
        end: Option<u64>,
        size: u64,
    },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Invalid storage configuration: {0}")]
    InvalidConfig(String),

    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

impl From<object_store::Error> for StorageError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => StorageError::NotFound(path),
            other => StorageError::Backend(other.to_string()),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
