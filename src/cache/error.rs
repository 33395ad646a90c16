use crate::storage::StorageError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache storage degraded: {0}")]
    StorageDegraded(String),

    #[error("Health probe timed out after {0:?}")]
    ProbeTimeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::Storage(e) if e.is_not_found())
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
