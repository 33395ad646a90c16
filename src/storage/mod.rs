//! Content-addressable storage
//!
//! Blobs are keyed by their SHA-256 and laid out by a [`FileLocator`] on a
//! local filesystem or any object store the `object_store` crate supports.

pub mod backend;
pub mod error;
pub mod locator;
pub mod store;
pub mod types;

pub use backend::{FileSystemBackend, ObjectStoreBackend, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use locator::{FileLocator, HashFileLocator};
pub use store::{ContentStore, StagedBlob};
pub use types::{BackendConfig, BlobMeta, BlobReader, ByteRange, Promotion, StorageConfig, StoredBlob};
