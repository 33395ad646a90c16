//! deltavault: delta-synchronized content storage
//!
//! An uploader signs the peer's copy of a file, diffs its new version
//! against the signature and sends only the difference; the peer rebuilds
//! the file, verifies it and commits it to a content-addressed store with a
//! local hot cache in front.

pub mod cache;
pub mod config;
pub mod integrity;
pub mod metrics;
pub mod network;
pub mod storage;
pub mod sync;
pub mod transfer;

pub use config::Config;
