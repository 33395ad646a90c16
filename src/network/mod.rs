//! Peer transport over QUIC
//!
//! [`PeerClient`] drives sign, patch and upload requests against a remote
//! [`PeerServer`], which hands them to a [`PeerService`] backed by the
//! content store and cache.

pub mod client;
pub mod error;
pub mod protocol;
pub mod quic_transport;
pub mod rate_limiter;
pub mod server;
pub mod service;
pub mod types;

pub use client::PeerClient;
pub use error::{NetworkError, NetworkResult};
pub use protocol::{DeltaSubmission, Headers, PeerRequest, PeerResponse, ResponseStatus};
pub use quic_transport::QuicTransport;
pub use rate_limiter::TransferRateLimiter;
pub use server::PeerServer;
pub use service::{PeerService, ServiceError, ServiceResult};
pub use types::{ConnectionConfig, NetworkStats, PeerEndpoint};
