use crate::network::{DeltaSubmission, Headers, NetworkResult, PeerEndpoint};
use crate::storage::StoredBlob;
use crate::sync::SignatureSet;
use std::future::Future;
use std::path::Path;

/// The remote side of a delta upload
///
/// [`PeerClient`](crate::network::PeerClient) implements this over QUIC.
pub trait DeltaPeer: Send + Sync {
    /// Fetch the block signatures of the base named by `endpoint`
    fn fetch_signature(
        &self,
        endpoint: &PeerEndpoint,
        block_size: u32,
        headers: &Headers,
    ) -> impl Future<Output = NetworkResult<SignatureSet>> + Send;

    /// Send the op stream stored at `delta`
    fn submit_delta(
        &self,
        endpoint: &PeerEndpoint,
        submission: &DeltaSubmission,
        delta: &Path,
    ) -> impl Future<Output = NetworkResult<StoredBlob>> + Send;

    /// Upload `source` in full
    fn upload_full(
        &self,
        endpoint: &PeerEndpoint,
        source: &Path,
        size: u64,
        headers: &Headers,
    ) -> impl Future<Output = NetworkResult<StoredBlob>> + Send;
}
