//! Uploader side of the peer protocol

use crate::network::error::{NetworkError, NetworkResult};
use crate::network::protocol::{
    read_frame, write_frame, DeltaSubmission, Headers, PeerRequest, PeerResponse,
};
use crate::network::quic_transport::QuicTransport;
use crate::network::rate_limiter::TransferRateLimiter;
use crate::network::types::{ConnectionConfig, NetworkStats, PeerEndpoint};
use crate::storage::{ByteRange, StoredBlob};
use crate::sync::{decode_signature, SignatureSet};
use crate::transfer::DeltaPeer;
use quinn::RecvStream;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Largest signature body accepted from a peer
const MAX_SIGNATURE_LEN: usize = 256 * 1024 * 1024;

const BODY_CHUNK_SIZE: usize = 64 * 1024;

/// Talks to remote peers, keeping one QUIC connection per peer address
pub struct PeerClient {
    transport: QuicTransport,
    request_timeout: Duration,
    limiter: TransferRateLimiter,
}

impl PeerClient {
    pub async fn new(config: ConnectionConfig) -> NetworkResult<Self> {
        let request_timeout = config.request_timeout;
        let limiter = TransferRateLimiter::new(config.max_upload_bytes_per_sec);
        let transport = QuicTransport::new(config).await?;

        Ok(Self {
            transport,
            request_timeout,
            limiter,
        })
    }

    pub fn stats(&self) -> NetworkStats {
        self.transport.stats()
    }

    /// Bound a whole request, body transfer included, by the request timeout
    async fn timed<T, F>(&self, fut: F) -> NetworkResult<T>
    where
        F: Future<Output = NetworkResult<T>>,
    {
        tokio::time::timeout(self.request_timeout, fut)
            .await
            .map_err(|_| NetworkError::Timeout(self.request_timeout))?
    }

    /// Send a request with its body and read the response header
    async fn send_request<R>(
        &self,
        remote: SocketAddr,
        request: &PeerRequest,
        mut body: R,
    ) -> NetworkResult<(PeerResponse, RecvStream)>
    where
        R: AsyncRead + Unpin,
    {
        let (mut send, mut recv) = self.transport.open_bi(remote).await?;
        write_frame(&mut send, request).await?;

        let mut buffer = vec![0u8; BODY_CHUNK_SIZE];
        let mut sent = 0u64;
        loop {
            let n = body.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            self.limiter.wait_for_bytes(n).await;
            send.write_all(&buffer[..n]).await?;
            sent += n as u64;
        }
        send.finish()?;
        self.transport.record_sent(sent);

        let response: PeerResponse = read_frame(&mut recv).await?;
        debug!(
            "{} {}/{}: {} ({} body bytes sent)",
            request.kind(),
            remote,
            request.resource(),
            response.status,
            sent
        );
        Ok((response.into_result()?, recv))
    }

    /// Stream (part of) a remote resource into `out`
    pub async fn fetch<W>(
        &self,
        endpoint: &PeerEndpoint,
        range: ByteRange,
        out: &mut W,
    ) -> NetworkResult<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let request = PeerRequest::Fetch {
            resource: endpoint.resource.clone(),
            range,
        };
        self.timed(async {
            let (_, mut recv) = self
                .send_request(endpoint.addr, &request, tokio::io::empty())
                .await?;
            let copied = tokio::io::copy(&mut recv, out).await?;
            out.flush().await?;
            self.transport.record_received(copied);
            Ok(copied)
        })
        .await
    }

    async fn upload_file(
        &self,
        remote: SocketAddr,
        request: PeerRequest,
        source: &Path,
    ) -> NetworkResult<StoredBlob> {
        self.timed(async {
            let file = tokio::fs::File::open(source).await?;
            let (response, _) = self.send_request(remote, &request, file).await?;
            response.blob.ok_or_else(|| {
                NetworkError::SerializationError("peer stored content but returned no blob".into())
            })
        })
        .await
    }

    pub fn close(&self) {
        self.transport.close();
    }
}

impl DeltaPeer for PeerClient {
    async fn fetch_signature(
        &self,
        endpoint: &PeerEndpoint,
        block_size: u32,
        headers: &Headers,
    ) -> NetworkResult<SignatureSet> {
        let request = PeerRequest::Sign {
            resource: endpoint.resource.clone(),
            block_size,
            headers: headers.clone(),
        };

        self.timed(async {
            let (_, mut recv) = self
                .send_request(endpoint.addr, &request, tokio::io::empty())
                .await?;
            let body = recv.read_to_end(MAX_SIGNATURE_LEN).await?;
            self.transport.record_received(body.len() as u64);

            let signature = decode_signature(&mut &body[..])
                .map_err(|e| NetworkError::SerializationError(e.to_string()))?;
            if signature.block_size() != block_size as usize {
                return Err(NetworkError::SerializationError(format!(
                    "signature block size {} differs from requested {}",
                    signature.block_size(),
                    block_size
                )));
            }
            Ok(signature)
        })
        .await
    }

    async fn submit_delta(
        &self,
        endpoint: &PeerEndpoint,
        submission: &DeltaSubmission,
        delta: &Path,
    ) -> NetworkResult<StoredBlob> {
        let request = PeerRequest::Patch {
            resource: endpoint.resource.clone(),
            submission: submission.clone(),
        };
        self.upload_file(endpoint.addr, request, delta).await
    }

    async fn upload_full(
        &self,
        endpoint: &PeerEndpoint,
        source: &Path,
        size: u64,
        headers: &Headers,
    ) -> NetworkResult<StoredBlob> {
        let request = PeerRequest::Upload {
            resource: endpoint.resource.clone(),
            size,
            headers: headers.clone(),
        };
        self.upload_file(endpoint.addr, request, source).await
    }
}
