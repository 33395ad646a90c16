//! QUIC front end for a [`PeerService`]

use crate::network::error::{NetworkError, NetworkResult};
use crate::network::protocol::{read_frame, write_frame, PeerRequest, PeerResponse};
use crate::network::quic_transport::QuicTransport;
use crate::network::service::{discard, PeerService};
use crate::network::types::ConnectionConfig;
use quinn::{Connection, RecvStream, SendStream};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct PeerServer {
    transport: Arc<QuicTransport>,
    service: Arc<PeerService>,
}

impl PeerServer {
    pub async fn bind(config: ConnectionConfig, service: Arc<PeerService>) -> NetworkResult<Self> {
        let transport = Arc::new(QuicTransport::new(config).await?);
        info!("Peer listening on {}", transport.local_addr()?);
        Ok(Self { transport, service })
    }

    pub fn local_addr(&self) -> NetworkResult<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn service(&self) -> &Arc<PeerService> {
        &self.service
    }

    pub fn transport(&self) -> &Arc<QuicTransport> {
        &self.transport
    }

    /// Accept connections until the endpoint is closed
    pub async fn serve(&self) -> NetworkResult<()> {
        loop {
            let conn = match self.transport.accept().await {
                Ok(conn) => conn,
                Err(NetworkError::ConnectionClosed(_)) => {
                    info!("Endpoint closed, server stopping");
                    return Ok(());
                }
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let transport = self.transport.clone();
            let service = self.service.clone();
            tokio::spawn(async move {
                handle_connection(transport, service, conn).await;
            });
        }
    }

    /// Run [`serve`](Self::serve) on a background task
    pub fn spawn(self: Arc<Self>) -> JoinHandle<NetworkResult<()>> {
        tokio::spawn(async move { self.serve().await })
    }

    pub fn shutdown(&self) {
        self.transport.close();
    }
}

async fn handle_connection(transport: Arc<QuicTransport>, service: Arc<PeerService>, conn: Connection) {
    let remote = conn.remote_address();
    loop {
        let (send, recv) = match conn.accept_bi().await {
            Ok(streams) => streams,
            Err(quinn::ConnectionError::ApplicationClosed(_))
            | Err(quinn::ConnectionError::LocallyClosed) => {
                debug!("Connection from {} closed", remote);
                return;
            }
            Err(e) => {
                debug!("Connection from {} ended: {}", remote, e);
                return;
            }
        };

        let transport = transport.clone();
        let service = service.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_stream(&transport, &service, send, recv).await {
                warn!("Request from {} failed: {}", remote, e);
            }
        });
    }
}

async fn handle_stream(
    transport: &QuicTransport,
    service: &PeerService,
    mut send: SendStream,
    mut recv: RecvStream,
) -> NetworkResult<()> {
    let started = Instant::now();
    let request: PeerRequest = read_frame(&mut recv).await?;
    debug!("{} request for {}", request.kind(), request.resource());

    let outcome = match &request {
        PeerRequest::Sign {
            resource,
            block_size,
            ..
        } => match service.signature(resource, *block_size).await {
            Ok(body) => {
                write_frame(&mut send, &PeerResponse::ok(None)).await?;
                send.write_all(&body).await?;
                transport.record_sent(body.len() as u64);
                Ok(())
            }
            Err(e) => Err(e),
        },
        PeerRequest::Patch {
            resource,
            submission,
        } => match service.apply_delta(resource, submission, &mut recv).await {
            Ok(blob) => {
                write_frame(&mut send, &PeerResponse::ok(Some(blob))).await?;
                Ok(())
            }
            Err(e) => Err(e),
        },
        PeerRequest::Upload { resource, size, .. } => {
            match service.store_full(resource, *size, &mut recv).await {
                Ok(blob) => {
                    write_frame(&mut send, &PeerResponse::ok(Some(blob))).await?;
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        PeerRequest::Fetch { resource, range } => match service.fetch(resource, *range).await {
            Ok(mut reader) => {
                write_frame(&mut send, &PeerResponse::ok(None)).await?;
                let copied = tokio::io::copy(&mut reader, &mut send).await?;
                transport.record_sent(copied);
                Ok(())
            }
            Err(e) => Err(e),
        },
    };

    if let Err(e) = outcome {
        debug!("{} {} rejected: {}", request.kind(), request.resource(), e);
        // Leftover body bytes would otherwise hold the stream open
        let _ = discard(&mut recv).await;
        write_frame(&mut send, &e.to_response()).await?;
    }

    send.finish()?;
    let _ = send.stopped().await;
    transport.record_served();
    debug!(
        "{} {} served in {:?}",
        request.kind(),
        request.resource(),
        started.elapsed()
    );
    Ok(())
}
