use crate::network::error::{NetworkError, NetworkResult};
use crate::network::types::{ConnectionConfig, NetworkStats};
use backoff::{backoff::Backoff, ExponentialBackoff};
use dashmap::DashMap;
use quinn::{Connection, Endpoint, RecvStream, SendStream, ServerConfig, TransportConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Server name presented in, and expected from, self-signed certificates
const SERVER_NAME: &str = "localhost";

/// One QUIC endpoint that both accepts and opens connections
///
/// Outgoing connections are cached per remote address and reused until they
/// close.
pub struct QuicTransport {
    endpoint: Endpoint,
    connections: Arc<DashMap<SocketAddr, Connection>>,
    stats: Arc<parking_lot::RwLock<NetworkStats>>,
    config: ConnectionConfig,
}

impl QuicTransport {
    /// Create new QUIC transport with self-signed certificate
    pub async fn new(config: ConnectionConfig) -> NetworkResult<Self> {
        if config.insecure_skip_verify {
            tracing::warn!(
                "SECURITY WARNING: TLS certificate verification is DISABLED. \
                 This is insecure and should only be used for testing with self-signed certificates. \
                 Set insecure_skip_verify=false and use proper certificates in production."
            );
        }

        let mut endpoint = Self::make_server_endpoint(&config)?;
        endpoint.set_default_client_config(Self::make_client_config(&config)?);

        Ok(Self {
            endpoint,
            connections: Arc::new(DashMap::new()),
            stats: Arc::new(parking_lot::RwLock::new(NetworkStats::default())),
            config,
        })
    }

    fn transport_config(config: &ConnectionConfig) -> NetworkResult<TransportConfig> {
        let idle_timeout = config
            .max_idle_timeout
            .try_into()
            .map_err(|e| NetworkError::QuicError(format!("invalid idle timeout: {e}")))?;

        let mut transport_config = TransportConfig::default();
        transport_config
            .max_concurrent_bidi_streams(config.max_concurrent_streams.into())
            .max_idle_timeout(Some(idle_timeout))
            .keep_alive_interval(Some(config.keep_alive_interval));
        Ok(transport_config)
    }

    /// Create server endpoint with self-signed certificate
    fn make_server_endpoint(config: &ConnectionConfig) -> NetworkResult<Endpoint> {
        let cert = rcgen::generate_simple_self_signed(vec![SERVER_NAME.into()])
            .map_err(|e| NetworkError::CertificateError(e.to_string()))?;
        let cert_der = cert.cert.der().to_vec();
        let priv_key = rustls::pki_types::PrivateKeyDer::try_from(cert.key_pair.serialize_der())
            .map_err(|e| NetworkError::CertificateError(e.to_string()))?;

        let mut server_config = ServerConfig::with_single_cert(
            vec![rustls::pki_types::CertificateDer::from(cert_der)],
            priv_key,
        )
        .map_err(|e| NetworkError::CertificateError(e.to_string()))?;
        server_config.transport_config(Arc::new(Self::transport_config(config)?));

        Endpoint::server(server_config, config.bind_addr)
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))
    }

    /// Client side TLS and transport settings
    ///
    /// With `insecure_skip_verify` any certificate is accepted; otherwise the
    /// system roots are used, falling back to the bundled webpki roots.
    fn make_client_config(config: &ConnectionConfig) -> NetworkResult<quinn::ClientConfig> {
        let crypto = if config.insecure_skip_verify {
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
                .with_no_client_auth()
        } else {
            let mut root_store = rustls::RootCertStore::empty();

            match rustls_native_certs::load_native_certs() {
                Ok(certs) => {
                    for cert in certs {
                        if let Err(e) = root_store.add(cert) {
                            tracing::warn!("Failed to add certificate to root store: {}", e);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to load native certificates: {}. Using webpki roots.",
                        e
                    );
                }
            }

            if root_store.is_empty() {
                root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            }

            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth()
        };

        let mut client_config = quinn::ClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
                .map_err(|e| NetworkError::CertificateError(e.to_string()))?,
        ));
        client_config.transport_config(Arc::new(Self::transport_config(config)?));
        Ok(client_config)
    }

    /// A live connection to `remote_addr`, reusing a cached one when possible
    pub async fn connect(&self, remote_addr: SocketAddr) -> NetworkResult<Connection> {
        if let Some(conn) = self.connections.get(&remote_addr) {
            if conn.close_reason().is_none() {
                return Ok(conn.clone());
            }
        }
        self.connections.remove(&remote_addr);

        let conn = tokio::time::timeout(
            self.config.connect_timeout,
            self.connect_with_backoff(remote_addr),
        )
        .await
        .map_err(|_| NetworkError::Timeout(self.config.connect_timeout))??;

        self.connections.insert(remote_addr, conn.clone());
        self.stats.write().active_connections = self.connections.len();
        tracing::debug!("Connected to {}", remote_addr);
        Ok(conn)
    }

    /// Dial with retry using exponential backoff (backoff crate)
    async fn connect_with_backoff(&self, remote_addr: SocketAddr) -> NetworkResult<Connection> {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(2),
            max_elapsed_time: Some(self.config.connect_timeout),
            ..Default::default()
        };
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let result = match self.endpoint.connect(remote_addr, SERVER_NAME) {
                Ok(connecting) => connecting.await.map_err(NetworkError::from),
                Err(e) => return Err(e.into()),
            };

            match result {
                Ok(conn) => return Ok(conn),
                Err(e) => match backoff.next_backoff() {
                    Some(duration) => {
                        tracing::warn!(
                            "Connect to {} failed, retrying in {:?}: {}",
                            remote_addr,
                            duration,
                            e
                        );
                        self.stats.write().retries += 1;
                        tokio::time::sleep(duration).await;
                    }
                    None => return Err(NetworkError::MaxRetriesExceeded(attempts)),
                },
            }
        }
    }

    /// Open a request stream to `remote_addr`
    ///
    /// A cached connection that turns out to be dead is dropped and the
    /// stream is retried once on a fresh connection.
    pub async fn open_bi(&self, remote_addr: SocketAddr) -> NetworkResult<(SendStream, RecvStream)> {
        let conn = self.connect(remote_addr).await?;
        let streams = match conn.open_bi().await {
            Ok(streams) => streams,
            Err(e) => {
                tracing::debug!("Stale connection to {}: {}", remote_addr, e);
                self.connections.remove(&remote_addr);
                self.connect(remote_addr).await?.open_bi().await?
            }
        };
        self.stats.write().requests_sent += 1;
        Ok(streams)
    }

    /// Accept incoming connection
    pub async fn accept(&self) -> NetworkResult<Connection> {
        let incoming = self
            .endpoint
            .accept()
            .await
            .ok_or_else(|| NetworkError::ConnectionClosed("Endpoint closed".into()))?;

        let conn = incoming.await?;
        tracing::debug!("Accepted connection from {}", conn.remote_address());
        Ok(conn)
    }

    pub fn record_sent(&self, bytes: u64) {
        self.stats.write().total_bytes_sent += bytes;
    }

    pub fn record_received(&self, bytes: u64) {
        self.stats.write().total_bytes_received += bytes;
    }

    pub fn record_served(&self) {
        self.stats.write().requests_served += 1;
    }

    /// Get local address
    pub fn local_addr(&self) -> NetworkResult<SocketAddr> {
        self.endpoint.local_addr().map_err(NetworkError::IoError)
    }

    /// Get network statistics
    pub fn stats(&self) -> NetworkStats {
        self.stats.read().clone()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Close all connections and stop accepting new ones
    pub fn close(&self) {
        for entry in self.connections.iter() {
            entry.value().close(0u32.into(), b"closing");
        }
        self.connections.clear();
        self.endpoint.close(0u32.into(), b"shutdown");
    }
}

impl Drop for QuicTransport {
    fn drop(&mut self) {
        self.close();
    }
}

// Certificate verifier that accepts any certificate (INSECURE - for testing only)
#[derive(Debug)]
struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
