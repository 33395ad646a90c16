use crate::network::error::NetworkError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub bind_addr: SocketAddr,
    #[serde(rename = "max_idle_timeout_ms", with = "crate::config::duration_ms")]
    pub max_idle_timeout: Duration,
    #[serde(rename = "keep_alive_interval_ms", with = "crate::config::duration_ms")]
    pub keep_alive_interval: Duration,
    pub max_concurrent_streams: u32,
    /// Upper bound on establishing a connection, retries included
    #[serde(rename = "connect_timeout_ms", with = "crate::config::duration_ms")]
    pub connect_timeout: Duration,
    /// Upper bound on one request, body transfer included
    #[serde(rename = "request_timeout_ms", with = "crate::config::duration_ms")]
    pub request_timeout: Duration,
    /// Accept any server certificate. Only for self-signed test peers.
    pub insecure_skip_verify: bool,
    /// Upload bandwidth cap; 0 disables throttling
    pub max_upload_bytes_per_sec: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            max_idle_timeout: Duration::from_secs(60),
            keep_alive_interval: Duration::from_secs(5),
            max_concurrent_streams: 100,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(300),
            insecure_skip_verify: false,
            max_upload_bytes_per_sec: 0,
        }
    }
}

/// A resource on a remote peer, written `host:port/resource`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEndpoint {
    pub addr: SocketAddr,
    pub resource: String,
}

impl FromStr for PeerEndpoint {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, resource) = s
            .split_once('/')
            .ok_or_else(|| NetworkError::InvalidAddress(format!("{s}: missing /resource")))?;
        if resource.is_empty() {
            return Err(NetworkError::InvalidAddress(format!("{s}: empty resource")));
        }

        let addr = match host.parse::<SocketAddr>() {
            Ok(addr) => addr,
            Err(_) => host
                .to_socket_addrs()
                .map_err(|e| NetworkError::InvalidAddress(format!("{host}: {e}")))?
                .next()
                .ok_or_else(|| NetworkError::InvalidAddress(format!("{host}: no address")))?,
        };

        Ok(Self {
            addr,
            resource: resource.to_string(),
        })
    }
}

impl fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.resource)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
    pub requests_sent: u64,
    pub requests_served: u64,
    pub retries: u64,
    pub active_connections: usize,
}
