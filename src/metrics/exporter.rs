//! Prometheus metrics exporter
//!
//! Exposes metrics via HTTP for Prometheus scraping.

use crate::metrics::recorder::init_metrics;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing::info;

/// Global prometheus handle
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Address to bind the metrics server
    pub listen_addr: SocketAddr,

    /// Histogram buckets for the hit rate, which lives in `[0, 1]`
    pub hit_rate_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            hit_rate_buckets: vec![0.0, 0.1, 0.2, 0.3, 0.5, 0.7, 0.9, 0.99, 1.0],
        }
    }
}

impl MetricsConfig {
    /// Create a new config with custom address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            listen_addr: addr,
            ..Default::default()
        }
    }
}

/// Initialize and start the metrics exporter
///
/// Returns the handle to render metrics manually if needed.
/// This function can only be called once; subsequent calls return the existing handle.
pub fn start_metrics_server(
    config: MetricsConfig,
) -> Result<&'static PrometheusHandle, MetricsError> {
    init_metrics();

    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }

    let mut builder = PrometheusBuilder::new().with_http_listener(config.listen_addr);
    if !config.hit_rate_buckets.is_empty() {
        builder = builder
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Full("deltavault_delta_hit_rate".into()),
                &config.hit_rate_buckets,
            )
            .map_err(|e| MetricsError::SetupFailed(e.to_string()))?;
    }

    // Must run inside a tokio runtime; the exporter future serves scrapes
    let (recorder, exporter) = builder
        .build()
        .map_err(|e| MetricsError::SetupFailed(e.to_string()))?;
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|e| MetricsError::SetupFailed(e.to_string()))?;
    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            tracing::error!("Metrics exporter stopped: {:?}", e);
        }
    });
    info!("Serving metrics on http://{}/metrics", config.listen_addr);

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Get the current prometheus handle (if initialized)
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics as a string
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

/// Errors that can occur during metrics setup
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to setup metrics: {0}")]
    SetupFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_config_default() {
        let config = MetricsConfig::default();
        assert_eq!(config.listen_addr.port(), 9090);
        assert_eq!(config.hit_rate_buckets.last(), Some(&1.0));
    }

    #[test]
    fn test_metrics_config_from_json() {
        let config: MetricsConfig =
            serde_json::from_str(r#"{"listen_addr": "127.0.0.1:9191"}"#).unwrap();
        assert_eq!(config.listen_addr.port(), 9191);
        assert!(!config.hit_rate_buckets.is_empty());
    }

    // Note: Can't easily test start_metrics_server in unit tests due to global state
}
