//! Metrics and observability module
//!
//! Provides Prometheus-compatible metrics for monitoring deltavault.
//!
//! Key metrics exposed:
//! - Delta hit rate and diff duration
//! - Upload routes and fallback reasons
//! - Store commits and deduplication
//! - Cache hits, evictions and health

pub mod exporter;
pub mod recorder;

pub use exporter::{get_handle, render_metrics, start_metrics_server, MetricsConfig, MetricsError};
pub use recorder::*;
