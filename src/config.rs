//! Process configuration
//!
//! Loaded from a JSON file; every field has a default so a config file only
//! names what it changes. Durations are written as integer milliseconds.

use crate::cache::CacheConfig;
use crate::metrics::MetricsConfig;
use crate::network::ConnectionConfig;
use crate::storage::StorageConfig;
use crate::sync::wire::MAX_DATA_LEN;
use crate::transfer::DeltaConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub delta: DeltaConfig,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub network: ConnectionConfig,
    /// Prometheus exporter; disabled when absent
    pub metrics: Option<MetricsConfig>,
}

impl Config {
    /// Read, parse and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&raw)?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_json(raw: &str) -> ConfigResult<Self> {
        let config: Config = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let delta = &self.delta;
        if delta.block_size == 0 || u32::try_from(delta.block_size).is_err() {
            return Err(invalid(format!("delta.block_size {} out of range", delta.block_size)));
        }
        if !(0.0..=1.0).contains(&delta.reuse_threshold) {
            return Err(invalid(format!(
                "delta.reuse_threshold {} must be within [0, 1]",
                delta.reuse_threshold
            )));
        }
        if delta.max_literal_run == 0 || delta.max_literal_run > MAX_DATA_LEN as usize {
            return Err(invalid(format!(
                "delta.max_literal_run must be within 1..={}",
                MAX_DATA_LEN
            )));
        }

        let cache = &self.cache;
        if cache.probe_size == 0 {
            return Err(invalid("cache.probe_size must be positive"));
        }
        for (name, value) in [
            ("cache.probe_timeout_ms", cache.probe_timeout),
            ("cache.probe_interval_ms", cache.probe_interval),
            ("cache.eviction_interval_ms", cache.eviction_interval),
            ("network.connect_timeout_ms", self.network.connect_timeout),
            ("network.request_timeout_ms", self.network.request_timeout),
        ] {
            if value.is_zero() {
                return Err(invalid(format!("{name} must be positive")));
            }
        }
        if !(cache.low_watermark > 0.0 && cache.low_watermark <= 1.0) {
            return Err(invalid(format!(
                "cache.low_watermark {} must be within (0, 1]",
                cache.low_watermark
            )));
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

/// Serde adapter storing a [`Duration`] as integer milliseconds
pub mod duration_ms {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BackendConfig;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config.delta.block_size, 2048);
        assert_eq!(config.delta.reuse_threshold, 0.2);
        assert!(config.cache.enabled);
        assert!(config.metrics.is_none());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "delta": {{ "block_size": 4096, "reuse_threshold": 0.5 }},
                "storage": {{
                    "backend": {{ "type": "object_store", "url": "memory:///" }},
                    "staging_dir": "/tmp/staging"
                }},
                "cache": {{ "probe_timeout_ms": 250 }},
                "network": {{ "connect_timeout_ms": 1500 }},
                "metrics": {{ "listen_addr": "127.0.0.1:9100" }}
            }}"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.delta.block_size, 4096);
        assert_eq!(config.delta.reuse_threshold, 0.5);
        assert_eq!(
            config.storage.backend,
            BackendConfig::ObjectStore {
                url: "memory:///".into(),
                prefix: String::new(),
            }
        );
        assert_eq!(config.cache.probe_timeout, Duration::from_millis(250));
        assert_eq!(config.network.connect_timeout, Duration::from_millis(1500));
        assert_eq!(config.metrics.unwrap().listen_addr.port(), 9100);
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load("/nonexistent/deltavault.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_rejects_invalid_values() {
        for raw in [
            r#"{"delta": {"block_size": 0}}"#,
            r#"{"delta": {"reuse_threshold": 1.5}}"#,
            r#"{"delta": {"reuse_threshold": -0.1}}"#,
            r#"{"delta": {"max_literal_run": 0}}"#,
            r#"{"cache": {"probe_size": 0}}"#,
            r#"{"cache": {"probe_timeout_ms": 0}}"#,
            r#"{"cache": {"low_watermark": 0.0}}"#,
            r#"{"cache": {"low_watermark": 1.1}}"#,
            r#"{"network": {"request_timeout_ms": 0}}"#,
        ] {
            let err = Config::from_json(raw).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{raw} gave {err}");
        }

        assert!(matches!(
            Config::from_json("{not json").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn test_durations_serialize_as_millis() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(json["cache"]["probe_timeout_ms"], 5000);
        assert_eq!(json["network"]["connect_timeout_ms"], 10_000);

        let back: Config = serde_json::from_value(json).unwrap();
        back.validate().unwrap();
    }
}
