//! Hot-cache tier in front of the content store

pub mod error;
pub mod health;
pub mod layer;
pub mod types;

pub use error::{CacheError, CacheResult};
pub use health::HealthProbe;
pub use layer::{CacheLayer, CacheMaintenance};
pub use types::{CacheConfig, CacheEntry, CacheStats, EvictionReport, LocalBlob};
