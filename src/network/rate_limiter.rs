//! Upload bandwidth limiting using the governor crate

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Granularity of the byte quota
const UNIT_BYTES: usize = 1024;

/// Throttles outgoing request bodies
#[derive(Clone)]
pub struct TransferRateLimiter {
    /// KiB per second limiter
    bytes_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    enabled: bool,
}

impl TransferRateLimiter {
    /// Create a limiter allowing `bytes_per_second` (0 = unlimited)
    pub fn new(bytes_per_second: u32) -> Self {
        let units_per_second = if bytes_per_second > 0 {
            NonZeroU32::new((bytes_per_second / UNIT_BYTES as u32).max(1))
        } else {
            None
        }
        .unwrap_or(NonZeroU32::MAX);

        Self {
            bytes_limiter: Arc::new(RateLimiter::direct(Quota::per_second(units_per_second))),
            enabled: bytes_per_second > 0,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Wait until we're allowed to send the specified number of bytes
    pub async fn wait_for_bytes(&self, bytes: usize) {
        if !self.enabled {
            return;
        }

        let units = bytes.div_ceil(UNIT_BYTES).max(1);
        for _ in 0..units {
            self.bytes_limiter.until_ready().await;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for TransferRateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_unlimited_rate_limiter() {
        let limiter = TransferRateLimiter::unlimited();
        assert!(!limiter.is_enabled());

        let start = Instant::now();
        for _ in 0..100 {
            limiter.wait_for_bytes(1024 * 1024).await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_limited_bytes_eventually_pass() {
        // 64 KiB/s with a burst of 64 units
        let limiter = TransferRateLimiter::new(64 * 1024);
        assert!(limiter.is_enabled());

        let start = Instant::now();
        limiter.wait_for_bytes(80 * 1024).await;
        let elapsed = start.elapsed();

        // The burst covers 64 units, the remaining 16 take ~250ms
        assert!(elapsed >= Duration::from_millis(150), "took {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(5));
    }
}
