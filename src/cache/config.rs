//! Cache configuration

use std::time::Duration;

/// Default time-to-live applied when `set` gets no explicit TTL
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default fast tier capacity
pub const DEFAULT_MAX_SIZE: usize = 100;

/// Default interval between background sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for a [`Cache`](super::Cache)
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL used when a write does not specify one
    pub default_ttl: Duration,
    /// Maximum number of entries held by the fast tier
    pub max_size: usize,
    /// Interval between sweeps of expired entries
    pub sweep_interval: Duration,
    /// Upper bound on durable records, enforced by each sweep
    pub durable_max_entries: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL,
            max_size: DEFAULT_MAX_SIZE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            durable_max_entries: None,
        }
    }
}

impl CacheConfig {
    /// Sets the default TTL
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Sets the fast tier capacity (at least one entry)
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size.max(1);
        self
    }

    /// Sets the sweep interval
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Bounds the number of durable records kept after each sweep
    pub fn with_durable_max_entries(mut self, max: usize) -> Self {
        self.durable_max_entries = Some(max);
        self
    }
}
