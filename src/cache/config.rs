/// Cache engine configuration
///
/// Explicit typed fields with documented defaults, validated at construction.
/// Presets cover the TTL classes the analytics call sites actually use.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied when a caller does not specify one (seconds, > 0)
    pub default_ttl_secs: u64,

    /// Maximum entries held by the memory tier (LRU eviction past this)
    pub memory_capacity: usize,

    /// Payloads serialized larger than this are gzip-compressed (bytes)
    pub compression_threshold: usize,

    /// How often the background sweep evicts expired entries
    pub sweep_interval: Duration,

    /// Entries expiring within this window count as "near expiry" in
    /// health reports
    pub near_expiry_window: Duration,

    /// Stored size above which an entry counts as "large" in health reports
    pub large_entry_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            memory_capacity: 500,
            compression_threshold: 1024,
            sweep_interval: Duration::from_secs(300),
            near_expiry_window: Duration::from_secs(60),
            large_entry_bytes: 10 * 1024,
        }
    }
}

impl CacheConfig {
    /// Market data: short TTL, high churn.
    pub fn market_data() -> Self {
        Self {
            default_ttl_secs: 120,
            memory_capacity: 2000,
            ..Self::default()
        }
    }

    /// Token metadata: changes rarely, long TTL.
    pub fn token_metadata() -> Self {
        Self {
            default_ttl_secs: 3600,
            memory_capacity: 5000,
            ..Self::default()
        }
    }

    /// Custom TTL and capacity, everything else default.
    pub fn custom(default_ttl_secs: u64, memory_capacity: usize) -> Self {
        Self {
            default_ttl_secs,
            memory_capacity,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.default_ttl_secs == 0 {
            return Err("default_ttl_secs must be > 0".to_string());
        }
        if self.memory_capacity == 0 {
            return Err("memory_capacity must be > 0".to_string());
        }
        if self.sweep_interval.is_zero() {
            return Err("sweep_interval must be > 0".to_string());
        }
        Ok(())
    }
}
