/// Cache entry with absolute expiry and compression metadata

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    /// Unique per logical resource + params (see gateway cache key format)
    pub key: String,
    /// Serialized payload bytes, gzip-compressed when `is_compressed`
    pub payload: Vec<u8>,
    pub is_compressed: bool,
    pub original_size: usize,
    pub stored_size: usize,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Optional label for group invalidation
    pub tag: Option<String>,
}

impl CacheEntry {
    /// Build an entry expiring `ttl_secs` from now. `ttl_secs` must be > 0,
    /// which the cache engine validates before calling this.
    pub fn new(
        key: String,
        payload: Vec<u8>,
        is_compressed: bool,
        original_size: usize,
        ttl_secs: u64,
        tag: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let stored_size = payload.len();
        Self {
            key,
            payload,
            is_compressed,
            original_size,
            stored_size,
            created_at: now,
            expires_at: now + ChronoDuration::seconds(ttl_secs as i64),
            tag,
        }
    }

    /// An entry is live iff `now < expires_at`.
    pub fn is_live(&self) -> bool {
        Utc::now() < self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        !self.is_live()
    }

    /// Milliseconds until expiry (0 when already expired).
    pub fn expires_in_ms(&self) -> u64 {
        (self.expires_at - Utc::now()).num_milliseconds().max(0) as u64
    }
}
