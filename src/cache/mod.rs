/// Cache engine: TTL expiry, tag invalidation and maintenance over the
/// tiered store
///
/// Owns the CacheEntry lifecycle end to end - callers above (the gateway)
/// only go through this API. Expired entries are evicted lazily on read and
/// by a periodic sweep; a corrupt entry is dropped and reported as a miss,
/// never surfaced as a wrong value.

use crate::compression::CompressionCodec;
use crate::errors::{GatewayError, GatewayResult};
use crate::storage::TieredStore;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub mod config;
pub mod entry;

pub use config::CacheConfig;
pub use entry::CacheEntry;

/// Counters for monitoring, folded into gateway stats
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub inserts: u64,
    pub invalidations: u64,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Secondary index: tag -> keys, plus the reverse direction so overwrites
/// and deletes clean up in O(1)
#[derive(Debug, Default)]
struct TagIndex {
    by_tag: HashMap<String, HashSet<String>>,
    tag_of: HashMap<String, String>,
}

impl TagIndex {
    fn record(&mut self, key: &str, tag: Option<&str>) {
        self.forget(key);
        if let Some(tag) = tag {
            self.by_tag
                .entry(tag.to_string())
                .or_default()
                .insert(key.to_string());
            self.tag_of.insert(key.to_string(), tag.to_string());
        }
    }

    fn forget(&mut self, key: &str) {
        if let Some(old_tag) = self.tag_of.remove(key) {
            if let Some(keys) = self.by_tag.get_mut(&old_tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_tag.remove(&old_tag);
                }
            }
        }
    }

    fn keys_for(&self, tag: &str) -> Vec<String> {
        self.by_tag
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn drop_tag(&mut self, tag: &str) {
        if let Some(keys) = self.by_tag.remove(tag) {
            for key in keys {
                self.tag_of.remove(&key);
            }
        }
    }
}

/// Result of a `compress_all` maintenance pass
#[derive(Debug, Clone, serde::Serialize)]
pub struct CompressionReport {
    pub scanned: usize,
    pub recompressed: usize,
    pub bytes_before: usize,
    pub bytes_after: usize,
}

/// Read-only health diagnostic (see `analyze_health`)
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub total_items: usize,
    pub uncompressed_items: usize,
    pub near_expiry_items: usize,
    pub large_items: usize,
    pub duplicate_keys: Vec<String>,
    pub by_tag: HashMap<String, usize>,
    pub recommendations: Vec<Recommendation>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Recommendation {
    /// Serialized as `type` in the diagnostics shape
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub action: String,
}

/// Overrides for a single health analysis; `None` falls back to the
/// engine's configured thresholds.
#[derive(Debug, Clone, Default)]
pub struct HealthOptions {
    pub near_expiry_window: Option<Duration>,
    pub large_entry_bytes: Option<usize>,
}

pub struct CacheEngine {
    store: TieredStore,
    codec: CompressionCodec,
    config: CacheConfig,
    tags: Mutex<TagIndex>,
    metrics: Mutex<CacheMetrics>,
}

impl CacheEngine {
    pub fn new(store: TieredStore, config: CacheConfig) -> GatewayResult<Self> {
        config.validate().map_err(GatewayError::Configuration)?;
        let codec = CompressionCodec::new(config.compression_threshold);
        Ok(Self {
            store,
            codec,
            config,
            tags: Mutex::new(TagIndex::default()),
            metrics: Mutex::new(CacheMetrics::default()),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.lock().clone()
    }

    /// Return the live value for `key`, or nothing. Expired entries are
    /// evicted on the spot; a corrupt entry is dropped and counted as a miss.
    pub async fn get(&self, key: &str) -> GatewayResult<Option<Value>> {
        let entry = match self.store.get(key).await? {
            Some(entry) => entry,
            None => {
                self.metrics.lock().misses += 1;
                return Ok(None);
            }
        };

        if entry.is_expired() {
            self.evict(key).await;
            let mut metrics = self.metrics.lock();
            metrics.misses += 1;
            metrics.expirations += 1;
            return Ok(None);
        }

        let payload = crate::compression::CompressedPayload {
            data: entry.payload,
            is_compressed: entry.is_compressed,
            original_size: entry.original_size,
            compressed_size: entry.stored_size,
        };

        match self.codec.decompress(&payload, key) {
            Ok(value) => {
                self.metrics.lock().hits += 1;
                Ok(Some(value))
            }
            Err(e) => {
                // Corruption is fatal for the entry, not for the caller
                log::warn!("Dropping corrupt cache entry: {}", e);
                self.evict(key).await;
                self.metrics.lock().misses += 1;
                Ok(None)
            }
        }
    }

    /// Store `value` under `key` for `ttl_secs` seconds, compressing
    /// oversized payloads and keeping the tag index in step with the write.
    pub async fn set(
        &self,
        key: &str,
        value: &Value,
        ttl_secs: u64,
        tag: Option<&str>,
    ) -> GatewayResult<()> {
        if ttl_secs == 0 {
            return Err(GatewayError::Configuration(
                "Cache TTL must be > 0 seconds".to_string(),
            ));
        }

        let payload = self.codec.compress(value)?;
        let entry = CacheEntry::new(
            key.to_string(),
            payload.data,
            payload.is_compressed,
            payload.original_size,
            ttl_secs,
            tag.map(str::to_string),
        );

        self.store.set(entry).await?;
        self.tags.lock().record(key, tag);
        self.metrics.lock().inserts += 1;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> GatewayResult<()> {
        self.evict(key).await;
        Ok(())
    }

    pub async fn clear(&self) -> GatewayResult<()> {
        self.store.clear().await?;
        let mut tags = self.tags.lock();
        *tags = TagIndex::default();
        Ok(())
    }

    /// Delete every entry tagged `tag`. Besides the in-memory index, tier
    /// keys carrying the `":{tag}"` suffix are scanned so entries written by
    /// a previous process are invalidated too. Returns the number of keys
    /// removed.
    pub async fn invalidate_tag(&self, tag: &str) -> GatewayResult<usize> {
        let mut targets: HashSet<String> = self.tags.lock().keys_for(tag).into_iter().collect();

        let suffix = format!(":{}", tag);
        for key in self.store.keys().await? {
            if key.ends_with(&suffix) {
                targets.insert(key);
            }
        }

        for key in &targets {
            self.store.delete(key).await?;
        }

        self.tags.lock().drop_tag(tag);

        let removed = targets.len();
        self.metrics.lock().invalidations += removed as u64;
        log::debug!("Invalidated {} entries tagged {}", removed, tag);
        Ok(removed)
    }

    /// Check-then-fetch-then-store. Concurrent callers for the same key may
    /// each run `producer` (at-least-once, last write wins) - there is
    /// deliberately no cross-task lock here.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        ttl_secs: u64,
        tag: Option<&str>,
        producer: F,
    ) -> GatewayResult<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<Value>>,
    {
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }

        let value = producer().await?;
        if let Err(e) = self.set(key, &value, ttl_secs, tag).await {
            // A failed write-back must not cost the caller the fetched value
            log::warn!("Cache write-back for {} failed: {}", key, e);
        }
        Ok(value)
    }

    /// Maintenance: recompress stored entries. Entries above `threshold`
    /// (default: the configured compression threshold) that are not yet
    /// compressed are rewritten; `force_all` recompresses every uncompressed
    /// entry regardless of size. Returns before/after stored-byte totals
    /// over the entries scanned.
    pub async fn compress_all(
        &self,
        threshold: Option<usize>,
        force_all: bool,
    ) -> GatewayResult<CompressionReport> {
        let threshold = threshold.unwrap_or(self.config.compression_threshold);
        let mut report = CompressionReport {
            scanned: 0,
            recompressed: 0,
            bytes_before: 0,
            bytes_after: 0,
        };

        for key in self.store.keys().await? {
            let entry = match self.store.peek(&key).await? {
                Some(entry) => entry,
                None => continue,
            };
            if entry.is_expired() {
                continue;
            }

            report.scanned += 1;
            report.bytes_before += entry.stored_size;

            let should_compress =
                !entry.is_compressed && (force_all || entry.stored_size > threshold);
            if !should_compress {
                report.bytes_after += entry.stored_size;
                continue;
            }

            let compressed = self.codec.compress_raw(&entry.payload)?;
            if compressed.len() >= entry.stored_size {
                // Incompressible payload, leave it alone
                report.bytes_after += entry.stored_size;
                continue;
            }

            let mut rewritten = entry.clone();
            rewritten.payload = compressed;
            rewritten.stored_size = rewritten.payload.len();
            rewritten.is_compressed = true;

            report.bytes_after += rewritten.stored_size;
            report.recompressed += 1;
            self.store.set_all_tiers(rewritten).await?;
        }

        log::info!(
            "compress_all: {} scanned, {} recompressed, {} -> {} bytes",
            report.scanned,
            report.recompressed,
            report.bytes_before,
            report.bytes_after
        );
        Ok(report)
    }

    /// Read-only diagnostic over all tiers: expiry pressure, compression
    /// candidates, size outliers and cross-tier inconsistencies. Never
    /// mutates tier state (uses peeking reads only).
    pub async fn analyze_health(&self, options: HealthOptions) -> GatewayResult<HealthReport> {
        let near_window = chrono::Duration::from_std(
            options
                .near_expiry_window
                .unwrap_or(self.config.near_expiry_window),
        )
        .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let large_bytes = options
            .large_entry_bytes
            .unwrap_or(self.config.large_entry_bytes);

        let mut report = HealthReport {
            total_items: 0,
            uncompressed_items: 0,
            near_expiry_items: 0,
            large_items: 0,
            duplicate_keys: Vec::new(),
            by_tag: HashMap::new(),
            recommendations: Vec::new(),
        };

        // Per-tier snapshots, then compare copies of the same key across tiers
        let mut seen: HashMap<String, CacheEntry> = HashMap::new();
        let mut inconsistent: HashSet<String> = HashSet::new();

        for backend in self.store.backends() {
            let keys = match backend.keys().await {
                Ok(keys) => keys,
                Err(e) => {
                    log::warn!("Health scan skipping tier {}: {}", backend.name(), e);
                    continue;
                }
            };

            for key in keys {
                let entry = match backend.peek(&key).await {
                    Ok(Some(entry)) => entry,
                    _ => continue,
                };

                match seen.get(&key) {
                    Some(first) => {
                        if first.stored_size != entry.stored_size
                            || first.expires_at != entry.expires_at
                        {
                            inconsistent.insert(key.clone());
                        }
                        continue; // counted once, on first sight
                    }
                    None => {
                        seen.insert(key.clone(), entry.clone());
                    }
                }

                if entry.is_expired() {
                    continue;
                }

                report.total_items += 1;
                if !entry.is_compressed && entry.stored_size > self.config.compression_threshold {
                    report.uncompressed_items += 1;
                }
                if chrono::Utc::now() + near_window >= entry.expires_at {
                    report.near_expiry_items += 1;
                }
                if entry.stored_size > large_bytes {
                    report.large_items += 1;
                }
                if let Some(tag) = &entry.tag {
                    *report.by_tag.entry(tag.clone()).or_insert(0) += 1;
                }
            }
        }

        report.duplicate_keys = inconsistent.into_iter().collect();
        report.duplicate_keys.sort();

        if report.uncompressed_items > 0 {
            report.recommendations.push(Recommendation {
                kind: "compression".to_string(),
                message: format!(
                    "{} entries exceed the compression threshold but are stored uncompressed",
                    report.uncompressed_items
                ),
                action: "run compress_all".to_string(),
            });
        }
        if !report.duplicate_keys.is_empty() {
            report.recommendations.push(Recommendation {
                kind: "consistency".to_string(),
                message: format!(
                    "{} keys differ between tiers",
                    report.duplicate_keys.len()
                ),
                action: "delete and re-fetch the listed keys".to_string(),
            });
        }
        if report.total_items > 0 && report.near_expiry_items * 2 > report.total_items {
            report.recommendations.push(Recommendation {
                kind: "expiry".to_string(),
                message: "more than half of all entries are close to expiry".to_string(),
                action: "consider longer TTLs or proactive refresh".to_string(),
            });
        }

        Ok(report)
    }

    /// Evict expired entries from every tier. Returns the number of keys
    /// removed. Invoked by the background sweeper and available directly.
    pub async fn sweep_expired(&self) -> GatewayResult<usize> {
        let mut removed = 0;
        for key in self.store.keys().await? {
            if let Some(entry) = self.store.peek(&key).await? {
                if entry.is_expired() {
                    self.evict(&key).await;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            self.metrics.lock().expirations += removed as u64;
            log::debug!("Expiry sweep removed {} entries", removed);
        }
        Ok(removed)
    }

    /// Spawn the periodic expiry sweep. Runs on the configured interval
    /// (default 5 minutes) independent of request traffic; never blocks
    /// foreground requests.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.config.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick fires immediately, skip it
            loop {
                ticker.tick().await;
                if let Err(e) = engine.sweep_expired().await {
                    log::warn!("Expiry sweep failed: {}", e);
                }
            }
        })
    }

    async fn evict(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            log::warn!("Failed to evict {}: {}", key, e);
        }
        self.tags.lock().forget(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryBackend, SqliteBackend, StorageBackend};
    use serde_json::json;
    use std::time::Duration;

    fn engine_with_tiers() -> (Arc<CacheEngine>, Arc<MemoryBackend>, SqliteBackend) {
        let memory = Arc::new(MemoryBackend::new(100));
        let sqlite = SqliteBackend::open_in_memory().unwrap();
        let store = TieredStore::new(vec![
            memory.clone() as Arc<dyn StorageBackend>,
            Arc::new(sqlite.clone()),
        ])
        .unwrap();
        let engine = Arc::new(CacheEngine::new(store, CacheConfig::default()).unwrap());
        (engine, memory, sqlite)
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let (engine, _, _) = engine_with_tiers();
        let value = json!({"rune": "UNCOMMONGOODS", "supply": "21000000"});

        engine.set("k", &value, 120, None).await.unwrap();
        assert_eq!(engine.get("k").await.unwrap(), Some(value));

        let metrics = engine.metrics();
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.inserts, 1);
    }

    #[tokio::test]
    async fn large_values_round_trip_through_compression() {
        let (engine, _, _) = engine_with_tiers();
        let rows: Vec<Value> = (0..300)
            .map(|i| json!({"rune": format!("RUNE{}", i), "price_sats": i}))
            .collect();
        let value = Value::Array(rows);

        engine.set("big", &value, 120, None).await.unwrap();
        assert_eq!(engine.get("big").await.unwrap(), Some(value));
    }

    #[tokio::test]
    async fn expired_entries_are_missed_without_sweep() {
        let (engine, _, _) = engine_with_tiers();
        engine.set("k", &json!(1), 1, None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(engine.get("k").await.unwrap(), None);
        assert_eq!(engine.metrics().expirations, 1);
    }

    #[tokio::test]
    async fn tag_invalidation_spares_other_tags() {
        let (engine, _, _) = engine_with_tiers();
        engine.set("a", &json!(1), 300, Some("runes")).await.unwrap();
        engine.set("b", &json!(2), 300, Some("runes")).await.unwrap();
        engine.set("c", &json!(3), 300, Some("pools")).await.unwrap();

        let removed = engine.invalidate_tag("runes").await.unwrap();
        assert_eq!(removed, 2);

        assert_eq!(engine.get("a").await.unwrap(), None);
        assert_eq!(engine.get("b").await.unwrap(), None);
        assert_eq!(engine.get("c").await.unwrap(), Some(json!(3)));
    }

    #[tokio::test]
    async fn invalidate_tag_catches_suffixed_keys_not_in_index() {
        let (engine, memory, _) = engine_with_tiers();
        // Simulate an entry written by a previous process: present in a tier
        // but unknown to the in-memory tag index
        let stale = CacheEntry::new(
            "ordiscan:/runes/list:{}:runes".to_string(),
            b"[]".to_vec(),
            false,
            2,
            300,
            Some("runes".to_string()),
        );
        memory.set(stale).await.unwrap();

        let removed = engine.invalidate_tag("runes").await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(engine.get("ordiscan:/runes/list:{}:runes").await.unwrap(), None);
    }

    #[tokio::test]
    async fn retagging_a_key_moves_it_between_tags() {
        let (engine, _, _) = engine_with_tiers();
        engine.set("k", &json!(1), 300, Some("old")).await.unwrap();
        engine.set("k", &json!(2), 300, Some("new")).await.unwrap();

        assert_eq!(engine.invalidate_tag("old").await.unwrap(), 0);
        assert_eq!(engine.get("k").await.unwrap(), Some(json!(2)));
        assert_eq!(engine.invalidate_tag("new").await.unwrap(), 1);
        assert_eq!(engine.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_or_fetch_only_fetches_on_miss() {
        let (engine, _, _) = engine_with_tiers();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let value = engine
                .get_or_fetch("k", 300, None, move || async move {
                    calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok(json!({"fetched": true}))
                })
                .await
                .unwrap();
            assert_eq!(value, json!({"fetched": true}));
        }

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn corrupt_entry_is_dropped_and_treated_as_miss() {
        let (engine, memory, _) = engine_with_tiers();

        let corrupt = CacheEntry::new(
            "bad".to_string(),
            vec![0x1f, 0x8b, 0x00, 0xff], // claims gzip, is garbage
            true,
            5000,
            300,
            None,
        );
        memory.set(corrupt).await.unwrap();

        assert_eq!(engine.get("bad").await.unwrap(), None);
        // Entry was evicted, not left to fail again
        assert!(memory.peek("bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn compress_all_rewrites_oversized_uncompressed_entries() {
        let (engine, memory, _) = engine_with_tiers();

        // Bypass the codec so the stored entry is uncompressed and large
        let blob = serde_json::to_vec(&json!(vec!["x".repeat(50); 100])).unwrap();
        let len = blob.len();
        let oversized = CacheEntry::new("fat".to_string(), blob, false, len, 300, None);
        memory.set(oversized).await.unwrap();

        let report = engine.compress_all(Some(1024), false).await.unwrap();
        assert_eq!(report.recompressed, 1);
        assert!(report.bytes_after < report.bytes_before);

        // Still readable after the rewrite
        assert!(engine.get("fat").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn health_report_counts_and_recommends() {
        let (engine, memory, _) = engine_with_tiers();
        engine.set("a", &json!(1), 300, Some("runes")).await.unwrap();

        let blob = serde_json::to_vec(&json!(vec!["y".repeat(80); 200])).unwrap();
        let len = blob.len();
        memory
            .set(CacheEntry::new("fat".to_string(), blob, false, len, 300, None))
            .await
            .unwrap();

        let report = engine.analyze_health(HealthOptions::default()).await.unwrap();
        assert_eq!(report.total_items, 2);
        assert_eq!(report.uncompressed_items, 1);
        assert!(report.large_items >= 1);
        assert_eq!(report.by_tag.get("runes"), Some(&1));
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.kind == "compression"));

        // Dashboards read the recommendation kind under "type"
        let serialized = serde_json::to_value(&report).unwrap();
        assert_eq!(
            serialized["recommendations"][0]["type"],
            json!("compression")
        );
    }

    #[tokio::test]
    async fn sweep_removes_expired_across_tiers() {
        let (engine, _, sqlite) = engine_with_tiers();
        engine.set("short", &json!(1), 1, None).await.unwrap();
        engine.set("long", &json!(2), 600, None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let removed = engine.sweep_expired().await.unwrap();
        assert_eq!(removed, 1);

        assert!(sqlite.get("short").await.unwrap().is_none());
        assert_eq!(engine.get("long").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn zero_ttl_is_rejected() {
        let (engine, _, _) = engine_with_tiers();
        assert!(engine.set("k", &json!(1), 0, None).await.is_err());
    }
}
