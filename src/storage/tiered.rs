/// Ordered chain of storage backends, fastest first
///
/// `get` probes tiers in order and stops at the first hit; a hit from a
/// slower tier is promoted to the faster tiers in a spawned task so the
/// caller never waits on the write-back. `set` writes the primary tier
/// synchronously and the slower tiers best-effort in the background. A
/// failing tier is logged and skipped - the chain keeps working with
/// whatever backends remain, down to memory-only.

use crate::cache::entry::CacheEntry;
use crate::errors::{GatewayError, GatewayResult};
use crate::storage::StorageBackend;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Clone)]
pub struct TieredStore {
    backends: Vec<Arc<dyn StorageBackend>>,
}

impl TieredStore {
    pub fn new(backends: Vec<Arc<dyn StorageBackend>>) -> GatewayResult<Self> {
        if backends.is_empty() {
            return Err(GatewayError::Configuration(
                "TieredStore requires at least one backend".to_string(),
            ));
        }
        Ok(Self { backends })
    }

    /// Tiers in probe order; maintenance scans iterate these directly.
    pub fn backends(&self) -> &[Arc<dyn StorageBackend>] {
        &self.backends
    }

    pub fn tier_count(&self) -> usize {
        self.backends.len()
    }

    /// Probe tiers in order, returning the first live copy found. Promotes
    /// slower-tier hits to every faster tier without blocking the caller.
    pub async fn get(&self, key: &str) -> GatewayResult<Option<CacheEntry>> {
        for (idx, backend) in self.backends.iter().enumerate() {
            match backend.get(key).await {
                Ok(Some(entry)) => {
                    if idx > 0 {
                        self.promote(entry.clone(), idx);
                    }
                    return Ok(Some(entry));
                }
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("Tier {} failed on get({}): {}", backend.name(), key, e);
                    continue;
                }
            }
        }
        Ok(None)
    }

    /// Probe tiers in order without triggering promotion. Used by read-only
    /// diagnostics so they never mutate tier state.
    pub async fn peek(&self, key: &str) -> GatewayResult<Option<CacheEntry>> {
        for backend in &self.backends {
            match backend.peek(key).await {
                Ok(Some(entry)) => return Ok(Some(entry)),
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("Tier {} failed on peek({}): {}", backend.name(), key, e);
                    continue;
                }
            }
        }
        Ok(None)
    }

    /// Write-through: the primary tier synchronously (its failure fails the
    /// set), slower tiers best-effort in the background.
    pub async fn set(&self, entry: CacheEntry) -> GatewayResult<()> {
        self.backends[0].set(entry.clone()).await?;

        for backend in self.backends.iter().skip(1) {
            let backend = backend.clone();
            let entry = entry.clone();
            tokio::spawn(async move {
                if let Err(e) = backend.set(entry).await {
                    log::warn!("Tier {} failed on background set: {}", backend.name(), e);
                }
            });
        }
        Ok(())
    }

    /// Synchronous write to every tier. Used where the caller needs the
    /// slower tiers settled before continuing (maintenance rewrites).
    pub async fn set_all_tiers(&self, entry: CacheEntry) -> GatewayResult<()> {
        for backend in &self.backends {
            if let Err(e) = backend.set(entry.clone()).await {
                log::warn!("Tier {} failed on set: {}", backend.name(), e);
            }
        }
        Ok(())
    }

    /// Delete from every tier. Individual tier failures are logged and do
    /// not stop the remaining deletes (best-effort durability).
    pub async fn delete(&self, key: &str) -> GatewayResult<()> {
        for backend in &self.backends {
            if let Err(e) = backend.delete(key).await {
                log::warn!("Tier {} failed on delete({}): {}", backend.name(), key, e);
            }
        }
        Ok(())
    }

    pub async fn clear(&self) -> GatewayResult<()> {
        for backend in &self.backends {
            if let Err(e) = backend.clear().await {
                log::warn!("Tier {} failed on clear: {}", backend.name(), e);
            }
        }
        Ok(())
    }

    /// Union of keys across all tiers.
    pub async fn keys(&self) -> GatewayResult<Vec<String>> {
        let mut all = HashSet::new();
        for backend in &self.backends {
            match backend.keys().await {
                Ok(keys) => all.extend(keys),
                Err(e) => log::warn!("Tier {} failed on keys(): {}", backend.name(), e),
            }
        }
        Ok(all.into_iter().collect())
    }

    fn promote(&self, entry: CacheEntry, found_at: usize) {
        let faster: Vec<Arc<dyn StorageBackend>> = self.backends[..found_at].to_vec();
        tokio::spawn(async move {
            for backend in faster {
                if let Err(e) = backend.set(entry.clone()).await {
                    log::warn!(
                        "Read-through promotion to tier {} failed: {}",
                        backend.name(),
                        e
                    );
                }
            }
        });
    }
}
