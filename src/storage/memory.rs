/// In-process memory tier with an LRU entry cap
///
/// Fastest tier in the chain. Holds at most `capacity` entries; inserting
/// past the cap evicts the least-recently-used key from this tier only -
/// slower tiers keep their copies.

use crate::cache::entry::CacheEntry;
use crate::errors::GatewayResult;
use crate::storage::StorageBackend;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Default)]
struct MemoryInner {
    entries: HashMap<String, CacheEntry>,
    access_order: VecDeque<String>, // front = least recently used
    evictions: u64,
}

#[derive(Debug)]
pub struct MemoryBackend {
    inner: Mutex<MemoryInner>,
    capacity: usize,
}

impl MemoryBackend {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// LRU evictions performed so far.
    pub fn evictions(&self) -> u64 {
        self.inner.lock().evictions
    }

    fn touch(inner: &mut MemoryInner, key: &str) {
        inner.access_order.retain(|k| k != key);
        inner.access_order.push_back(key.to_string());
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> GatewayResult<Option<CacheEntry>> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get(key) {
            let entry = entry.clone();
            Self::touch(&mut inner, key);
            Ok(Some(entry))
        } else {
            Ok(None)
        }
    }

    async fn peek(&self, key: &str) -> GatewayResult<Option<CacheEntry>> {
        Ok(self.inner.lock().entries.get(key).cloned())
    }

    async fn set(&self, entry: CacheEntry) -> GatewayResult<()> {
        let mut inner = self.inner.lock();

        // Evict LRU when inserting a new key at capacity
        if inner.entries.len() >= self.capacity && !inner.entries.contains_key(&entry.key) {
            if let Some(lru_key) = inner.access_order.pop_front() {
                inner.entries.remove(&lru_key);
                inner.evictions += 1;
                log::debug!("Memory tier evicted LRU key {}", lru_key);
            }
        }

        let key = entry.key.clone();
        inner.entries.insert(key.clone(), entry);
        Self::touch(&mut inner, &key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> GatewayResult<()> {
        let mut inner = self.inner.lock();
        inner.entries.remove(key);
        inner.access_order.retain(|k| k != key);
        Ok(())
    }

    async fn clear(&self) -> GatewayResult<()> {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.access_order.clear();
        Ok(())
    }

    async fn keys(&self) -> GatewayResult<Vec<String>> {
        Ok(self.inner.lock().entries.keys().cloned().collect())
    }
}
