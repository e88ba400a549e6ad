/// Storage backends for the tiered cache
///
/// Each tier implements [`StorageBackend`] with the same get/set/delete/clear
/// contract; [`TieredStore`] chains them fastest-first. The shipped backends
/// are an in-process memory map with an LRU cap, a durable sqlite store, and
/// a JSON-file fallback store.

use crate::cache::entry::CacheEntry;
use crate::errors::GatewayResult;
use async_trait::async_trait;

pub mod file;
pub mod memory;
pub mod sqlite;
pub mod tiered;

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use tiered::TieredStore;

/// Unified contract every cache tier implements.
///
/// Implementations must be safe to share across tasks; slower tiers are
/// allowed to block briefly inside their async methods (sqlite does).
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Stable identifier used in logs, errors and health reports.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> GatewayResult<Option<CacheEntry>>;

    /// Read without side effects (no LRU touch). Defaults to `get` for
    /// backends whose reads are already effect-free.
    async fn peek(&self, key: &str) -> GatewayResult<Option<CacheEntry>> {
        self.get(key).await
    }

    async fn set(&self, entry: CacheEntry) -> GatewayResult<()>;

    async fn delete(&self, key: &str) -> GatewayResult<()>;

    async fn clear(&self) -> GatewayResult<()>;

    /// All keys currently held, including expired ones (maintenance scans
    /// decide what to do with them).
    async fn keys(&self) -> GatewayResult<Vec<String>>;
}
