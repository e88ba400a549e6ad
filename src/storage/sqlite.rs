/// Durable cache tier backed by sqlite
///
/// One table keyed by cache key; payload stored as a BLOB with compression
/// metadata and millisecond-precision timestamps alongside. Survives process
/// restarts, which is what makes the fallback chain worth having.

use crate::cache::entry::CacheEntry;
use crate::errors::{GatewayError, GatewayResult};
use crate::storage::StorageBackend;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Open (or create) the cache database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let conn = Connection::open(path).map_err(|e| GatewayError::Storage {
            backend: "sqlite".to_string(),
            reason: format!("Failed to open database: {}", e),
        })?;
        Self::from_connection(conn)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> GatewayResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| GatewayError::Storage {
            backend: "sqlite".to_string(),
            reason: format!("Failed to open in-memory database: {}", e),
        })?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> GatewayResult<Self> {
        let backend = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        backend.create_tables()?;
        Ok(backend)
    }

    fn create_tables(&self) -> GatewayResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                payload BLOB NOT NULL,
                is_compressed INTEGER NOT NULL,
                original_size INTEGER NOT NULL,
                stored_size INTEGER NOT NULL,
                created_at_ms INTEGER NOT NULL,
                expires_at_ms INTEGER NOT NULL,
                tag TEXT
            )",
            [],
        )
        .map_err(storage_err)?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_cache_entries_expires ON cache_entries(expires_at_ms)",
            [],
        )
        .map_err(storage_err)?;

        Ok(())
    }

    /// Delete every entry whose expiry is in the past. Returns the number of
    /// rows removed; the cache engine calls this from its periodic sweep.
    pub fn purge_expired(&self) -> GatewayResult<usize> {
        let conn = self.conn.lock();
        let removed = conn
            .execute(
                "DELETE FROM cache_entries WHERE expires_at_ms <= ?1",
                params![Utc::now().timestamp_millis()],
            )
            .map_err(storage_err)?;
        Ok(removed)
    }
}

fn storage_err(e: rusqlite::Error) -> GatewayError {
    GatewayError::Storage {
        backend: "sqlite".to_string(),
        reason: e.to_string(),
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> GatewayResult<Option<CacheEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT key, payload, is_compressed, original_size, stored_size,
                        created_at_ms, expires_at_ms, tag
                 FROM cache_entries WHERE key = ?1",
            )
            .map_err(storage_err)?;

        let result = stmt.query_row(params![key], |row| {
            Ok(CacheEntry {
                key: row.get(0)?,
                payload: row.get(1)?,
                is_compressed: row.get::<_, i64>(2)? != 0,
                original_size: row.get::<_, i64>(3)? as usize,
                stored_size: row.get::<_, i64>(4)? as usize,
                created_at: millis_to_datetime(row.get(5)?),
                expires_at: millis_to_datetime(row.get(6)?),
                tag: row.get(7)?,
            })
        });

        match result {
            Ok(entry) => Ok(Some(entry)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    async fn set(&self, entry: CacheEntry) -> GatewayResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO cache_entries
             (key, payload, is_compressed, original_size, stored_size,
              created_at_ms, expires_at_ms, tag)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.key,
                entry.payload,
                entry.is_compressed as i64,
                entry.original_size as i64,
                entry.stored_size as i64,
                entry.created_at.timestamp_millis(),
                entry.expires_at.timestamp_millis(),
                entry.tag,
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> GatewayResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])
            .map_err(storage_err)?;
        Ok(())
    }

    async fn clear(&self) -> GatewayResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM cache_entries", [])
            .map_err(storage_err)?;
        Ok(())
    }

    async fn keys(&self) -> GatewayResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT key FROM cache_entries")
            .map_err(storage_err)?;

        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(storage_err)?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row.map_err(storage_err)?);
        }
        Ok(keys)
    }
}
