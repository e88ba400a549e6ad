/// Secondary fallback tier backed by a single JSON file
///
/// The slowest, simplest tier: the whole key space is loaded at open and the
/// file is rewritten on every mutation. Meant for small last-resort capacity
/// when sqlite is unavailable, so the full-rewrite cost is acceptable.

use crate::cache::entry::CacheEntry;
use crate::errors::{GatewayError, GatewayResult};
use crate::storage::StorageBackend;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl FileBackend {
    /// Open the store at `path`, loading any existing contents. A corrupt or
    /// unreadable file is logged and treated as empty rather than failing
    /// the whole tier chain.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read(&path) {
            Ok(raw) => match serde_json::from_slice::<HashMap<String, CacheEntry>>(&raw) {
                Ok(map) => map,
                Err(e) => {
                    log::warn!(
                        "File store {} is corrupt, starting empty: {}",
                        path.display(),
                        e
                    );
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        Self {
            path,
            entries: RwLock::new(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, entries: &HashMap<String, CacheEntry>) -> GatewayResult<()> {
        let raw = serde_json::to_vec(entries)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| GatewayError::Storage {
                    backend: "file".to_string(),
                    reason: format!("Failed to create {}: {}", parent.display(), e),
                })?;
            }
        }
        fs::write(&self.path, raw).map_err(|e| GatewayError::Storage {
            backend: "file".to_string(),
            reason: format!("Failed to write {}: {}", self.path.display(), e),
        })
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> GatewayResult<Option<CacheEntry>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, entry: CacheEntry) -> GatewayResult<()> {
        let mut entries = self.entries.write();
        entries.insert(entry.key.clone(), entry);
        self.persist(&entries)
    }

    async fn delete(&self, key: &str) -> GatewayResult<()> {
        let mut entries = self.entries.write();
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }

    async fn clear(&self) -> GatewayResult<()> {
        let mut entries = self.entries.write();
        entries.clear();
        self.persist(&entries)
    }

    async fn keys(&self) -> GatewayResult<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}
