//! JSON key/value persistence
//!
//! One pretty-printed file per key under the storage root. Loaded and saved
//! values are cached as `serde_json::Value` so repeat loads skip the disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::core::error::{LablabError, Result};

const INVALID_KEY_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StorageStats {
    pub cached_keys: usize,
    pub saves: u64,
    pub loads: u64,
    pub deletes: u64,
    pub last_save: Option<SystemTime>,
    pub last_load: Option<SystemTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageHealth {
    pub is_healthy: bool,
    pub last_error: Option<String>,
    pub cached_keys: usize,
}

/// Replace path separators and other unsafe characters so a key is one
/// file name
pub fn sanitize_key(key: &str) -> String {
    key.split(|c: char| INVALID_KEY_CHARS.contains(&c) || c.is_control())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

pub struct JsonStorage {
    root: PathBuf,
    cache: RwLock<HashMap<String, serde_json::Value>>,
    stats: RwLock<StorageStats>,
    last_error: RwLock<Option<String>>,
}

impl JsonStorage {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            cache: RwLock::new(HashMap::new()),
            stats: RwLock::new(StorageStats::default()),
            last_error: RwLock::new(None),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize_key(key)))
    }

    fn record_error<T>(&self, action: &str, key: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            error!(key, action, error = %e, "Storage operation failed");
            *self.last_error.write() = Some(format!("{} failed for {}: {}", action, key, e));
        }
        result
    }

    pub fn save<T: Serialize>(&self, key: &str, data: &T) -> Result<()> {
        let result = (|| -> Result<()> {
            let value = serde_json::to_value(data)?;
            let path = self.file_path(key);
            std::fs::write(&path, serde_json::to_string_pretty(&value)?)?;
            debug!(key, path = %path.display(), "Saved");
            self.cache.write().insert(key.to_string(), value);
            Ok(())
        })();
        let result = self.record_error("Save", key, result);
        if result.is_ok() {
            let mut stats = self.stats.write();
            stats.saves += 1;
            stats.last_save = Some(SystemTime::now());
            info!(key, "Saved data");
        }
        result
    }

    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        if let Some(cached) = self.cache.read().get(key).cloned() {
            debug!(key, "Loaded from cache");
            return Ok(serde_json::from_value(cached)?);
        }

        let result = (|| -> Result<T> {
            let path = self.file_path(key);
            if !path.exists() {
                return Err(LablabError::Storage(format!(
                    "Storage file not found for key: {}",
                    key
                )));
            }
            let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
            let data = serde_json::from_value(value.clone())?;
            self.cache.write().insert(key.to_string(), value);
            Ok(data)
        })();
        let result = self.record_error("Load", key, result);
        if result.is_ok() {
            let mut stats = self.stats.write();
            stats.loads += 1;
            stats.last_load = Some(SystemTime::now());
        }
        result
    }

    pub fn load_or_default<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.load(key) {
            Ok(value) => value,
            Err(_) => {
                warn!(key, "Failed to load key, using default");
                default
            }
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        self.file_path(key).exists()
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        let path = self.file_path(key);
        let result = if path.exists() {
            std::fs::remove_file(&path).map_err(LablabError::from)
        } else {
            Ok(())
        };
        let result = self.record_error("Delete", key, result);
        if result.is_ok() {
            self.cache.write().remove(key);
            self.stats.write().deletes += 1;
            info!(key, "Deleted data");
        }
        result
    }

    /// Keys (sanitized file stems), optionally filtered by a
    /// case-insensitive prefix
    pub fn keys(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let prefix = prefix.map(str::to_lowercase);
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if prefix
                .as_deref()
                .map_or(true, |p| stem.to_lowercase().starts_with(p))
            {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Delete every key matching the prefix; returns how many went
    pub fn clear(&self, prefix: Option<&str>) -> Result<usize> {
        let keys = self.keys(prefix)?;
        for key in &keys {
            self.delete(key)?;
        }
        info!(count = keys.len(), prefix = prefix.unwrap_or("(all)"), "Cleared keys");
        Ok(keys.len())
    }

    /// Bytes on disk across all keys
    pub fn size(&self) -> Result<u64> {
        let mut total = 0;
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }

    pub fn stats(&self) -> StorageStats {
        let mut stats = self.stats.read().clone();
        stats.cached_keys = self.cache.read().len();
        stats
    }

    pub fn health(&self) -> StorageHealth {
        let last_error = self.last_error.read().clone();
        StorageHealth {
            is_healthy: last_error.is_none(),
            last_error,
            cached_keys: self.cache.read().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct SaveGame {
        level: u32,
        hero: String,
    }

    fn temp_storage() -> JsonStorage {
        let root = std::env::temp_dir().join(format!("lablab-storage-{}", uuid::Uuid::new_v4()));
        JsonStorage::new(root).unwrap()
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("saves/slot:1"), "saves_slot_1");
        assert_eq!(sanitize_key("//a//b"), "a_b");
        assert_eq!(sanitize_key("plain"), "plain");
    }

    #[test]
    fn test_save_load_roundtrip_through_disk() {
        let storage = temp_storage();
        let game = SaveGame { level: 4, hero: "Bean".into() };
        storage.save("slot1", &game).unwrap();
        assert!(storage.exists("slot1"));

        let fresh = JsonStorage::new(storage.root()).unwrap();
        assert_eq!(fresh.load::<SaveGame>("slot1").unwrap(), game);
        assert_eq!(fresh.stats().loads, 1);
        std::fs::remove_dir_all(storage.root()).unwrap();
    }

    #[test]
    fn test_missing_key() {
        let storage = temp_storage();
        let err = storage.load::<SaveGame>("nothing").unwrap_err();
        assert!(err.to_string().contains("Storage file not found for key: nothing"));
        assert!(!storage.health().is_healthy);
        assert_eq!(storage.load_or_default("nothing", 7u32), 7);
        std::fs::remove_dir_all(storage.root()).unwrap();
    }

    #[test]
    fn test_keys_clear_and_size() {
        let storage = temp_storage();
        storage.save("Save_A", &1).unwrap();
        storage.save("save_b", &2).unwrap();
        storage.save("config", &3).unwrap();
        assert!(storage.size().unwrap() > 0);

        assert_eq!(storage.keys(Some("SAVE")).unwrap(), vec!["Save_A", "save_b"]);
        assert_eq!(storage.clear(Some("save")).unwrap(), 2);
        assert_eq!(storage.keys(None).unwrap(), vec!["config"]);
        assert_eq!(storage.stats().deletes, 2);
        std::fs::remove_dir_all(storage.root()).unwrap();
    }
}
