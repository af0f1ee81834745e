//! Snapshot stores - best-effort persistence for the proximity cache.
//!
//! The cache serializes its persistent entries into one flat JSON object
//! and hands the bytes to a [`SnapshotStore`], which replaces whatever it
//! held before. Stores never interpret the bytes.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use crate::config::CacheConfig;
use crate::error::CacheError;

/// Key under which the snapshot is stored
pub const DEFAULT_STORAGE_KEY: &str = "zbe-navigator-cache";

/// Trait for persistent snapshot storage
///
/// Implementations must be thread-safe; the sweep task and position
/// updates may both trigger a save.
pub trait SnapshotStore: Send + Sync {
    /// Load the last saved snapshot, if any
    fn load(&self) -> Result<Option<Vec<u8>>, CacheError>;

    /// Replace the stored snapshot wholesale
    fn save(&self, snapshot: &[u8]) -> Result<(), CacheError>;

    /// Remove the stored snapshot
    fn clear(&self) -> Result<(), CacheError>;
}

/// Sled-based snapshot store
///
/// Uses an embedded key-value database so the snapshot survives restarts.
pub struct SledSnapshotStore {
    db: sled::Db,
    key: String,
}

impl SledSnapshotStore {
    /// Open a persistent store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        Self::open_with_key(path, DEFAULT_STORAGE_KEY)
    }

    /// Open a persistent store keyed by `config.storage_key`
    pub fn for_config<P: AsRef<Path>>(path: P, config: &CacheConfig) -> Result<Self, CacheError> {
        Self::open_with_key(path, &config.storage_key)
    }

    /// Open a persistent store using a custom snapshot key
    pub fn open_with_key<P: AsRef<Path>>(path: P, key: &str) -> Result<Self, CacheError> {
        let db = sled::open(path)
            .map_err(|e| CacheError::StorageError(format!("Failed to open sled DB: {}", e)))?;
        Ok(Self {
            db,
            key: key.to_string(),
        })
    }

    /// Create a temporary store (for testing)
    #[cfg(test)]
    pub fn open_temp() -> Result<Self, CacheError> {
        let config = sled::Config::new().temporary(true);
        let db = config
            .open()
            .map_err(|e| CacheError::StorageError(format!("Failed to open temp DB: {}", e)))?;
        Ok(Self {
            db,
            key: DEFAULT_STORAGE_KEY.to_string(),
        })
    }
}

impl SnapshotStore for SledSnapshotStore {
    fn load(&self) -> Result<Option<Vec<u8>>, CacheError> {
        let value = self
            .db
            .get(&self.key)
            .map_err(|e| CacheError::StorageError(format!("Read failed: {}", e)))?;
        Ok(value.map(|v| v.to_vec()))
    }

    fn save(&self, snapshot: &[u8]) -> Result<(), CacheError> {
        self.db
            .insert(&self.key, snapshot)
            .map_err(|e| CacheError::StorageError(format!("Insert failed: {}", e)))?;
        self.db
            .flush()
            .map_err(|e| CacheError::StorageError(format!("Flush failed: {}", e)))?;
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.db
            .remove(&self.key)
            .map_err(|e| CacheError::StorageError(format!("Remove failed: {}", e)))?;
        Ok(())
    }
}

/// Process-local snapshot store.
///
/// Nothing survives the process, but an `Arc` of it can be handed to a
/// second cache to simulate a restart.
#[derive(Default)]
pub struct MemorySnapshotStore {
    data: Mutex<Option<Vec<u8>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with raw bytes
    pub fn with_contents(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Mutex::new(Some(bytes.into())),
        }
    }

    /// Current raw contents
    pub fn contents(&self) -> Option<Vec<u8>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.contents())
    }

    fn save(&self, snapshot: &[u8]) -> Result<(), CacheError> {
        *self.data.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.to_vec());
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        *self.data.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sled_store_round_trip_replaces_snapshot() {
        let store = SledSnapshotStore::open_temp().unwrap();
        assert!(store.load().unwrap().is_none());

        store.save(br#"{"a":1}"#).unwrap();
        store.save(br#"{"b":2}"#).unwrap();
        assert_eq!(store.load().unwrap().unwrap(), br#"{"b":2}"#.to_vec());

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_sled_store_uses_configured_key() {
        let dir = std::env::temp_dir().join(format!("zbe-snapshot-{}", uuid::Uuid::new_v4()));
        let config = CacheConfig {
            storage_key: "zbe-staging-cache".to_string(),
            ..CacheConfig::default()
        };

        {
            let store = SledSnapshotStore::for_config(&dir, &config).unwrap();
            store.save(br#"{"a":1}"#).unwrap();
            assert!(store.db.get("zbe-staging-cache").unwrap().is_some());
            assert!(store.db.get(DEFAULT_STORAGE_KEY).unwrap().is_none());
        }

        let reopened = SledSnapshotStore::open_with_key(&dir, "zbe-staging-cache").unwrap();
        assert_eq!(reopened.load().unwrap().unwrap(), br#"{"a":1}"#.to_vec());
        drop(reopened);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_memory_store() {
        let store = MemorySnapshotStore::with_contents("seed");
        assert_eq!(store.load().unwrap().unwrap(), b"seed".to_vec());

        store.clear().unwrap();
        assert!(store.contents().is_none());
    }
}
