//! SQLite-backed store.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use super::{KeyValueStore, StoreError, StoreResult};
use crate::db::Database;

/// Key-value store persisted in a SQLite file.
#[derive(Debug)]
pub struct SqliteStore {
    db: Mutex<Database>,
    /// Per-value size limit
    max_value_bytes: Option<usize>,
}

impl SqliteStore {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P, max_value_bytes: Option<usize>) -> StoreResult<Self> {
        Ok(Self {
            db: Mutex::new(Database::open(path)?),
            max_value_bytes,
        })
    }

    /// Create an in-memory store (for testing).
    pub fn open_in_memory(max_value_bytes: Option<usize>) -> StoreResult<Self> {
        Ok(Self {
            db: Mutex::new(Database::open_in_memory()?),
            max_value_bytes,
        })
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(db.kv_get(key)?)
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        if let Some(limit) = self.max_value_bytes {
            if value.len() > limit {
                return Err(StoreError::QuotaExceeded {
                    needed: value.len(),
                    limit,
                });
            }
        }
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        db.kv_set(key, value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        db.kv_remove(key)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_store_value_limit() {
        let store = SqliteStore::open_in_memory(Some(3)).unwrap();

        store.set("k", "abc").unwrap();
        assert!(matches!(
            store.set("k", "abcd"),
            Err(StoreError::QuotaExceeded { needed: 4, limit: 3 })
        ));
        assert_eq!(store.get("k").unwrap().as_deref(), Some("abc"));
    }

    #[test]
    fn test_sqlite_store_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        SqliteStore::open(&path, None).unwrap().set("k", "v").unwrap();

        let reopened = SqliteStore::open(&path, None).unwrap();
        assert_eq!(reopened.get("k").unwrap().as_deref(), Some("v"));
    }
}
