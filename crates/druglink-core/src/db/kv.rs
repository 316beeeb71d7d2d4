//! Key-value operations.

use rusqlite::{params, OptionalExtension};

use super::{Database, DbResult};

impl Database {
    /// Get the value stored under a key.
    pub fn kv_get(&self, key: &str) -> DbResult<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv_store WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Insert or replace the value under a key.
    pub fn kv_set(&self, key: &str, value: &str) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO kv_store (key, value, size_bytes, updated_at)
            VALUES (?1, ?2, ?3, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                size_bytes = excluded.size_bytes,
                updated_at = datetime('now')
            "#,
            params![key, value, value.len() as i64],
        )?;
        Ok(())
    }

    /// Remove a key. Returns whether it existed.
    pub fn kv_remove(&self, key: &str) -> DbResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM kv_store WHERE key = ?", [key])?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_overwrite() {
        let db = Database::open_in_memory().unwrap();

        assert_eq!(db.kv_get("a").unwrap(), None);
        db.kv_set("a", "one").unwrap();
        db.kv_set("a", "three").unwrap();

        assert_eq!(db.kv_get("a").unwrap().as_deref(), Some("three"));
    }

    #[test]
    fn test_remove() {
        let db = Database::open_in_memory().unwrap();
        db.kv_set("b", "2").unwrap();
        db.kv_set("a", "1").unwrap();

        assert!(db.kv_remove("a").unwrap());
        assert!(!db.kv_remove("a").unwrap());
        assert_eq!(db.kv_get("a").unwrap(), None);
        assert_eq!(db.kv_get("b").unwrap().as_deref(), Some("2"));
    }
}
