//! SQLite file backing [`SqliteStore`](crate::store::SqliteStore).
//!
//! One table, `kv_store`, holds the persisted expansion cache entries.

mod kv;
mod schema;

use std::path::Path;

use rusqlite::Connection;
use thiserror::Error;

use schema::SCHEMA;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Connection to a key-value database file.
pub struct Database {
    conn: Connection,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Open the store file at `path`, creating the file and table if missing.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> DbResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> DbResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_kv_table() {
        let db = Database::open_in_memory().unwrap();

        let columns: Vec<String> = db
            .conn
            .prepare("SELECT name FROM pragma_table_info('kv_store') ORDER BY cid")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(columns, vec!["key", "value", "size_bytes", "updated_at"]);
    }

    #[test]
    fn test_reopen_keeps_existing_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("expansion.db");

        Database::open(&path).unwrap().kv_set("entry", "{}").unwrap();

        let reopened = Database::open(&path).unwrap();
        assert_eq!(reopened.kv_get("entry").unwrap().as_deref(), Some("{}"));
    }
}
