//! SQLite metadata store
//!
//! Holds the website registry subset the dispatcher needs: which websites
//! exist and when each was last successfully rescanned.

use crate::index::{MetadataError, MetadataStore};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

pub struct SqliteMetadata {
    conn: Mutex<Connection>,
}

impl SqliteMetadata {
    pub fn new(path: &Path) -> Result<Self, MetadataError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            CREATE TABLE IF NOT EXISTS websites (
                id INTEGER PRIMARY KEY,
                url TEXT NOT NULL DEFAULT '',
                logged_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                last_modified TEXT
            );
        ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Registers a website if it is not known yet
    pub fn register_website(&self, website_id: i64, url: &str) -> Result<(), MetadataError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO websites (id, url) VALUES (?1, ?2)",
            params![website_id, url],
        )?;
        Ok(())
    }

    /// Last-modified timestamp of a website, if it was ever reconciled
    pub fn last_modified(&self, website_id: i64) -> Result<Option<String>, MetadataError> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT last_modified FROM websites WHERE id = ?1",
                params![website_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(value.flatten())
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadata {
    async fn update_last_modified(&self, website_id: i64) -> Result<(), MetadataError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO websites (id, last_modified) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET last_modified = excluded.last_modified",
            params![website_id, now],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, SqliteMetadata) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteMetadata::new(&dir.path().join("meta.sqlite3")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_update_last_modified_upserts() {
        let (_dir, store) = temp_store();

        assert!(store.last_modified(5).unwrap().is_none());
        store.update_last_modified(5).await.unwrap();
        let first = store.last_modified(5).unwrap().unwrap();

        store.update_last_modified(5).await.unwrap();
        let second = store.last_modified(5).unwrap().unwrap();
        assert!(second >= first);
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let (_dir, store) = temp_store();
        store.register_website(9, "http://example.com/").unwrap();
        store.register_website(9, "http://other.example/").unwrap();
        assert!(store.last_modified(9).unwrap().is_none());
    }
}
