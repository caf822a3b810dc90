//! SQLite Storage Implementation
//!
//! File metadata and the queue snapshot share one database file, opened in
//! WAL mode for crash safety. The handle is opened explicitly with
//! [`SqliteStorage::open`] and released with `close`.

use super::{KeyValueStore, MetadataStore};
use crate::error::{QueueError, Result};
use crate::protocol::FileRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// SQLite-based metadata and key-value storage
pub struct SqliteStorage {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteStorage {
    /// Open (creating if needed) the database at the given path
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    QueueError::Database(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        let path = path.to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&path)?;

            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;

            migrate(&conn)?;

            Ok(conn)
        })
        .await
        .map_err(|e| QueueError::Database(format!("Failed to initialize database: {}", e)))??;

        tracing::debug!("Opened metadata database");

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Create an in-memory SQLite database (for testing)
    pub async fn in_memory() -> Result<Self> {
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open_in_memory()?;
            migrate(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| {
            QueueError::Database(format!("Failed to create in-memory database: {}", e))
        })??;

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Whether `close` has been called
    pub async fn is_closed(&self) -> bool {
        self.conn.lock().await.is_none()
    }

    /// Run `f` against the connection on the blocking pool
    async fn run<T, F>(&self, what: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<T> {
            let guard = conn.blocking_lock();
            let conn = guard
                .as_ref()
                .ok_or_else(|| QueueError::Database("Database is closed".to_string()))?;
            f(conn)
        })
        .await
        .map_err(|e| QueueError::Database(format!("Failed to {}: {}", what, e)))?
    }

    async fn shutdown(&self) -> Result<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let Some(conn) = conn.blocking_lock().take() else {
                return Ok(());
            };
            conn.close().map_err(|(_, e)| QueueError::from(e))
        })
        .await
        .map_err(|e| QueueError::Database(format!("Failed to close database: {}", e)))??;
        tracing::debug!("Closed metadata database");
        Ok(())
    }
}

/// Current schema version; bump when adding migrations
const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Database schema v1
const SCHEMA_V1: &str = r#"
-- One row per downloaded file
CREATE TABLE IF NOT EXISTS files (
    id TEXT PRIMARY KEY,
    context_id TEXT NOT NULL,
    context_type TEXT NOT NULL,
    path TEXT NOT NULL,
    filename TEXT NOT NULL,
    mime TEXT NOT NULL,
    checksum TEXT NOT NULL,
    size_kb INTEGER NOT NULL DEFAULT 0,
    download_time TEXT NOT NULL,
    update_time TEXT
);

-- Opaque blobs (queue snapshot)
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_files_context ON files(context_id);
CREATE INDEX IF NOT EXISTS idx_files_area ON files(context_type);
"#;

/// Bring the database up to `CURRENT_SCHEMA_VERSION`.
///
/// Tracks the version in `PRAGMA user_version`; idempotent on a current
/// database.
fn migrate(conn: &Connection) -> std::result::Result<(), rusqlite::Error> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        conn.execute_batch(SCHEMA_V1)?;
        conn.pragma_update(None, "user_version", 1)?;
    }

    Ok(())
}

const SELECT_FILES: &str = r#"
    SELECT id, context_id, context_type, path, filename, mime, checksum,
           size_kb, download_time, update_time
    FROM files
"#;

#[async_trait]
impl MetadataStore for SqliteStorage {
    async fn insert(&self, record: &FileRecord) -> Result<()> {
        let record = record.clone();
        self.run("insert file record", move |conn| {
            conn.execute(
                r#"
                INSERT INTO files (
                    id, context_id, context_type, path, filename, mime, checksum,
                    size_kb, download_time, update_time
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(id) DO UPDATE SET
                    context_id = excluded.context_id,
                    context_type = excluded.context_type,
                    path = excluded.path,
                    filename = excluded.filename,
                    mime = excluded.mime,
                    checksum = excluded.checksum,
                    size_kb = excluded.size_kb,
                    download_time = excluded.download_time,
                    update_time = excluded.update_time
                "#,
                params![
                    record.id,
                    record.context_id,
                    record.context_type,
                    record.path.to_string_lossy().into_owned(),
                    record.filename,
                    record.mime,
                    record.checksum,
                    record.size_kb as i64,
                    record.download_time.to_rfc3339(),
                    record.update_time.map(|t| t.to_rfc3339()),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn find(&self, id: &str) -> Result<Option<FileRecord>> {
        let id = id.to_string();
        self.run("load file record", move |conn| {
            let sql = format!("{SELECT_FILES} WHERE id = ?1");
            Ok(conn
                .query_row(&sql, params![id], row_to_record)
                .optional()?)
        })
        .await
    }

    async fn find_by_context(&self, context_id: &str) -> Result<Vec<FileRecord>> {
        let context_id = context_id.to_string();
        self.run("load context records", move |conn| {
            let sql = format!("{SELECT_FILES} WHERE context_id = ?1 ORDER BY download_time");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![context_id], row_to_record)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn all(&self) -> Result<Vec<FileRecord>> {
        self.run("load file records", move |conn| {
            let sql = format!("{SELECT_FILES} ORDER BY download_time");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], row_to_record)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn update_location(
        &self,
        id: &str,
        path: &Path,
        filename: &str,
        update_time: DateTime<Utc>,
    ) -> Result<bool> {
        let id = id.to_string();
        let path = path.to_string_lossy().into_owned();
        let filename = filename.to_string();
        self.run("update file location", move |conn| {
            let changed = conn.execute(
                "UPDATE files SET path = ?2, filename = ?3, update_time = ?4 WHERE id = ?1",
                params![id, path, filename, update_time.to_rfc3339()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.run("delete file record", move |conn| {
            conn.execute("DELETE FROM files WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    async fn delete_by_context(&self, context_id: &str) -> Result<usize> {
        let context_id = context_id.to_string();
        self.run("delete context records", move |conn| {
            Ok(conn.execute(
                "DELETE FROM files WHERE context_id = ?1",
                params![context_id],
            )?)
        })
        .await
    }

    async fn clear(&self) -> Result<()> {
        self.run("clear file records", move |conn| {
            conn.execute("DELETE FROM files", [])?;
            Ok(())
        })
        .await
    }

    async fn total_size(&self) -> Result<u64> {
        self.run("sum file sizes", move |conn| {
            let total: i64 =
                conn.query_row("SELECT COALESCE(SUM(size_kb), 0) FROM files", [], |row| {
                    row.get(0)
                })?;
            Ok(total.max(0) as u64)
        })
        .await
    }

    async fn total_size_by_area(&self, area: &str) -> Result<u64> {
        let area = area.to_string();
        self.run("sum file sizes", move |conn| {
            let total: i64 = conn.query_row(
                "SELECT COALESCE(SUM(size_kb), 0) FROM files WHERE context_type = ?1",
                params![area],
                |row| row.get(0),
            )?;
            Ok(total.max(0) as u64)
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        self.shutdown().await
    }
}

#[async_trait]
impl KeyValueStore for SqliteStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let key = key.to_string();
        self.run("read value", move |conn| {
            Ok(conn
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()?)
        })
        .await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let key = key.to_string();
        let value = value.to_vec();
        self.run("write value", move |conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.run("remove value", move |conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        self.shutdown().await
    }
}

fn parse_time(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Convert a database row to a FileRecord
fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    let path: String = row.get(3)?;
    let size_kb: i64 = row.get(7)?;
    let download_time: String = row.get(8)?;
    let update_time: Option<String> = row.get(9)?;

    Ok(FileRecord {
        id: row.get(0)?,
        context_id: row.get(1)?,
        context_type: row.get(2)?,
        path: PathBuf::from(path),
        filename: row.get(4)?,
        mime: row.get(5)?,
        checksum: row.get(6)?,
        size_kb: size_kb.max(0) as u64,
        download_time: parse_time(8, &download_time)?,
        update_time: update_time.map(|t| parse_time(9, &t)).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_record;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_sqlite_insert_find() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let record = test_record("a", "c1", "course", 12);
        storage.insert(&record).await.unwrap();

        let loaded = storage.find("a").await.unwrap().unwrap();
        assert_eq!(loaded.context_id, "c1");
        assert_eq!(loaded.size_kb, 12);
        assert_eq!(loaded.path, record.path);
        assert!(storage.find("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_insert_is_upsert() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        storage.insert(&test_record("a", "c1", "course", 12)).await.unwrap();
        storage.insert(&test_record("a", "c1", "course", 3)).await.unwrap();

        assert_eq!(storage.all().await.unwrap().len(), 1);
        assert_eq!(storage.total_size().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_sqlite_sizes_and_context_delete() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        storage.insert(&test_record("a", "c1", "course", 10)).await.unwrap();
        storage.insert(&test_record("b", "c1", "course", 5)).await.unwrap();
        storage.insert(&test_record("c", "c2", "group", 7)).await.unwrap();

        assert_eq!(storage.total_size().await.unwrap(), 22);
        assert_eq!(storage.total_size_by_area("group").await.unwrap(), 7);
        assert_eq!(storage.total_size_by_area("none").await.unwrap(), 0);
        assert_eq!(storage.find_by_context("c1").await.unwrap().len(), 2);

        assert_eq!(storage.delete_by_context("c1").await.unwrap(), 2);
        assert_eq!(storage.all().await.unwrap().len(), 1);

        storage.clear().await.unwrap();
        assert_eq!(storage.total_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sqlite_update_location() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        storage.insert(&test_record("a", "c1", "course", 10)).await.unwrap();

        let now = Utc::now();
        assert!(storage
            .update_location("a", Path::new("/moved/b.pdf"), "b.pdf", now)
            .await
            .unwrap());
        let loaded = storage.find("a").await.unwrap().unwrap();
        assert_eq!(loaded.filename, "b.pdf");
        assert_eq!(loaded.path, Path::new("/moved/b.pdf"));
        assert_eq!(
            loaded.update_time.map(|t| t.timestamp()),
            Some(now.timestamp())
        );
    }

    #[tokio::test]
    async fn test_sqlite_key_value() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        storage.set("snapshot", b"{}").await.unwrap();
        storage.set("snapshot", b"{\"a\":1}").await.unwrap();
        assert_eq!(
            storage.get("snapshot").await.unwrap().as_deref(),
            Some(&b"{\"a\":1}"[..])
        );
        storage.remove("snapshot").await.unwrap();
        assert!(storage.get("snapshot").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("queue.db");

        let storage = SqliteStorage::open(&path).await.unwrap();
        storage.insert(&test_record("a", "c1", "course", 10)).await.unwrap();
        storage.set("k", b"v").await.unwrap();
        MetadataStore::close(&storage).await.unwrap();
        assert!(storage.is_closed().await);
        assert!(storage.find("a").await.is_err());

        let reopened = SqliteStorage::open(&path).await.unwrap();
        assert!(reopened.find("a").await.unwrap().is_some());
        assert_eq!(reopened.get("k").await.unwrap().as_deref(), Some(&b"v"[..]));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        MetadataStore::close(&storage).await.unwrap();
        KeyValueStore::close(&storage).await.unwrap();
    }

    #[tokio::test]
    async fn test_schema_versioning() {
        let storage = SqliteStorage::in_memory().await.unwrap();

        let guard = storage.conn.lock().await;
        let conn = guard.as_ref().unwrap();
        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);

        // Running migrate again is a no-op
        migrate(conn).unwrap();
        let version2: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version2, CURRENT_SCHEMA_VERSION);
    }
}
