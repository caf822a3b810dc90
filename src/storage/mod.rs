//! Storage Module
//!
//! Durable stores the queue depends on:
//! - [`MetadataStore`]: one [`FileRecord`] per downloaded file, keyed by id
//! - [`KeyValueStore`]: opaque blobs, used for the queue snapshot
//!
//! [`MemoryStorage`] implements both for tests and embedders without a
//! database. With the `storage` feature, [`SqliteStorage`] implements both
//! on a single SQLite file.

#[cfg(feature = "storage")]
pub mod sqlite;

#[cfg(feature = "storage")]
pub use sqlite::SqliteStorage;

use crate::error::Result;
use crate::protocol::FileRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;

/// Durable table of file metadata records
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert or replace a record
    async fn insert(&self, record: &FileRecord) -> Result<()>;

    /// Look up a record by file id
    async fn find(&self, id: &str) -> Result<Option<FileRecord>>;

    /// All records of one context
    async fn find_by_context(&self, context_id: &str) -> Result<Vec<FileRecord>>;

    /// All records
    async fn all(&self) -> Result<Vec<FileRecord>>;

    /// Point a record at a new location. Returns false if no such record.
    async fn update_location(
        &self,
        id: &str,
        path: &Path,
        filename: &str,
        update_time: DateTime<Utc>,
    ) -> Result<bool>;

    /// Delete a record by id
    async fn delete(&self, id: &str) -> Result<()>;

    /// Delete every record of one context, returning how many were removed
    async fn delete_by_context(&self, context_id: &str) -> Result<usize>;

    /// Delete every record
    async fn clear(&self) -> Result<()>;

    /// Sum of `size_kb` over all records
    async fn total_size(&self) -> Result<u64>;

    /// Sum of `size_kb` over records whose context type is `area`
    async fn total_size_by_area(&self, area: &str) -> Result<u64>;

    /// Release the underlying handle. Later calls fail.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Durable key-value blobs
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Release the underlying handle. Later calls fail.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// In-memory storage for testing
#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: RwLock<HashMap<String, FileRecord>>,
    values: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryStorage {
    async fn insert(&self, record: &FileRecord) -> Result<()> {
        self.files.write().insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<FileRecord>> {
        Ok(self.files.read().get(id).cloned())
    }

    async fn find_by_context(&self, context_id: &str) -> Result<Vec<FileRecord>> {
        Ok(self
            .files
            .read()
            .values()
            .filter(|r| r.context_id == context_id)
            .cloned()
            .collect())
    }

    async fn all(&self) -> Result<Vec<FileRecord>> {
        Ok(self.files.read().values().cloned().collect())
    }

    async fn update_location(
        &self,
        id: &str,
        path: &Path,
        filename: &str,
        update_time: DateTime<Utc>,
    ) -> Result<bool> {
        let mut files = self.files.write();
        let Some(record) = files.get_mut(id) else {
            return Ok(false);
        };
        record.path = path.to_path_buf();
        record.filename = filename.to_string();
        record.update_time = Some(update_time);
        Ok(true)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.files.write().remove(id);
        Ok(())
    }

    async fn delete_by_context(&self, context_id: &str) -> Result<usize> {
        let mut files = self.files.write();
        let before = files.len();
        files.retain(|_, r| r.context_id != context_id);
        Ok(before - files.len())
    }

    async fn clear(&self) -> Result<()> {
        self.files.write().clear();
        Ok(())
    }

    async fn total_size(&self) -> Result<u64> {
        Ok(self.files.read().values().map(|r| r.size_kb).sum())
    }

    async fn total_size_by_area(&self, area: &str) -> Result<u64> {
        Ok(self
            .files
            .read()
            .values()
            .filter(|r| r.context_type == area)
            .map(|r| r.size_kb)
            .sum())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.values.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.values.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_record(id: &str, context_id: &str, area: &str, size_kb: u64) -> FileRecord {
    FileRecord {
        id: id.to_string(),
        context_id: context_id.to_string(),
        context_type: area.to_string(),
        path: std::path::PathBuf::from(format!("/data/{id}.pdf")),
        filename: format!("{id}.pdf"),
        mime: "application/pdf".to_string(),
        checksum: "unavailable".to_string(),
        size_kb,
        download_time: Utc::now(),
        update_time: None,
    }
}
