//! Downloaded file library
//!
//! Operations on files the queue already delivered: removal, relocation
//! without re-download, cache clearing and size accounting. The metadata
//! store is the source of truth for what exists; local files that vanished
//! on their own are not an error.

use crate::checksum::Verification;
use crate::error::{QueueError, Result, StorageErrorKind};
use crate::protocol::{FileRecord, QueuedFile};
use crate::storage::MetadataStore;
use chrono::Utc;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

pub struct FileLibrary {
    metadata: Arc<dyn MetadataStore>,
}

impl FileLibrary {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }

    pub async fn record(&self, id: &str) -> Result<Option<FileRecord>> {
        self.metadata.find(id).await
    }

    pub async fn records_by_context(&self, context_id: &str) -> Result<Vec<FileRecord>> {
        self.metadata.find_by_context(context_id).await
    }

    /// Delete a file and its record. Returns false if there was no record.
    pub async fn remove_file(&self, id: &str) -> Result<bool> {
        let Some(record) = self.metadata.find(id).await? else {
            return Ok(false);
        };
        remove_local(&record.path).await?;
        self.metadata.delete(id).await?;
        tracing::debug!(id, "Removed downloaded file");
        Ok(true)
    }

    /// Move a downloaded file and update its record in place
    pub async fn relocate(&self, id: &str, new_path: impl AsRef<Path>) -> Result<FileRecord> {
        let new_path = new_path.as_ref();
        let record = self
            .metadata
            .find(id)
            .await?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        let filename = new_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| QueueError::invalid_input("new_path", "Path has no file name"))?;

        if record.path != new_path {
            if let Some(parent) = new_path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        QueueError::storage(
                            StorageErrorKind::Io,
                            parent,
                            format!("Failed to create directory: {}", e),
                        )
                    })?;
                }
            }
            move_file(&record.path, new_path).await?;
        }

        let now = Utc::now();
        self.metadata
            .update_location(id, new_path, &filename, now)
            .await?;
        tracing::debug!(id, path = %new_path.display(), "Relocated downloaded file");

        Ok(FileRecord {
            path: new_path.to_path_buf(),
            filename,
            update_time: Some(now),
            ..record
        })
    }

    /// Delete every file of one context. Returns the number of records removed.
    pub async fn clear_context(&self, context_id: &str) -> Result<usize> {
        for record in self.metadata.find_by_context(context_id).await? {
            remove_local(&record.path).await?;
        }
        self.metadata.delete_by_context(context_id).await
    }

    /// Delete every recorded file and all records
    pub async fn clear_cache(&self) -> Result<()> {
        let records = self.metadata.all().await?;
        let count = records.len();
        for record in records {
            remove_local(&record.path).await?;
        }
        self.metadata.clear().await?;
        tracing::info!(count, "Cleared download cache");
        Ok(())
    }

    /// Total recorded size in KiB
    pub async fn total_size(&self) -> Result<u64> {
        self.metadata.total_size().await
    }

    /// Recorded size in KiB for one context type
    pub async fn total_size_by_area(&self, area: &str) -> Result<u64> {
        self.metadata.total_size_by_area(area).await
    }
}

/// Build the metadata record for a freshly completed file
pub(crate) fn record_for(file: &QueuedFile, verification: &Verification) -> FileRecord {
    let filename = file
        .destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.name.clone());

    FileRecord {
        id: file.id.clone(),
        context_id: file.context_id.clone(),
        context_type: file.context_type.clone(),
        path: file.destination.clone(),
        filename,
        mime: guess_mime(&file.destination).to_string(),
        checksum: verification.checksum.clone(),
        size_kb: verification.size.div_ceil(1024),
        download_time: Utc::now(),
        update_time: None,
    }
}

/// Mime type from the file extension, `application/octet-stream` if unknown
pub fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "json" => "application/json",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

async fn remove_local(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(QueueError::storage(
            StorageErrorKind::Io,
            path,
            format!("Failed to remove file: {}", e),
        )),
    }
}

/// Rename, falling back to copy and delete across filesystems
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await.map_err(|e| {
        QueueError::storage(
            StorageErrorKind::Io,
            from,
            format!("Failed to move file: {}", e),
        )
    })?;
    remove_local(from).await
}
