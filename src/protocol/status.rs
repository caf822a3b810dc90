//! Status types
//!
//! Durable file metadata and the aggregate queue status view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Durable metadata for a downloaded file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// File id (primary key)
    pub id: String,
    /// Owning context
    pub context_id: String,
    /// Context grouping, used as the "area" for size aggregation
    pub context_type: String,
    /// Current local path
    pub path: PathBuf,
    /// File name on disk
    pub filename: String,
    /// Guessed mime type
    pub mime: String,
    /// Hex digest, or `"unavailable"`
    pub checksum: String,
    /// Size in KiB (rounded up)
    pub size_kb: u64,
    /// When the file was first downloaded
    pub download_time: DateTime<Utc>,
    /// When the file was last renamed or moved
    pub update_time: Option<DateTime<Utc>>,
}

/// Aggregate view of the queue at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub is_downloading: bool,
    pub has_completed: bool,
    pub has_failure: bool,
    /// Number of queue entries
    pub total: usize,
    /// Number of entries occupying a slot
    pub active: usize,
    /// 1-based index of the file being worked on, clamped to `total`
    pub current_file_index: usize,
    /// Mean progress over queue entries, `0.0..=1.0`
    pub overall_progress: f64,
}
