//! Core protocol types
//!
//! Files handed to the queue, the key that identifies one transfer, and the
//! per-key download record.

use super::checksum::ExpectedChecksum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A file requested for download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedFile {
    /// Identifier, unique within a context
    pub id: String,
    /// Display name
    pub name: String,
    /// Remote location
    pub source: String,
    /// Local path the file is written to
    pub destination: PathBuf,
    /// Owning context
    #[serde(default)]
    pub context_id: String,
    /// Grouping scope of the context (opaque to the queue)
    #[serde(default)]
    pub context_type: String,
    /// Size estimate for display only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_hint: Option<u64>,
    /// Digest the content is expected to match (advisory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_checksum: Option<ExpectedChecksum>,
}

impl QueuedFile {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        source: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            source: source.into(),
            destination: destination.into(),
            context_id: String::new(),
            context_type: String::new(),
            size_hint: None,
            expected_checksum: None,
        }
    }

    pub fn size_hint(mut self, bytes: u64) -> Self {
        self.size_hint = Some(bytes);
        self
    }

    pub fn expected_checksum(mut self, checksum: ExpectedChecksum) -> Self {
        self.expected_checksum = Some(checksum);
        self
    }

    /// Composite key for this file's transfer
    pub fn key(&self) -> DownloadKey {
        DownloadKey::new(&self.source, &self.destination)
    }

    /// Whether this file belongs to the given context (and type, if given)
    pub fn in_context(&self, context_id: &str, context_type: Option<&str>) -> bool {
        self.context_id == context_id && context_type.map_or(true, |t| self.context_type == t)
    }
}

/// Identifies one transfer: `source + ":" + destination`.
///
/// Re-queueing the same source to the same destination yields the same key,
/// so the entry is replaced rather than duplicated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadKey(String);

impl DownloadKey {
    pub fn new(source: &str, destination: &Path) -> Self {
        Self(format!("{}:{}", source, destination.display()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DownloadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport-assigned handle used to cancel a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Lifecycle phase of one download key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadPhase {
    /// Waiting for a slot
    #[default]
    Queued,
    /// Occupying a slot
    Downloading,
    /// Transfer succeeded
    Completed,
    /// Transfer failed; not retried this session
    Failed,
}

impl DownloadPhase {
    /// Completed or failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for DownloadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-key download record. Progress lives in the progress store, not here.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRecord {
    pub phase: DownloadPhase,
    /// Set only once the phase is `Completed` and the file was found on disk
    pub is_downloaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    /// Claim generation; reports from older claims are ignored
    #[serde(skip)]
    pub generation: u64,
}

impl DownloadRecord {
    pub fn queued() -> Self {
        Self::default()
    }

    pub fn downloaded() -> Self {
        Self {
            phase: DownloadPhase::Completed,
            is_downloaded: true,
            job_id: None,
            generation: 0,
        }
    }
}
