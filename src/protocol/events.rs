//! Queue events
//!
//! Events emitted by the queue. Progress updates travel on their own channel
//! as [`ProgressEvent`] so high-frequency updates never crowd out state events.

use super::types::{DownloadKey, JobId};
use serde::{Deserialize, Serialize};

/// Events emitted by the download queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueEvent {
    /// Files were added to (or replaced in) the queue
    FilesAdded { ids: Vec<String> },
    /// Files were removed from the queue
    FilesRemoved { ids: Vec<String> },
    /// A download session started
    SessionStarted { total: usize },
    /// The session was stopped by the caller
    SessionStopped,
    /// Every file reached a terminal phase
    SessionFinished { summary: SessionSummary },
    /// The transport accepted a transfer
    TransferStarted {
        id: String,
        key: DownloadKey,
        job_id: JobId,
    },
    /// A transfer completed successfully
    TransferCompleted { id: String, key: DownloadKey },
    /// A transfer failed
    TransferFailed {
        id: String,
        key: DownloadKey,
        error: String,
    },
    /// A transfer was cancelled and returned to the queue
    TransferCancelled { id: String, key: DownloadKey },
    /// Post-download verification found a problem (advisory only)
    ChecksumWarning {
        id: String,
        key: DownloadKey,
        message: String,
    },
    /// A metadata record was written for a completed file
    FileRecorded { id: String },
    /// A queue snapshot was restored at startup
    Restored { queued: usize },
}

/// Progress of one key, from the progress store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub key: DownloadKey,
    /// Fraction in `0.0..=1.0`, or `None` when the entry was cleared
    pub progress: Option<f64>,
}

/// Outcome counts for one download session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
}

impl SessionSummary {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Human-readable completion message
    pub fn message(&self) -> String {
        if self.failed == 0 {
            format!("All {} files downloaded", self.succeeded)
        } else {
            format!("{} succeeded, {} failed", self.succeeded, self.failed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_messages() {
        let ok = SessionSummary {
            succeeded: 5,
            failed: 0,
            total: 5,
        };
        assert_eq!(ok.message(), "All 5 files downloaded");
        assert!(!ok.has_failures());

        let partial = SessionSummary {
            succeeded: 4,
            failed: 1,
            total: 5,
        };
        assert_eq!(partial.message(), "4 succeeded, 1 failed");
        assert!(partial.has_failures());
    }
}
