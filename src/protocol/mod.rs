//! Protocol types for dlqueue
//!
//! This module contains all types that cross the queue boundary:
//! - Files handed to the queue and their per-key download records
//! - Durable file metadata records
//! - Events emitted by the queue and by the progress store
//!
//! These types are designed for serialization and can be used for IPC,
//! RPC, or any message-passing interface.

mod checksum;
mod events;
mod status;
mod types;

// Re-export all protocol types
pub use checksum::{ChecksumAlgorithm, ExpectedChecksum};
pub use events::{ProgressEvent, QueueEvent, SessionSummary};
pub use status::{FileRecord, QueueStatus};
pub use types::{DownloadKey, DownloadPhase, DownloadRecord, JobId, QueuedFile};
