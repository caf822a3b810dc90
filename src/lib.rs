//! # dlqueue
//!
//! A bounded-concurrency download queue with durable snapshots.
//!
//! ## Features
//!
//! - **Bounded concurrency**: at most `max_concurrent_downloads` transfers at once,
//!   claimed in queue order
//! - **Durable queue**: debounced JSON snapshots survive restarts
//! - **File metadata**: one record per delivered file, with advisory checksums
//! - **Observable**: bulk state and per-file progress on separate channels
//! - **Pluggable**: transport and stores are traits; HTTP and SQLite ship by default
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dlqueue::{DownloadQueue, QueueConfig, QueueEvent, QueuedFile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = QueueConfig::default().bearer_token("secret");
//!     let queue = DownloadQueue::open(config).await?;
//!
//!     queue
//!         .add_files(
//!             vec![QueuedFile::new(
//!                 "42",
//!                 "syllabus.pdf",
//!                 "https://example.com/files/42",
//!                 "/tmp/course-7/syllabus.pdf",
//!             )],
//!             "course-7",
//!             "course",
//!         )
//!         .await?;
//!
//!     let mut events = queue.subscribe();
//!     queue.start_queue_download();
//!     while let Ok(event) = events.recv().await {
//!         if let QueueEvent::SessionFinished { summary } = event {
//!             println!("{}", summary.message());
//!             break;
//!         }
//!     }
//!
//!     queue.shutdown().await?;
//!     Ok(())
//! }
//! ```

// Modules
pub mod checksum;
pub mod config;
pub mod controller;
pub mod error;
pub mod library;
pub mod persistence;
pub mod progress;
pub mod protocol;
pub mod queue;
pub mod state;
pub mod storage;
pub mod transport;
pub mod worker;

// Re-exports for convenience
pub use config::{HttpConfig, QueueConfig};
pub use error::{NetworkErrorKind, QueueError, Result, StorageErrorKind};
pub use protocol::{
    ChecksumAlgorithm, DownloadKey, DownloadPhase, DownloadRecord, ExpectedChecksum, FileRecord,
    JobId, ProgressEvent, QueueEvent, QueueStatus, QueuedFile, SessionSummary,
};
pub use queue::DownloadQueue;
pub use state::{Action, QueueState};

// Component exports
pub use checksum::{compute_checksum, validate_download, verify_checksum, Verification};
pub use controller::QueueController;
pub use library::FileLibrary;
pub use persistence::QueuePersistence;
pub use progress::ProgressStore;

// Storage exports
#[cfg(feature = "storage")]
pub use storage::SqliteStorage;
pub use storage::{KeyValueStore, MemoryStorage, MetadataStore};

// Transport exports
#[cfg(feature = "http")]
pub use transport::HttpTransport;
pub use transport::{JobRegistry, ProgressFn, TransferHandle, TransferRequest, Transport};
