//! Transfer transport
//!
//! The queue never talks to the network directly. A [`Transport`] streams
//! one resource to a local path, hands back a [`JobId`] before the transfer
//! finishes, and resolves its completion to the status code of the
//! response. An aborted transfer resolves to [`QueueError::Cancelled`].
//!
//! [`QueueError::Cancelled`]: crate::QueueError::Cancelled

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::HttpTransport;

use crate::error::Result;
use crate::protocol::JobId;
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Progress callback: `(bytes_written, total_bytes)`
pub type ProgressFn = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// One transfer to perform
pub struct TransferRequest {
    pub source: String,
    pub destination: PathBuf,
    /// Extra request headers (e.g. authorization)
    pub headers: Vec<(String, String)>,
    pub on_progress: ProgressFn,
}

/// A started transfer
pub struct TransferHandle {
    pub job_id: JobId,
    /// Resolves to the response status, or an error
    pub completion: BoxFuture<'static, Result<u16>>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Start a transfer and return as soon as it has a job id
    async fn transfer(&self, request: TransferRequest) -> Result<TransferHandle>;

    /// Abort a job. Safe to call repeatedly and after completion.
    async fn cancel(&self, job_id: JobId);
}

/// Issues job ids and tracks the cancellation token of each running job
#[derive(Default)]
pub struct JobRegistry {
    next_id: AtomicU64,
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a job id and its token
    pub fn register(&self) -> (JobId, CancellationToken) {
        let job_id = JobId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let token = CancellationToken::new();
        self.tokens.lock().insert(job_id, token.clone());
        (job_id, token)
    }

    /// Cancel a job if it is still registered
    pub fn cancel(&self, job_id: JobId) -> bool {
        match self.tokens.lock().remove(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Forget a job that has finished
    pub fn finish(&self, job_id: JobId) {
        self.tokens.lock().remove(&job_id);
    }

    /// Cancel every registered job
    pub fn cancel_all(&self) {
        for (_, token) in self.tokens.lock().drain() {
            token.cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
