//! Transfer worker
//!
//! Runs one claimed transfer to completion and reports a tagged outcome.
//! The worker owns no queue state: it asks its [`ClaimListener`] whether
//! the claim is still current when a job id arrives, and cancels the job
//! itself if it is not.

use crate::progress::ProgressStore;
use crate::protocol::{DownloadKey, JobId, QueuedFile};
use crate::transport::{ProgressFn, TransferRequest, Transport};
use std::sync::Arc;

/// A queue entry holding a slot under a specific generation
#[derive(Debug, Clone)]
pub struct Claim {
    pub file: QueuedFile,
    pub key: DownloadKey,
    pub generation: u64,
}

/// How a transfer ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Status 200 and the file is on disk
    Succeeded { total_bytes: Option<u64> },
    /// Any other status, a transport error, or a missing file
    Failed(String),
    /// The job was aborted through its handle
    Cancelled,
}

/// Terminal report for one claim
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub claim: Claim,
    pub job_id: Option<JobId>,
    pub outcome: Outcome,
}

/// Receiver of worker callbacks
pub trait ClaimListener: Send + Sync {
    /// A job was assigned. Returns false if the claim went stale.
    fn on_job(&self, claim: &Claim, job_id: JobId) -> bool;

    /// The transfer reached a terminal outcome
    fn on_finished(&self, report: TransferReport);
}

/// Run one transfer. Never fails: every error becomes an [`Outcome`].
pub async fn run_transfer(
    transport: Arc<dyn Transport>,
    progress: Arc<ProgressStore>,
    headers: Vec<(String, String)>,
    claim: Claim,
    listener: Arc<dyn ClaimListener>,
) {
    let on_progress: ProgressFn = {
        let progress = progress.clone();
        let key = claim.key.clone();
        let generation = claim.generation;
        Arc::new(move |written, total| {
            progress.update(&key, generation, written, total);
        })
    };

    let request = TransferRequest {
        source: claim.file.source.clone(),
        destination: claim.file.destination.clone(),
        headers,
        on_progress,
    };

    let handle = match transport.transfer(request).await {
        Ok(handle) => handle,
        Err(e) => {
            let outcome = if e.is_cancelled() {
                Outcome::Cancelled
            } else {
                Outcome::Failed(e.to_string())
            };
            listener.on_finished(TransferReport {
                claim,
                job_id: None,
                outcome,
            });
            return;
        }
    };

    let job_id = handle.job_id;
    if !listener.on_job(&claim, job_id) {
        tracing::debug!(id = %claim.file.id, %job_id, "Claim went stale, cancelling job");
        transport.cancel(job_id).await;
        return;
    }

    let outcome = match handle.completion.await {
        Ok(200) => match tokio::fs::try_exists(&claim.file.destination).await {
            Ok(true) => Outcome::Succeeded {
                total_bytes: progress.entry(&claim.key).and_then(|e| e.total_bytes),
            },
            _ => Outcome::Failed(format!(
                "{} missing after transfer",
                claim.file.destination.display()
            )),
        },
        Ok(status) => Outcome::Failed(format!("HTTP status {}", status)),
        Err(e) if e.is_cancelled() => Outcome::Cancelled,
        Err(e) => Outcome::Failed(e.to_string()),
    };

    listener.on_finished(TransferReport {
        claim,
        job_id: Some(job_id),
        outcome,
    });
}
