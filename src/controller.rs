//! Queue Controller - the scheduling loop
//!
//! A pass claims pending entries in queue order up to the slot limit and
//! hands each to a worker. Passes are guarded so that concurrent triggers
//! (worker reports, the busy-slot retry, façade calls) collapse into at most
//! one running pass plus one re-run. When nothing is pending and nothing is
//! active, the pass ends the session.
//!
//! Every claim gets a fresh generation. Progress, job attachment and
//! terminal reports are accepted only for the generation (and job) that
//! currently owns the key, so callbacks from a stopped or superseded
//! transfer fall on the floor.

use crate::checksum::validate_download;
use crate::config::QueueConfig;
use crate::error::{QueueError, Result};
use crate::library::record_for;
use crate::progress::ProgressStore;
use crate::protocol::{JobId, QueueEvent, SessionSummary};
use crate::state::{Action, StateStore};
use crate::storage::MetadataStore;
use crate::transport::Transport;
use crate::worker::{run_transfer, Claim, ClaimListener, Outcome, TransferReport};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub struct QueueController {
    /// Weak self-reference for spawning workers from `&self` methods
    self_ref: Weak<Self>,
    config: QueueConfig,
    state: Arc<StateStore>,
    progress: Arc<ProgressStore>,
    transport: Arc<dyn Transport>,
    metadata: Arc<dyn MetadataStore>,
    events: broadcast::Sender<QueueEvent>,
    /// Last issued claim generation
    generation: AtomicU64,
    /// A pass is executing
    running: AtomicBool,
    /// Another pass was requested while one was executing
    rerun: AtomicBool,
    /// A delayed retry pass is already scheduled
    retry_pending: AtomicBool,
    /// Post-transfer verification and metadata writes
    followups: TaskTracker,
    shutdown: CancellationToken,
}

impl QueueController {
    pub fn new(
        config: QueueConfig,
        state: Arc<StateStore>,
        progress: Arc<ProgressStore>,
        transport: Arc<dyn Transport>,
        metadata: Arc<dyn MetadataStore>,
        events: broadcast::Sender<QueueEvent>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            self_ref: weak.clone(),
            config,
            state,
            progress,
            transport,
            metadata,
            events,
            generation: AtomicU64::new(0),
            running: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
            retry_pending: AtomicBool::new(false),
            followups: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Obtain a strong `Arc<Self>` reference for spawning background tasks.
    fn arc(&self) -> Result<Arc<Self>> {
        self.self_ref.upgrade().ok_or(QueueError::Shutdown)
    }

    /// Request a scheduling pass.
    ///
    /// If a pass is already running on another task, it is asked to run
    /// once more instead and this call returns immediately.
    pub fn kick(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.rerun.store(true, Ordering::SeqCst);
        while self.rerun.load(Ordering::SeqCst) {
            if self
                .running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }
            while self.rerun.swap(false, Ordering::SeqCst) {
                self.pass();
            }
            self.running.store(false, Ordering::SeqCst);
        }
    }

    fn pass(&self) {
        let limit = self.config.max_concurrent_downloads;
        let (downloading, pending, active) = self.state.read(|s| {
            let pending: Vec<_> = s.pending().into_iter().cloned().collect();
            (s.is_downloading, pending, s.active_ids.len())
        });
        if !downloading {
            return;
        }

        let available = limit.saturating_sub(active);
        for file in pending.iter().take(available) {
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let claimed = self.state.dispatch(Action::Claim {
                id: file.id.clone(),
                generation,
                limit,
            });
            if !claimed {
                continue;
            }
            let key = file.key();
            self.progress.reset(&key, generation);
            tracing::debug!(id = %file.id, generation, "Claimed slot");
            self.spawn_worker(Claim {
                file: file.clone(),
                key,
                generation,
            });
        }

        let (pending_left, active_now) = self
            .state
            .read(|s| (s.pending().len(), s.active_ids.len()));

        if pending_left == 0 && active_now == 0 {
            self.finish_session();
        } else if pending_left > 0 && active_now >= limit {
            self.schedule_retry();
        }
    }

    fn spawn_worker(&self, claim: Claim) {
        let Ok(listener) = self.arc() else {
            return;
        };
        let transport = self.transport.clone();
        let progress = self.progress.clone();
        let headers = self.config.headers.clone();
        tokio::spawn(run_transfer(transport, progress, headers, claim, listener));
    }

    fn schedule_retry(&self) {
        if self.retry_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(controller) = self.arc() else {
            self.retry_pending.store(false, Ordering::SeqCst);
            return;
        };
        let delay = self.config.retry_delay();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = controller.shutdown.cancelled() => return,
            }
            controller.retry_pending.store(false, Ordering::SeqCst);
            controller.kick();
        });
    }

    fn finish_session(&self) {
        let Some(previous) = self.state.transition(Action::FinishSession) else {
            return;
        };
        let summary = SessionSummary {
            succeeded: previous.succeeded,
            failed: previous.failed,
            total: previous.queue.len(),
        };
        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Download session finished: {}",
            summary.message()
        );
        self.emit(QueueEvent::SessionFinished { summary });
    }

    /// Begin a session. No-op on an empty queue or if already running.
    pub fn start(&self) -> bool {
        if !self.state.dispatch(Action::Start) {
            return false;
        }
        let total = self.state.read(|s| s.queue.len());
        tracing::info!(total, "Download session started");
        self.emit(QueueEvent::SessionStarted { total });
        self.kick();
        true
    }

    /// End the session: claimed entries go back to `Queued` and every
    /// recorded job is cancelled.
    pub async fn stop(&self) {
        let Some(previous) = self.state.transition(Action::Stop) else {
            return;
        };
        for file in previous
            .queue
            .iter()
            .filter(|f| previous.active_ids.contains(&f.id))
        {
            self.progress.clear(&file.key());
        }
        let jobs = previous.active_jobs();
        tracing::info!(cancelled = jobs.len(), "Download session stopped");
        self.emit(QueueEvent::SessionStopped);

        for job_id in jobs {
            self.transport.cancel(job_id).await;
        }
    }

    /// Stop scheduling and wait for pending metadata writes
    pub async fn shutdown(&self) {
        self.stop().await;
        self.shutdown.cancel();
        self.followups.close();
        self.followups.wait().await;
    }

    fn handle_success(&self, report: &TransferReport, total_bytes: Option<u64>) {
        let claim = &report.claim;
        let accepted = self.state.dispatch(Action::Complete {
            id: claim.file.id.clone(),
            generation: claim.generation,
            job_id: report.job_id,
            is_downloaded: true,
        });
        if !accepted {
            tracing::debug!(id = %claim.file.id, "Dropping stale completion");
            return;
        }
        self.progress.clear(&claim.key);
        tracing::debug!(id = %claim.file.id, "Transfer completed");
        self.emit(QueueEvent::TransferCompleted {
            id: claim.file.id.clone(),
            key: claim.key.clone(),
        });

        // Verification and the metadata write never hold the slot
        let file = claim.file.clone();
        let key = claim.key.clone();
        let metadata = self.metadata.clone();
        let events = self.events.clone();
        let algorithm = self.config.checksum_algorithm;
        self.followups.spawn(async move {
            let verification = validate_download(
                &file.destination,
                algorithm,
                total_bytes,
                file.expected_checksum.as_ref(),
            )
            .await;

            for message in &verification.warnings {
                tracing::warn!(id = %file.id, "Verification warning: {}", message);
                let _ = events.send(QueueEvent::ChecksumWarning {
                    id: file.id.clone(),
                    key: key.clone(),
                    message: message.clone(),
                });
            }

            let record = record_for(&file, &verification);
            match metadata.insert(&record).await {
                Ok(()) => {
                    let _ = events.send(QueueEvent::FileRecorded {
                        id: file.id.clone(),
                    });
                }
                Err(e) => {
                    tracing::warn!(id = %file.id, "Failed to record file metadata: {}", e);
                }
            }
        });
    }

    fn handle_failure(&self, report: &TransferReport, error: &str) {
        let claim = &report.claim;
        let accepted = self.state.dispatch(Action::Fail {
            id: claim.file.id.clone(),
            generation: claim.generation,
            job_id: report.job_id,
        });
        if !accepted {
            tracing::debug!(id = %claim.file.id, "Dropping stale failure");
            return;
        }
        self.progress.clear(&claim.key);
        tracing::warn!(id = %claim.file.id, "Transfer failed: {}", error);
        self.emit(QueueEvent::TransferFailed {
            id: claim.file.id.clone(),
            key: claim.key.clone(),
            error: error.to_string(),
        });
    }

    fn handle_cancelled(&self, report: &TransferReport) {
        let claim = &report.claim;
        let accepted = self.state.dispatch(Action::Cancel {
            id: claim.file.id.clone(),
            generation: claim.generation,
            job_id: report.job_id,
        });
        if !accepted {
            return;
        }
        self.progress.clear(&claim.key);
        tracing::debug!(id = %claim.file.id, "Transfer cancelled");
        self.emit(QueueEvent::TransferCancelled {
            id: claim.file.id.clone(),
            key: claim.key.clone(),
        });
    }

    fn emit(&self, event: QueueEvent) {
        // Ignore send errors (no receivers)
        let _ = self.events.send(event);
    }
}

impl ClaimListener for QueueController {
    fn on_job(&self, claim: &Claim, job_id: JobId) -> bool {
        let attached = self.state.dispatch(Action::AttachJob {
            key: claim.key.clone(),
            generation: claim.generation,
            job_id,
        });
        if attached {
            self.emit(QueueEvent::TransferStarted {
                id: claim.file.id.clone(),
                key: claim.key.clone(),
                job_id,
            });
        }
        attached
    }

    fn on_finished(&self, report: TransferReport) {
        match &report.outcome {
            Outcome::Succeeded { total_bytes } => self.handle_success(&report, *total_bytes),
            Outcome::Failed(error) => self.handle_failure(&report, error),
            Outcome::Cancelled => self.handle_cancelled(&report),
        }
        self.kick();
    }
}

impl Drop for QueueController {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
