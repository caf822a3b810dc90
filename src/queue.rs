//! Download Queue - public entry point
//!
//! `DownloadQueue` wires the state store, progress store, controller,
//! persistence and file library together and exposes the operations and
//! queries callers use. It never schedules on its own; scheduling belongs
//! to the [`QueueController`].

use crate::config::QueueConfig;
use crate::controller::QueueController;
use crate::error::{QueueError, Result};
use crate::library::FileLibrary;
use crate::persistence::QueuePersistence;
use crate::progress::ProgressStore;
use crate::protocol::{
    DownloadKey, DownloadRecord, ProgressEvent, QueueEvent, QueueStatus, QueuedFile,
};
use crate::state::{Action, QueueState, StateStore};
use crate::storage::{KeyValueStore, MetadataStore};
use crate::transport::Transport;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

/// Maximum number of events to buffer
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// The download queue
pub struct DownloadQueue {
    config: QueueConfig,
    state: Arc<StateStore>,
    progress: Arc<ProgressStore>,
    controller: Arc<QueueController>,
    persistence: Arc<QueuePersistence>,
    library: FileLibrary,
    metadata: Arc<dyn MetadataStore>,
    snapshots: Arc<dyn KeyValueStore>,
    events: broadcast::Sender<QueueEvent>,
    /// Stops the snapshot watcher and a pending restore
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl DownloadQueue {
    /// Create a queue over explicitly provided collaborators.
    ///
    /// Must be called inside a Tokio runtime. A stored snapshot is restored
    /// in the background after `restore_delay_ms`.
    pub async fn new(
        config: QueueConfig,
        transport: Arc<dyn Transport>,
        metadata: Arc<dyn MetadataStore>,
        snapshots: Arc<dyn KeyValueStore>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let state = Arc::new(StateStore::new());
        let progress = Arc::new(ProgressStore::new());

        let controller = QueueController::new(
            config.clone(),
            state.clone(),
            progress.clone(),
            transport,
            metadata.clone(),
            events.clone(),
        );

        let persistence = Arc::new(QueuePersistence::new(
            snapshots.clone(),
            config.snapshot_key.clone(),
            config.persist_debounce(),
        ));
        let shutdown = CancellationToken::new();
        persistence.watch(state.clone(), shutdown.clone());

        let queue = Arc::new(Self {
            library: FileLibrary::new(metadata.clone()),
            config,
            state,
            progress,
            controller,
            persistence,
            metadata,
            snapshots,
            events,
            shutdown,
            closed: AtomicBool::new(false),
        });

        queue.start_restore_task();

        Ok(queue)
    }

    /// Open a queue with the HTTP transport and a SQLite store at
    /// [`QueueConfig::get_database_path`].
    #[cfg(all(feature = "http", feature = "storage"))]
    pub async fn open(config: QueueConfig) -> Result<Arc<Self>> {
        use crate::storage::SqliteStorage;
        use crate::transport::HttpTransport;

        config.validate()?;
        let storage = Arc::new(SqliteStorage::open(config.get_database_path()).await?);
        let transport = Arc::new(HttpTransport::new(&config)?);
        Self::new(config, transport, storage.clone(), storage).await
    }

    fn start_restore_task(&self) {
        let persistence = self.persistence.clone();
        let state = self.state.clone();
        let events = self.events.clone();
        let shutdown = self.shutdown.clone();
        let delay = self.config.restore_delay();
        tokio::spawn(async move {
            tokio::select! {
                restored = persistence.restore(&state, delay) => match restored {
                    Ok(0) => {}
                    Ok(queued) => {
                        let _ = events.send(QueueEvent::Restored { queued });
                    }
                    Err(e) => tracing::warn!("Failed to load queue snapshot: {}", e),
                },
                _ = shutdown.cancelled() => {}
            }
        });
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Shutdown);
        }
        Ok(())
    }

    /// Add files under one context.
    ///
    /// Each file is looked up on disk and in the metadata store; files already
    /// present are seeded as downloaded, the rest as queued. Entries with an
    /// existing id are replaced. Does not start transfers.
    pub async fn add_files(
        &self,
        files: Vec<QueuedFile>,
        context_id: &str,
        context_type: &str,
    ) -> Result<()> {
        self.ensure_open()?;

        let mut seeded = Vec::with_capacity(files.len());
        for mut file in files {
            if file.id.is_empty() {
                return Err(QueueError::invalid_input("id", "File id is empty"));
            }
            if file.source.is_empty() {
                return Err(QueueError::invalid_input("source", "File source is empty"));
            }
            file.context_id = context_id.to_string();
            file.context_type = context_type.to_string();

            let record = if self.already_downloaded(&file).await {
                DownloadRecord::downloaded()
            } else {
                DownloadRecord::queued()
            };
            seeded.push((file, record));
        }

        let ids: Vec<String> = seeded.iter().map(|(f, _)| f.id.clone()).collect();
        if self.state.dispatch(Action::AddFiles(seeded)) {
            tracing::debug!(count = ids.len(), context_id, "Files added to queue");
            self.emit(QueueEvent::FilesAdded { ids });
            self.controller.kick();
        }
        Ok(())
    }

    /// Disk first, then the metadata store (which follows relocations).
    /// Any lookup error counts as "not downloaded".
    async fn already_downloaded(&self, file: &QueuedFile) -> bool {
        if exists(&file.destination).await {
            return true;
        }
        match self.metadata.find(&file.id).await {
            Ok(Some(record)) => exists(&record.path).await,
            Ok(None) => false,
            Err(e) => {
                tracing::debug!(id = %file.id, "Metadata lookup failed: {}", e);
                false
            }
        }
    }

    /// Remove entries by id. Ignored while a session is running.
    pub fn remove_files(&self, ids: &[String]) -> bool {
        let removed = self.state.dispatch(Action::RemoveFiles(ids.to_vec()));
        if removed {
            self.emit(QueueEvent::FilesRemoved { ids: ids.to_vec() });
        }
        removed
    }

    /// Start a session. No-op on an empty queue.
    pub fn start_queue_download(&self) -> bool {
        if self.ensure_open().is_err() {
            return false;
        }
        self.controller.start()
    }

    /// Stop the session and cancel every active transfer
    pub async fn stop_queue_download(&self) {
        self.controller.stop().await;
    }

    /// Queue entries of one context, optionally of one type
    pub fn files_by_context(&self, context_id: &str, context_type: Option<&str>) -> Vec<QueuedFile> {
        self.state.read(|s| {
            s.queue
                .iter()
                .filter(|f| f.in_context(context_id, context_type))
                .cloned()
                .collect()
        })
    }

    /// Remove a context's entries. Ignored while a session is running.
    pub fn clear_context_files(&self, context_id: &str, context_type: Option<&str>) -> bool {
        let ids: Vec<String> = self
            .files_by_context(context_id, context_type)
            .into_iter()
            .map(|f| f.id)
            .collect();
        let cleared = self.state.dispatch(Action::ClearContext {
            context_id: context_id.to_string(),
            context_type: context_type.map(str::to_string),
        });
        if cleared {
            self.emit(QueueEvent::FilesRemoved { ids });
        }
        cleared
    }

    pub fn is_downloaded(&self, key: &DownloadKey) -> bool {
        self.state.read(|s| s.is_downloaded(key))
    }

    /// Progress of one key in `0.0..=1.0`; `None` if not in flight
    pub fn progress(&self, key: &DownloadKey) -> Option<f64> {
        if self.is_downloaded(key) {
            return Some(1.0);
        }
        self.progress.get(key)
    }

    /// Record for one key, if known
    pub fn record(&self, key: &DownloadKey) -> Option<DownloadRecord> {
        self.state.read(|s| s.record(key).cloned())
    }

    /// Mean progress over queue entries. Terminal entries count as 1.0.
    pub fn overall_progress(&self) -> f64 {
        self.state.read(|s| {
            if s.queue.is_empty() {
                return if s.has_completed { 1.0 } else { 0.0 };
            }
            let sum: f64 = s
                .queue
                .iter()
                .map(|f| {
                    let key = f.key();
                    match s.record(&key) {
                        Some(r) if r.is_downloaded || r.phase.is_terminal() => 1.0,
                        _ => self.progress.get(&key).unwrap_or(0.0),
                    }
                })
                .sum();
            sum / s.queue.len() as f64
        })
    }

    /// `(index, total)`: 1-based index of the file being worked on
    pub fn current_file_index(&self) -> (usize, usize) {
        self.state.read(|s| {
            let total = s.queue.len();
            ((s.terminal_count() + 1).min(total), total)
        })
    }

    pub fn status(&self) -> QueueStatus {
        let (current_file_index, total) = self.current_file_index();
        let overall_progress = self.overall_progress();
        self.state.read(|s| QueueStatus {
            is_downloading: s.is_downloading,
            has_completed: s.has_completed,
            has_failure: s.has_failure,
            total,
            active: s.active_ids.len(),
            current_file_index,
            overall_progress,
        })
    }

    /// Copy of the bulk state
    pub fn state(&self) -> QueueState {
        self.state.snapshot()
    }

    /// Subscribe to queue events
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Subscribe to progress events
    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    /// Observe bulk state revisions
    pub fn watch_state(&self) -> watch::Receiver<u64> {
        self.state.subscribe()
    }

    pub fn library(&self) -> &FileLibrary {
        &self.library
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Graceful shutdown: stop transfers, flush the snapshot, close stores
    pub async fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.controller.shutdown().await;
        self.shutdown.cancel();

        self.persistence.schedule(&self.state.snapshot());
        self.persistence.flush().await?;

        self.metadata.close().await?;
        self.snapshots.close().await?;
        tracing::info!("Download queue shut down");
        Ok(())
    }

    fn emit(&self, event: QueueEvent) {
        // Ignore send errors (no receivers)
        let _ = self.events.send(event);
    }
}

impl Drop for DownloadQueue {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
