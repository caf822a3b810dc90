//! Queue snapshot persistence
//!
//! The whole [`QueueState`] is stored as one JSON blob under a single key.
//! Writes are debounced: each state change cancels the pending write and
//! schedules a new one. An empty queue clears the key right away. A flush
//! writes whatever is pending before returning.

use crate::error::{QueueError, Result};
use crate::state::{Action, QueueState, StateStore};
use crate::storage::KeyValueStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Serialize a state for storage
pub fn encode_snapshot(state: &QueueState) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(state)?)
}

/// Parse a stored snapshot
pub fn decode_snapshot(bytes: &[u8]) -> Result<QueueState> {
    Ok(serde_json::from_slice(bytes)?)
}

enum Command {
    Schedule(Vec<u8>),
    Clear,
    Flush(oneshot::Sender<()>),
}

/// Debounced writer for the queue snapshot
pub struct QueuePersistence {
    store: Arc<dyn KeyValueStore>,
    key: String,
    commands: mpsc::UnboundedSender<Command>,
    writer: JoinHandle<()>,
}

impl QueuePersistence {
    /// Start the writer task
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>, debounce: Duration) -> Self {
        let key = key.into();
        let (commands, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(run_writer(store.clone(), key.clone(), debounce, rx));
        Self {
            store,
            key,
            commands,
            writer,
        }
    }

    /// Queue a write of `state`, replacing any pending one
    pub fn schedule(&self, state: &QueueState) {
        let command = if state.queue.is_empty() {
            Command::Clear
        } else {
            match encode_snapshot(state) {
                Ok(bytes) => Command::Schedule(bytes),
                Err(e) => {
                    tracing::warn!("Failed to encode queue snapshot: {}", e);
                    return;
                }
            }
        };
        let _ = self.commands.send(command);
    }

    /// Drop any pending write and remove the stored snapshot
    pub fn clear(&self) {
        let _ = self.commands.send(Command::Clear);
    }

    /// Write the pending snapshot now, if any
    pub async fn flush(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(Command::Flush(ack))
            .map_err(|_| QueueError::Shutdown)?;
        done.await.map_err(|_| QueueError::Shutdown)
    }

    /// Follow state changes and schedule a write after each one
    pub fn watch(self: &Arc<Self>, state: Arc<StateStore>, shutdown: CancellationToken) {
        let persistence = Arc::clone(self);
        let mut revisions = state.subscribe();
        tokio::spawn(async move {
            let mut last: Option<Vec<u8>> = None;
            loop {
                tokio::select! {
                    changed = revisions.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
                let snapshot = state.snapshot();
                let encoded = encode_snapshot(&snapshot).ok();
                // Session counters are not persisted; skip writes they alone caused
                if encoded.is_some() && encoded == last {
                    continue;
                }
                persistence.schedule(&snapshot);
                last = encoded;
            }
        });
    }

    /// Load the stored snapshot into `state` after `delay`.
    ///
    /// Restores only a non-empty queue that was not mid-session when saved,
    /// and only into an untouched store. Returns the number of restored
    /// entries. A corrupt snapshot is deleted and otherwise ignored.
    pub async fn restore(&self, state: &StateStore, delay: Duration) -> Result<usize> {
        tokio::time::sleep(delay).await;

        let Some(bytes) = self.store.get(&self.key).await? else {
            return Ok(0);
        };

        let snapshot = match decode_snapshot(&bytes) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::debug!("Discarding unreadable queue snapshot: {}", e);
                self.clear();
                return Ok(0);
            }
        };

        if snapshot.queue.is_empty() || snapshot.is_downloading {
            tracing::debug!(
                queued = snapshot.queue.len(),
                was_downloading = snapshot.is_downloading,
                "Queue snapshot not restored"
            );
            return Ok(0);
        }

        let queued = snapshot.queue.len();
        if state.dispatch(Action::Restore(snapshot)) {
            tracing::info!(queued, "Restored download queue");
            Ok(queued)
        } else {
            Ok(0)
        }
    }
}

impl Drop for QueuePersistence {
    fn drop(&mut self) {
        self.writer.abort();
    }
}

async fn run_writer(
    store: Arc<dyn KeyValueStore>,
    key: String,
    debounce: Duration,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut pending: Option<Vec<u8>> = None;
    let mut deadline = Instant::now();

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Schedule(bytes)) => {
                    pending = Some(bytes);
                    deadline = Instant::now() + debounce;
                }
                Some(Command::Clear) => {
                    pending = None;
                    if let Err(e) = store.remove(&key).await {
                        tracing::warn!("Failed to clear queue snapshot: {}", e);
                    }
                }
                Some(Command::Flush(ack)) => {
                    if let Some(bytes) = pending.take() {
                        write(&*store, &key, &bytes).await;
                    }
                    let _ = ack.send(());
                }
                None => {
                    if let Some(bytes) = pending.take() {
                        write(&*store, &key, &bytes).await;
                    }
                    break;
                }
            },
            _ = sleep_until(deadline), if pending.is_some() => {
                if let Some(bytes) = pending.take() {
                    write(&*store, &key, &bytes).await;
                }
            }
        }
    }
}

async fn write(store: &dyn KeyValueStore, key: &str, bytes: &[u8]) {
    match store.set(key, bytes).await {
        Ok(()) => tracing::debug!(bytes = bytes.len(), "Saved queue snapshot"),
        Err(e) => tracing::warn!("Failed to save queue snapshot: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DownloadRecord, QueuedFile};
    use crate::storage::MemoryStorage;

    const KEY: &str = "download_queue_state";

    fn idle_state() -> QueueState {
        let file = QueuedFile::new("a", "a.pdf", "https://h/a.pdf", "/d/a.pdf");
        let mut state = QueueState::default();
        state.downloads.insert(file.key(), DownloadRecord::queued());
        state.queue.push(file);
        state
    }

    #[test]
    fn snapshot_uses_wire_field_names() {
        let mut state = idle_state();
        state.active_ids.insert("a".into());
        let json: serde_json::Value =
            serde_json::from_slice(&encode_snapshot(&state).unwrap()).unwrap();
        assert!(json["activeIds"].is_array());
        assert_eq!(json["isDownloading"], false);
        assert!(json["downloads"]["https://h/a.pdf:/d/a.pdf"].is_object());
        assert!(json.get("succeeded").is_none());
    }

    #[test]
    fn snapshot_round_trip() {
        let mut state = idle_state();
        state.has_failure = true;
        let back = decode_snapshot(&encode_snapshot(&state).unwrap()).unwrap();
        assert_eq!(back, state);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_are_debounced() {
        let store = Arc::new(MemoryStorage::new());
        let persistence = QueuePersistence::new(store.clone(), KEY, Duration::from_secs(2));

        persistence.schedule(&idle_state());
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let mut second = idle_state();
        second.has_failure = true;
        persistence.schedule(&second);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(store.get(KEY).await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(600)).await;
        let stored = decode_snapshot(&store.get(KEY).await.unwrap().unwrap()).unwrap();
        assert!(stored.has_failure);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_writes_pending_snapshot() {
        let store = Arc::new(MemoryStorage::new());
        let persistence = QueuePersistence::new(store.clone(), KEY, Duration::from_secs(60));

        persistence.schedule(&idle_state());
        persistence.flush().await.unwrap();
        assert!(store.get(KEY).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_queue_clears_snapshot() {
        let store = Arc::new(MemoryStorage::new());
        store.set(KEY, b"stale").await.unwrap();
        let persistence = QueuePersistence::new(store.clone(), KEY, Duration::from_secs(2));

        persistence.schedule(&QueueState::default());
        persistence.flush().await.unwrap();
        assert!(store.get(KEY).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn restore_idle_snapshot() {
        let store = Arc::new(MemoryStorage::new());
        store
            .set(KEY, &encode_snapshot(&idle_state()).unwrap())
            .await
            .unwrap();
        let persistence = QueuePersistence::new(store.clone(), KEY, Duration::from_secs(2));
        let state = StateStore::new();

        let restored = persistence
            .restore(&state, Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(restored, 1);
        assert_eq!(state.read(|s| s.queue.len()), 1);
        assert!(!state.read(|s| s.is_downloading));
    }

    #[tokio::test(start_paused = true)]
    async fn mid_session_snapshot_is_not_restored() {
        let store = Arc::new(MemoryStorage::new());
        let mut snapshot = idle_state();
        snapshot.is_downloading = true;
        store
            .set(KEY, &encode_snapshot(&snapshot).unwrap())
            .await
            .unwrap();
        let persistence = QueuePersistence::new(store.clone(), KEY, Duration::from_secs(2));
        let state = StateStore::new();

        assert_eq!(persistence.restore(&state, Duration::ZERO).await.unwrap(), 0);
        assert!(state.read(|s| s.queue.is_empty()));
    }

    #[tokio::test(start_paused = true)]
    async fn corrupt_snapshot_is_discarded() {
        let store = Arc::new(MemoryStorage::new());
        store.set(KEY, b"{not json").await.unwrap();
        let persistence = QueuePersistence::new(store.clone(), KEY, Duration::from_secs(2));
        let state = StateStore::new();

        assert_eq!(persistence.restore(&state, Duration::ZERO).await.unwrap(), 0);
        persistence.flush().await.unwrap();
        assert!(store.get(KEY).await.unwrap().is_none());
    }
}
