//! High-frequency progress map
//!
//! Kept apart from [`crate::state::QueueState`] so per-chunk updates never
//! touch the bulk state, its snapshot, or its observers. Entries are tagged
//! with the claim generation that created them; updates from an older claim
//! are ignored, and an entry never moves backwards until it is cleared.

use crate::protocol::{DownloadKey, ProgressEvent};
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast;

const PROGRESS_CHANNEL_CAPACITY: usize = 1024;

/// Progress of one claimed transfer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEntry {
    pub generation: u64,
    pub bytes_written: u64,
    pub total_bytes: Option<u64>,
    /// `0.0..=1.0`
    pub fraction: f64,
}

pub struct ProgressStore {
    entries: RwLock<HashMap<DownloadKey, ProgressEntry>>,
    events: broadcast::Sender<ProgressEvent>,
}

impl ProgressStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Start a fresh entry at zero for a new claim
    pub fn reset(&self, key: &DownloadKey, generation: u64) {
        self.entries.write().insert(
            key.clone(),
            ProgressEntry {
                generation,
                bytes_written: 0,
                total_bytes: None,
                fraction: 0.0,
            },
        );
        self.emit(key, Some(0.0));
    }

    /// Apply a transport progress callback.
    ///
    /// Returns false if the update was ignored (unknown key, other claim, or
    /// a value lower than the one already recorded).
    pub fn update(
        &self,
        key: &DownloadKey,
        generation: u64,
        bytes_written: u64,
        total_bytes: Option<u64>,
    ) -> bool {
        let fraction = {
            let mut entries = self.entries.write();
            let Some(entry) = entries.get_mut(key) else {
                return false;
            };
            if entry.generation != generation || bytes_written < entry.bytes_written {
                return false;
            }
            let fraction = match total_bytes {
                Some(total) if total > 0 => (bytes_written as f64 / total as f64).min(1.0),
                _ => entry.fraction,
            };
            entry.bytes_written = bytes_written;
            entry.total_bytes = total_bytes.or(entry.total_bytes);
            entry.fraction = entry.fraction.max(fraction);
            entry.fraction
        };
        self.emit(key, Some(fraction));
        true
    }

    /// Drop the entry for `key`
    pub fn clear(&self, key: &DownloadKey) {
        if self.entries.write().remove(key).is_some() {
            self.emit(key, None);
        }
    }

    pub fn get(&self, key: &DownloadKey) -> Option<f64> {
        self.entries.read().get(key).map(|e| e.fraction)
    }

    pub fn entry(&self, key: &DownloadKey) -> Option<ProgressEntry> {
        self.entries.read().get(key).copied()
    }

    /// Subscribe to progress events
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    fn emit(&self, key: &DownloadKey, progress: Option<f64>) {
        // Ignore send errors (no receivers)
        let _ = self.events.send(ProgressEvent {
            key: key.clone(),
            progress,
        });
    }
}

impl Default for ProgressStore {
    fn default() -> Self {
        Self::new()
    }
}
