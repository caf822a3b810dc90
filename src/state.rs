//! Queue state and its transition function
//!
//! [`QueueState`] is the bulk state of the queue. It only changes through
//! [`reduce`], a pure function over a closed set of [`Action`]s, so every
//! scheduling rule can be tested without I/O. [`StateStore`] wraps it for
//! shared use and notifies observers through a revision channel.

use crate::protocol::{DownloadKey, DownloadPhase, DownloadRecord, JobId, QueuedFile};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::watch;

/// Bulk queue state. This is also the snapshot format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueState {
    /// Ordered, unique by id
    pub queue: Vec<QueuedFile>,
    pub is_downloading: bool,
    /// Ids occupying a worker slot
    pub active_ids: HashSet<String>,
    pub downloads: HashMap<DownloadKey, DownloadRecord>,
    pub has_completed: bool,
    pub has_failure: bool,
    /// Transfers that succeeded this session
    #[serde(skip)]
    pub succeeded: usize,
    /// Transfers that failed this session
    #[serde(skip)]
    pub failed: usize,
}

impl QueueState {
    pub fn record(&self, key: &DownloadKey) -> Option<&DownloadRecord> {
        self.downloads.get(key)
    }

    pub fn file(&self, id: &str) -> Option<&QueuedFile> {
        self.queue.iter().find(|f| f.id == id)
    }

    pub fn is_downloaded(&self, key: &DownloadKey) -> bool {
        self.downloads.get(key).is_some_and(|r| r.is_downloaded)
    }

    /// Entries waiting for a slot, in queue order.
    ///
    /// Terminal entries are excluded: a failure is not retried within the
    /// session that produced it. So is any entry whose key is already being
    /// transferred.
    pub fn pending(&self) -> Vec<&QueuedFile> {
        self.queue
            .iter()
            .filter(|f| !self.active_ids.contains(&f.id))
            .filter(|f| match self.downloads.get(&f.key()) {
                Some(r) => {
                    !r.is_downloaded
                        && !r.phase.is_terminal()
                        && r.phase != DownloadPhase::Downloading
                }
                None => true,
            })
            .collect()
    }

    /// Jobs of entries currently holding a slot
    pub fn active_jobs(&self) -> Vec<JobId> {
        self.queue
            .iter()
            .filter(|f| self.active_ids.contains(&f.id))
            .filter_map(|f| self.downloads.get(&f.key()).and_then(|r| r.job_id))
            .collect()
    }

    /// Number of entries that reached a terminal phase
    pub fn terminal_count(&self) -> usize {
        self.queue
            .iter()
            .filter(|f| {
                self.downloads
                    .get(&f.key())
                    .is_some_and(|r| r.is_downloaded || r.phase.is_terminal())
            })
            .count()
    }

    /// Make a state loaded from a snapshot safe to resume.
    ///
    /// Nothing can be in flight after a restart, so any claimed entry goes
    /// back to `Queued` and the slot set is emptied.
    pub fn sanitize_restored(mut self) -> Self {
        self.is_downloading = false;
        self.active_ids.clear();
        for record in self.downloads.values_mut() {
            if record.phase == DownloadPhase::Downloading {
                record.phase = DownloadPhase::Queued;
            }
            record.job_id = None;
            record.generation = 0;
        }
        self.succeeded = 0;
        self.failed = 0;
        self
    }
}

/// Closed set of state transitions
#[derive(Debug, Clone)]
pub enum Action {
    /// Append files (replacing same-id entries) with their seeded records
    AddFiles(Vec<(QueuedFile, DownloadRecord)>),
    /// Remove entries by id; ignored while downloading
    RemoveFiles(Vec<String>),
    /// Remove a context's entries; ignored while downloading
    ClearContext {
        context_id: String,
        context_type: Option<String>,
    },
    /// Begin a session; ignored on an empty queue
    Start,
    /// Cancel the session and return claimed entries to `Queued`
    Stop,
    /// Occupy a slot for `id`
    Claim {
        id: String,
        generation: u64,
        limit: usize,
    },
    /// Record the transport job for a claim
    AttachJob {
        key: DownloadKey,
        generation: u64,
        job_id: JobId,
    },
    /// Transfer succeeded; `is_downloaded` reflects the existence check
    Complete {
        id: String,
        generation: u64,
        job_id: Option<JobId>,
        is_downloaded: bool,
    },
    /// Transfer failed
    Fail {
        id: String,
        generation: u64,
        job_id: Option<JobId>,
    },
    /// Transfer was cancelled
    Cancel {
        id: String,
        generation: u64,
        job_id: Option<JobId>,
    },
    /// Every entry is terminal; end the session
    FinishSession,
    /// Replace the state with a restored snapshot
    Restore(QueueState),
}

/// Apply `action` to `state`.
///
/// Returns `None` when the action is rejected or would change nothing.
pub fn reduce(state: &QueueState, action: &Action) -> Option<QueueState> {
    match action {
        Action::AddFiles(files) => {
            if files.is_empty() {
                return None;
            }
            let mut next = state.clone();
            for (file, record) in files {
                // An entry holding a slot keeps its claim untouched
                if next.active_ids.contains(&file.id) {
                    continue;
                }
                let key = file.key();
                // One entry per key: the newest id wins unless the old one is in flight
                let key_in_flight = next.queue.iter().any(|f| {
                    f.id != file.id && f.key() == key && next.active_ids.contains(&f.id)
                });
                if key_in_flight {
                    continue;
                }
                next.queue.retain(|f| f.id == file.id || f.key() != key);
                match next.queue.iter_mut().find(|f| f.id == file.id) {
                    Some(existing) => *existing = file.clone(),
                    None => next.queue.push(file.clone()),
                }
                next.downloads.insert(key, record.clone());
            }
            prune_records(&mut next);
            changed(state, next)
        }

        Action::RemoveFiles(ids) => {
            if state.is_downloading {
                return None;
            }
            let mut next = state.clone();
            remove_where(&mut next, |f| ids.contains(&f.id));
            changed(state, next)
        }

        Action::ClearContext {
            context_id,
            context_type,
        } => {
            if state.is_downloading {
                return None;
            }
            let mut next = state.clone();
            remove_where(&mut next, |f| f.in_context(context_id, context_type.as_deref()));
            changed(state, next)
        }

        Action::Start => {
            if state.queue.is_empty() || state.is_downloading {
                return None;
            }
            let mut next = state.clone();
            next.is_downloading = true;
            next.has_completed = false;
            next.has_failure = false;
            next.succeeded = 0;
            next.failed = 0;
            prune_records(&mut next);
            // Failure is terminal per session only
            for file in &next.queue {
                if let Some(record) = next.downloads.get_mut(&file.key()) {
                    if record.phase == DownloadPhase::Failed {
                        record.phase = DownloadPhase::Queued;
                    }
                }
            }
            Some(next)
        }

        Action::Stop => {
            if !state.is_downloading && state.active_ids.is_empty() {
                return None;
            }
            let mut next = state.clone();
            next.is_downloading = false;
            let active: Vec<DownloadKey> = next
                .queue
                .iter()
                .filter(|f| next.active_ids.contains(&f.id))
                .map(|f| f.key())
                .collect();
            for key in active {
                if let Some(record) = next.downloads.get_mut(&key) {
                    record.phase = DownloadPhase::Queued;
                    record.job_id = None;
                }
            }
            next.active_ids.clear();
            Some(next)
        }

        Action::Claim {
            id,
            generation,
            limit,
        } => {
            if !state.is_downloading
                || state.active_ids.contains(id)
                || state.active_ids.len() >= *limit
            {
                return None;
            }
            let file = state.file(id)?;
            let key = file.key();
            if let Some(record) = state.downloads.get(&key) {
                if record.is_downloaded
                    || record.phase.is_terminal()
                    || record.phase == DownloadPhase::Downloading
                {
                    return None;
                }
            }
            // A key is transferred by at most one entry
            if state
                .queue
                .iter()
                .any(|f| f.id != *id && state.active_ids.contains(&f.id) && f.key() == key)
            {
                return None;
            }
            let mut next = state.clone();
            next.active_ids.insert(id.clone());
            next.downloads.insert(
                key,
                DownloadRecord {
                    phase: DownloadPhase::Downloading,
                    is_downloaded: false,
                    job_id: None,
                    generation: *generation,
                },
            );
            Some(next)
        }

        Action::AttachJob {
            key,
            generation,
            job_id,
        } => {
            let record = state.downloads.get(key)?;
            if record.generation != *generation
                || record.phase != DownloadPhase::Downloading
                || record.job_id.is_some()
            {
                return None;
            }
            let mut next = state.clone();
            if let Some(record) = next.downloads.get_mut(key) {
                record.job_id = Some(*job_id);
            }
            Some(next)
        }

        Action::Complete {
            id,
            generation,
            job_id,
            is_downloaded,
        } => {
            let key = current_claim(state, id, *generation, *job_id)?;
            let mut next = state.clone();
            next.active_ids.remove(id);
            next.downloads.insert(
                key,
                DownloadRecord {
                    phase: DownloadPhase::Completed,
                    is_downloaded: *is_downloaded,
                    job_id: None,
                    generation: *generation,
                },
            );
            next.succeeded += 1;
            Some(next)
        }

        Action::Fail {
            id,
            generation,
            job_id,
        } => {
            let key = current_claim(state, id, *generation, *job_id)?;
            let mut next = state.clone();
            next.active_ids.remove(id);
            next.downloads.insert(
                key,
                DownloadRecord {
                    phase: DownloadPhase::Failed,
                    is_downloaded: false,
                    job_id: None,
                    generation: *generation,
                },
            );
            next.failed += 1;
            next.has_failure = true;
            Some(next)
        }

        Action::Cancel {
            id,
            generation,
            job_id,
        } => {
            let key = current_claim(state, id, *generation, *job_id)?;
            let mut next = state.clone();
            next.active_ids.remove(id);
            next.downloads.insert(
                key,
                DownloadRecord {
                    phase: DownloadPhase::Queued,
                    is_downloaded: false,
                    job_id: None,
                    generation: *generation,
                },
            );
            Some(next)
        }

        Action::FinishSession => {
            if !state.is_downloading || !state.active_ids.is_empty() {
                return None;
            }
            let mut next = state.clone();
            next.is_downloading = false;
            next.queue.clear();
            next.has_completed = !next.has_failure;
            Some(next)
        }

        Action::Restore(restored) => {
            if state.is_downloading || !state.queue.is_empty() {
                return None;
            }
            Some(restored.clone().sanitize_restored())
        }
    }
}

fn changed(before: &QueueState, after: QueueState) -> Option<QueueState> {
    (before != &after).then_some(after)
}

/// Remove matching entries and their records
fn remove_where(state: &mut QueueState, pred: impl Fn(&QueuedFile) -> bool) {
    let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.queue)
        .into_iter()
        .partition(|f| pred(f));
    state.queue = kept;
    for file in removed {
        state.active_ids.remove(&file.id);
        let key = file.key();
        if !state.queue.iter().any(|f| f.key() == key) {
            state.downloads.remove(&key);
        }
    }
}

/// Drop records that no queue entry refers to.
///
/// A finished session keeps its records for queries until the next batch is
/// added or the next session starts.
fn prune_records(state: &mut QueueState) {
    let keys: HashSet<DownloadKey> = state.queue.iter().map(QueuedFile::key).collect();
    state.downloads.retain(|key, _| keys.contains(key));
}

/// Key of `id` if the report belongs to its current claim
fn current_claim(
    state: &QueueState,
    id: &str,
    generation: u64,
    job_id: Option<JobId>,
) -> Option<DownloadKey> {
    if !state.active_ids.contains(id) {
        return None;
    }
    let key = state.file(id)?.key();
    let record = state.downloads.get(&key)?;
    if record.generation != generation || record.phase != DownloadPhase::Downloading {
        return None;
    }
    match (record.job_id, job_id) {
        (Some(current), Some(reported)) if current != reported => None,
        _ => Some(key),
    }
}

/// Shared, observable holder of [`QueueState`]
pub struct StateStore {
    state: RwLock<QueueState>,
    revision: watch::Sender<u64>,
}

impl StateStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: RwLock::new(QueueState::default()),
            revision,
        }
    }

    /// Apply an action. Returns the previous state if anything changed.
    pub fn transition(&self, action: Action) -> Option<QueueState> {
        let previous = {
            let mut guard = self.state.write();
            let next = reduce(&guard, &action)?;
            std::mem::replace(&mut *guard, next)
        };
        self.revision.send_modify(|r| *r += 1);
        Some(previous)
    }

    /// Apply an action, reporting whether it changed the state
    pub fn dispatch(&self, action: Action) -> bool {
        self.transition(action).is_some()
    }

    /// Read the current state without cloning it
    pub fn read<R>(&self, f: impl FnOnce(&QueueState) -> R) -> R {
        f(&self.state.read())
    }

    pub fn snapshot(&self) -> QueueState {
        self.state.read().clone()
    }

    /// Receiver that observes a new revision after every change
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(id: &str) -> QueuedFile {
        let mut f = QueuedFile::new(
            id,
            format!("{id}.bin"),
            format!("https://example.com/{id}"),
            format!("/tmp/{id}.bin"),
        );
        f.context_id = "ctx".into();
        f.context_type = "course".into();
        f
    }

    fn with_files(ids: &[&str]) -> QueueState {
        let files = ids
            .iter()
            .map(|id| (file(id), DownloadRecord::queued()))
            .collect();
        reduce(&QueueState::default(), &Action::AddFiles(files)).unwrap()
    }

    fn started(ids: &[&str]) -> QueueState {
        reduce(&with_files(ids), &Action::Start).unwrap()
    }

    fn claim(state: &QueueState, id: &str, generation: u64, limit: usize) -> Option<QueueState> {
        reduce(
            state,
            &Action::Claim {
                id: id.into(),
                generation,
                limit,
            },
        )
    }

    #[test]
    fn add_replaces_same_id_in_place() {
        let state = with_files(&["a", "b"]);
        let mut renamed = file("a");
        renamed.name = "renamed".into();
        let next = reduce(
            &state,
            &Action::AddFiles(vec![(renamed, DownloadRecord::queued())]),
        )
        .unwrap();

        assert_eq!(next.queue.len(), 2);
        assert_eq!(next.queue[0].name, "renamed");
        assert_eq!(next.queue[1].id, "b");
    }

    #[test]
    fn add_does_not_touch_active_entry() {
        let state = claim(&started(&["a"]), "a", 1, 3).unwrap();
        let readd = reduce(
            &state,
            &Action::AddFiles(vec![(file("a"), DownloadRecord::queued())]),
        );
        assert!(readd.is_none());
    }

    #[test]
    fn start_is_noop_on_empty_queue() {
        assert!(reduce(&QueueState::default(), &Action::Start).is_none());
    }

    #[test]
    fn remove_is_gated_while_downloading() {
        let state = started(&["a"]);
        assert!(reduce(&state, &Action::RemoveFiles(vec!["a".into()])).is_none());

        let idle = with_files(&["a", "b"]);
        let next = reduce(&idle, &Action::RemoveFiles(vec!["a".into()])).unwrap();
        assert_eq!(next.queue.len(), 1);
        assert!(!next.downloads.contains_key(&file("a").key()));
    }

    #[test]
    fn clear_context_filters_by_type() {
        let mut other = file("z");
        other.context_type = "group".into();
        let state = reduce(
            &with_files(&["a"]),
            &Action::AddFiles(vec![(other, DownloadRecord::queued())]),
        )
        .unwrap();

        let next = reduce(
            &state,
            &Action::ClearContext {
                context_id: "ctx".into(),
                context_type: Some("course".into()),
            },
        )
        .unwrap();
        assert_eq!(next.queue.len(), 1);
        assert_eq!(next.queue[0].id, "z");
    }

    #[test]
    fn claim_respects_limit() {
        let state = started(&["a", "b", "c"]);
        let state = claim(&state, "a", 1, 2).unwrap();
        let state = claim(&state, "b", 2, 2).unwrap();
        assert!(claim(&state, "c", 3, 2).is_none());
        assert_eq!(state.active_ids.len(), 2);
        assert_eq!(state.pending().len(), 1);
    }

    #[test]
    fn claim_twice_is_rejected() {
        let state = claim(&started(&["a"]), "a", 1, 3).unwrap();
        assert!(claim(&state, "a", 2, 3).is_none());
    }

    #[test]
    fn claim_requires_session() {
        assert!(claim(&with_files(&["a"]), "a", 1, 3).is_none());
    }

    /// `b` shares `a`'s source and destination
    fn twin_of_a() -> QueuedFile {
        let mut twin = file("a");
        twin.id = "b".into();
        twin
    }

    #[test]
    fn claim_rejects_second_entry_for_busy_key() {
        // Two ids for one key can still arrive through a restored snapshot
        let mut state = started(&["a"]);
        state.queue.push(twin_of_a());

        let state = claim(&state, "a", 1, 3).unwrap();
        assert!(claim(&state, "b", 2, 3).is_none());
        assert!(state.pending().is_empty());

        let state = reduce(
            &state,
            &Action::Complete {
                id: "a".into(),
                generation: 1,
                job_id: None,
                is_downloaded: true,
            },
        )
        .unwrap();
        assert!(state.pending().is_empty());
        assert!(reduce(&state, &Action::FinishSession).is_some());
    }

    #[test]
    fn add_with_same_key_replaces_other_id() {
        let state = with_files(&["a", "c"]);
        let next = reduce(
            &state,
            &Action::AddFiles(vec![(twin_of_a(), DownloadRecord::queued())]),
        )
        .unwrap();
        let ids: Vec<_> = next.queue.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
        assert_eq!(next.downloads.len(), 2);
    }

    #[test]
    fn add_with_same_key_is_skipped_while_key_in_flight() {
        let state = claim(&started(&["a"]), "a", 1, 3).unwrap();
        let next = reduce(
            &state,
            &Action::AddFiles(vec![(twin_of_a(), DownloadRecord::queued())]),
        );
        assert!(next.is_none());
    }

    #[test]
    fn records_without_queue_entry_are_pruned() {
        let state = claim(&started(&["a"]), "a", 1, 3).unwrap();
        let state = reduce(
            &state,
            &Action::Complete {
                id: "a".into(),
                generation: 1,
                job_id: None,
                is_downloaded: true,
            },
        )
        .unwrap();
        let done = reduce(&state, &Action::FinishSession).unwrap();
        assert!(done.is_downloaded(&file("a").key()));

        // The next batch drops the finished session's records
        let next = reduce(
            &done,
            &Action::AddFiles(vec![(file("c"), DownloadRecord::queued())]),
        )
        .unwrap();
        assert_eq!(next.downloads.len(), 1);
        assert!(next.record(&file("c").key()).is_some());

        // Moving an id to a new key drops the old key's record
        let mut moved = file("c");
        moved.destination = "/tmp/elsewhere.bin".into();
        let moved_key = moved.key();
        let next = reduce(
            &next,
            &Action::AddFiles(vec![(moved, DownloadRecord::queued())]),
        )
        .unwrap();
        assert_eq!(next.downloads.keys().collect::<Vec<_>>(), vec![&moved_key]);
    }

    #[test]
    fn completion_is_idempotent() {
        let state = claim(&started(&["a"]), "a", 1, 3).unwrap();
        let done = Action::Complete {
            id: "a".into(),
            generation: 1,
            job_id: None,
            is_downloaded: true,
        };
        let state = reduce(&state, &done).unwrap();
        assert!(state.is_downloaded(&file("a").key()));
        assert_eq!(state.succeeded, 1);
        assert!(reduce(&state, &done).is_none());
    }

    #[test]
    fn stale_generation_is_dropped() {
        let state = claim(&started(&["a"]), "a", 5, 3).unwrap();
        let stale = Action::Fail {
            id: "a".into(),
            generation: 4,
            job_id: None,
        };
        assert!(reduce(&state, &stale).is_none());
    }

    #[test]
    fn mismatched_job_is_dropped() {
        let key = file("a").key();
        let state = claim(&started(&["a"]), "a", 1, 3).unwrap();
        let state = reduce(
            &state,
            &Action::AttachJob {
                key,
                generation: 1,
                job_id: JobId::new(10),
            },
        )
        .unwrap();
        let late = Action::Complete {
            id: "a".into(),
            generation: 1,
            job_id: Some(JobId::new(9)),
            is_downloaded: true,
        };
        assert!(reduce(&state, &late).is_none());
    }

    #[test]
    fn failure_sets_flags_and_frees_slot() {
        let state = claim(&started(&["a"]), "a", 1, 3).unwrap();
        let state = reduce(
            &state,
            &Action::Fail {
                id: "a".into(),
                generation: 1,
                job_id: None,
            },
        )
        .unwrap();
        assert!(state.active_ids.is_empty());
        assert!(state.has_failure);
        assert_eq!(state.failed, 1);
        assert_eq!(state.record(&file("a").key()).unwrap().phase, DownloadPhase::Failed);
        // Not retried within the session
        assert!(state.pending().is_empty());
    }

    #[test]
    fn cancel_returns_to_queued_without_failure() {
        let state = claim(&started(&["a"]), "a", 1, 3).unwrap();
        let state = reduce(
            &state,
            &Action::Cancel {
                id: "a".into(),
                generation: 1,
                job_id: None,
            },
        )
        .unwrap();
        assert!(!state.has_failure);
        assert_eq!(state.record(&file("a").key()).unwrap().phase, DownloadPhase::Queued);
        assert_eq!(state.pending().len(), 1);
    }

    #[test]
    fn stop_requeues_active_and_drops_late_reports() {
        let key = file("a").key();
        let state = claim(&started(&["a", "b"]), "a", 1, 3).unwrap();
        let state = reduce(
            &state,
            &Action::AttachJob {
                key: key.clone(),
                generation: 1,
                job_id: JobId::new(1),
            },
        )
        .unwrap();
        assert_eq!(state.active_jobs(), vec![JobId::new(1)]);

        let stopped = reduce(&state, &Action::Stop).unwrap();
        assert!(!stopped.is_downloading);
        assert!(stopped.active_ids.is_empty());
        let record = stopped.record(&key).unwrap();
        assert_eq!(record.phase, DownloadPhase::Queued);
        assert_eq!(record.job_id, None);

        let late_failure = Action::Fail {
            id: "a".into(),
            generation: 1,
            job_id: Some(JobId::new(1)),
        };
        assert!(reduce(&stopped, &late_failure).is_none());
    }

    #[test]
    fn finish_clears_queue_and_reports_success() {
        let state = claim(&started(&["a"]), "a", 1, 3).unwrap();
        let state = reduce(
            &state,
            &Action::Complete {
                id: "a".into(),
                generation: 1,
                job_id: None,
                is_downloaded: true,
            },
        )
        .unwrap();
        let done = reduce(&state, &Action::FinishSession).unwrap();
        assert!(!done.is_downloading);
        assert!(done.queue.is_empty());
        assert!(done.has_completed);
        assert!(!done.has_failure);
        // Downloads survive so queries keep answering
        assert!(done.is_downloaded(&file("a").key()));
    }

    #[test]
    fn finish_with_failure_does_not_mark_completed() {
        let state = claim(&started(&["a"]), "a", 1, 3).unwrap();
        let state = reduce(
            &state,
            &Action::Fail {
                id: "a".into(),
                generation: 1,
                job_id: None,
            },
        )
        .unwrap();
        let done = reduce(&state, &Action::FinishSession).unwrap();
        assert!(done.has_failure);
        assert!(!done.has_completed);
    }

    #[test]
    fn start_resets_failures_from_previous_session() {
        let state = claim(&started(&["a"]), "a", 1, 3).unwrap();
        let state = reduce(
            &state,
            &Action::Fail {
                id: "a".into(),
                generation: 1,
                job_id: None,
            },
        )
        .unwrap();
        let stopped = reduce(&state, &Action::Stop).unwrap();
        let restarted = reduce(&stopped, &Action::Start).unwrap();
        assert!(!restarted.has_failure);
        assert_eq!(restarted.pending().len(), 1);
    }

    #[test]
    fn restore_forces_idle_and_clears_claims() {
        let mut snapshot = claim(&started(&["a"]), "a", 1, 3).unwrap();
        snapshot.is_downloading = false;
        let restored = reduce(&QueueState::default(), &Action::Restore(snapshot)).unwrap();
        assert!(!restored.is_downloading);
        assert!(restored.active_ids.is_empty());
        assert_eq!(
            restored.record(&file("a").key()).unwrap().phase,
            DownloadPhase::Queued
        );
    }

    #[test]
    fn store_notifies_only_on_change() {
        let store = StateStore::new();
        let rx = store.subscribe();
        assert!(!store.dispatch(Action::Start));
        assert_eq!(*rx.borrow(), 0);

        assert!(store.dispatch(Action::AddFiles(vec![(file("a"), DownloadRecord::queued())])));
        assert_eq!(*rx.borrow(), 1);
        assert_eq!(store.read(|s| s.queue.len()), 1);
    }
}
