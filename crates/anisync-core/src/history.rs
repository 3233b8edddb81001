use crate::collection::{CollectionKind, SyncContext, SyncReport, SyncedCollection};
use crate::merge::{merge_history, sort_history};
use crate::retry::RetryPolicy;
use anisync_config::SyncSettings;
use anisync_models::{DocumentPatch, HistoryEntry, SyncKey, UserDocument};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Watch history: keyed by episode, last-writer-wins merge, no retry at the
/// write layer.
pub struct History;

impl CollectionKind for History {
    type Entry = HistoryEntry;

    const LABEL: &'static str = "history";
    const SYNC_KEY: SyncKey = SyncKey::History;
    const STORAGE_KEY: &'static str = "watch_history";
    const BACKUP_KEY: &'static str = "watch_history_backup";

    fn merge(local: &[HistoryEntry], remote: &[HistoryEntry]) -> Vec<HistoryEntry> {
        merge_history(local, remote)
    }

    fn sort(entries: &mut [HistoryEntry]) {
        sort_history(entries)
    }

    fn remote_entries(document: &UserDocument) -> &[HistoryEntry] {
        &document.history
    }

    fn patch(entries: Vec<HistoryEntry>, now: DateTime<Utc>) -> DocumentPatch {
        DocumentPatch::history(entries, now)
    }

    fn retry_policy(_settings: &SyncSettings) -> RetryPolicy {
        // The next mutation re-enqueues anyway
        RetryPolicy::none()
    }
}

#[derive(Debug, Clone, Copy)]
struct ProgressMark {
    progress: f64,
    at: Instant,
}

/// Watch history API consumed by the player and UI layers.
pub struct HistoryCollection {
    collection: SyncedCollection<History>,
    marks: Mutex<HashMap<String, ProgressMark>>,
    threshold_secs: f64,
    idle: Duration,
}

impl HistoryCollection {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        let threshold_secs = ctx.settings.progress_threshold_secs;
        let idle = ctx.settings.progress_idle();
        Self {
            collection: SyncedCollection::new(ctx),
            marks: Mutex::new(HashMap::new()),
            threshold_secs,
            idle,
        }
    }

    pub fn load_initial(&self) -> Vec<HistoryEntry> {
        self.collection.load_initial()
    }

    pub fn load_local(&self) -> Vec<HistoryEntry> {
        self.collection.load_local()
    }

    /// Insert or replace the entry for its episode.
    pub fn add(&self, entry: HistoryEntry) -> bool {
        self.mark(&entry.episode_id, entry.progress_seconds);
        self.collection.mutate("add", move |entries| upsert(entries, entry))
    }

    /// Progress update from playback. Saved right away if progress moved more
    /// than the threshold or the idle window passed since the last saved
    /// update for this episode; otherwise held in memory and saved by the
    /// next scheduled write or [`flush_local`](Self::flush_local). Returns
    /// whether it was saved. Unknown episodes are inserted.
    pub fn update(&self, entry: HistoryEntry) -> bool {
        if self.should_apply(&entry) {
            return self.collection.mutate("update", move |entries| upsert(entries, entry));
        }
        debug!(
            operation = "history_update_deferred",
            episode = %entry.episode_id,
            progress = entry.progress_seconds,
            "Progress update held until the next write"
        );
        self.collection.mutate_deferred("update", move |entries| upsert(entries, entry));
        false
    }

    /// Save progress updates still held in memory.
    pub fn flush_local(&self) {
        self.collection.flush_local();
    }

    pub fn remove(&self, episode_id: &str) -> bool {
        self.forget(|id| id == episode_id);
        self.collection.mutate("remove", |entries| {
            let before = entries.len();
            entries.retain(|e| e.episode_id != episode_id);
            entries.len() != before
        })
    }

    /// Remove every episode of a show. Returns how many were removed.
    pub fn remove_anime(&self, anime_id: &str) -> usize {
        let mut removed = 0;
        self.collection.mutate("remove_anime", |entries| {
            let before = entries.len();
            entries.retain(|e| e.anime_id != anime_id);
            removed = before - entries.len();
            removed > 0
        });
        if removed > 0 {
            let episodes: Vec<String> = self
                .collection
                .with_entries(|entries| entries.iter().map(|e| e.episode_id.clone()).collect());
            self.forget(|id| !episodes.iter().any(|e| e == id));
        }
        removed
    }

    pub async fn clear(&self) -> SyncReport {
        self.lock_marks().clear();
        self.collection.clear().await
    }

    pub async fn sync_now(&self) -> SyncReport {
        self.collection.sync_now().await
    }

    /// Most recently watched first.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.collection.entries()
    }

    pub fn get(&self, episode_id: &str) -> Option<HistoryEntry> {
        self.collection
            .with_entries(|entries| entries.iter().find(|e| e.episode_id == episode_id).cloned())
    }

    pub fn contains(&self, episode_id: &str) -> bool {
        self.collection
            .with_entries(|entries| entries.iter().any(|e| e.episode_id == episode_id))
    }

    pub fn progress_of(&self, episode_id: &str) -> Option<f64> {
        self.collection.with_entries(|entries| {
            entries
                .iter()
                .find(|e| e.episode_id == episode_id)
                .map(|e| e.progress_seconds)
        })
    }

    pub fn len(&self) -> usize {
        self.collection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collection.is_empty()
    }

    pub fn restore_from_backup(&self) -> bool {
        self.collection.restore_from_backup()
    }

    fn should_apply(&self, entry: &HistoryEntry) -> bool {
        let mut marks = self.lock_marks();
        let now = Instant::now();
        let apply = match marks.get(&entry.episode_id) {
            None => true,
            Some(mark) => {
                (entry.progress_seconds - mark.progress).abs() > self.threshold_secs
                    || now.duration_since(mark.at) >= self.idle
            }
        };
        if apply {
            marks.insert(
                entry.episode_id.clone(),
                ProgressMark {
                    progress: entry.progress_seconds,
                    at: now,
                },
            );
        }
        apply
    }

    fn mark(&self, episode_id: &str, progress: f64) {
        self.lock_marks().insert(
            episode_id.to_string(),
            ProgressMark {
                progress,
                at: Instant::now(),
            },
        );
    }

    fn forget(&self, mut matches: impl FnMut(&str) -> bool) {
        self.lock_marks().retain(|id, _| !matches(id));
    }

    fn lock_marks(&self) -> std::sync::MutexGuard<'_, HashMap<String, ProgressMark>> {
        self.marks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn upsert(entries: &mut Vec<HistoryEntry>, entry: HistoryEntry) -> bool {
    match entries.iter_mut().find(|e| e.episode_id == entry.episode_id) {
        Some(existing) if *existing == entry => false,
        Some(existing) => {
            *existing = entry;
            true
        }
        None => {
            entries.push(entry);
            true
        }
    }
}
