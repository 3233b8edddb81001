use anisync_config::SyncSettings;
use anisync_models::{HistoryEntry, WatchlistEntry};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, warn};

/// An entry that can be aged out of a collection.
pub trait Chronological {
    /// Unique key within its collection, for logging.
    fn sync_key(&self) -> &str;
    /// Older entries are dropped first.
    fn timestamp(&self) -> DateTime<Utc>;
}

impl Chronological for HistoryEntry {
    fn sync_key(&self) -> &str {
        &self.episode_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.last_watched_at
    }
}

impl Chronological for WatchlistEntry {
    fn sync_key(&self) -> &str {
        &self.anime_id
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.added_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimAction {
    /// Below the soft ceiling.
    Unchanged,
    /// Between the soft and hard ceiling: logged, nothing dropped.
    SoftCeilingWarning,
    /// Above the hard ceiling: the oldest entries were dropped.
    Trimmed { dropped: usize },
}

#[derive(Debug)]
pub struct TrimResult<T> {
    pub entries: Vec<T>,
    pub action: TrimAction,
    /// Estimated serialized size of `entries`.
    pub size_bytes: usize,
}

/// Keeps collections under the remote document size limit.
#[derive(Debug, Clone, Copy)]
pub struct SizeGuard {
    soft_ceiling: usize,
    hard_ceiling: usize,
}

impl SizeGuard {
    pub fn new(soft_ceiling: usize, hard_ceiling: usize) -> Self {
        Self {
            soft_ceiling: soft_ceiling.min(hard_ceiling),
            hard_ceiling,
        }
    }

    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self::new(settings.soft_ceiling_bytes, settings.hard_ceiling_bytes)
    }

    pub fn hard_ceiling(&self) -> usize {
        self.hard_ceiling
    }

    /// Serialized size of `entries` as a compact JSON array.
    pub fn estimate_size<T: Serialize>(entries: &[T]) -> usize {
        let sizes: Vec<usize> = entries.iter().map(entry_size).collect();
        array_size(&sizes)
    }

    /// Return `entries` unchanged unless the hard ceiling is exceeded, in
    /// which case the oldest entries are dropped until it fits.
    pub fn trim<T>(&self, label: &str, entries: Vec<T>) -> TrimResult<T>
    where
        T: Serialize + Chronological,
    {
        let sizes: Vec<usize> = entries.iter().map(entry_size).collect();
        let size = array_size(&sizes);

        if size <= self.soft_ceiling {
            debug!("{} size {} bytes is within limits", label, size);
            return TrimResult {
                entries,
                action: TrimAction::Unchanged,
                size_bytes: size,
            };
        }

        if size <= self.hard_ceiling {
            warn!(
                operation = "size_guard_soft_ceiling",
                collection = label,
                size_bytes = size,
                soft_ceiling = self.soft_ceiling,
                hard_ceiling = self.hard_ceiling,
                "{} is approaching the remote document size limit",
                label
            );
            return TrimResult {
                entries,
                action: TrimAction::SoftCeilingWarning,
                size_bytes: size,
            };
        }

        // Newest first, so the oldest sit at the tail
        let mut sized: Vec<(T, usize)> = entries.into_iter().zip(sizes).collect();
        sized.sort_by(|(a, _), (b, _)| b.timestamp().cmp(&a.timestamp()));

        let original_len = sized.len();
        let mut current = size;
        while current > self.hard_ceiling {
            let Some((dropped, dropped_size)) = sized.pop() else {
                break;
            };
            // The element plus its separating comma, if any remain
            current -= dropped_size + usize::from(!sized.is_empty());
            error!(
                operation = "size_guard_forced_trim",
                data_loss = true,
                collection = label,
                key = dropped.sync_key(),
                timestamp = %dropped.timestamp(),
                size_bytes = current,
                hard_ceiling = self.hard_ceiling,
                "Dropped oldest {} entry to fit the remote document size limit",
                label
            );
        }

        let dropped = original_len - sized.len();
        warn!(
            "{} trimmed from {} to {} items due to size constraints",
            label,
            original_len,
            sized.len()
        );

        TrimResult {
            entries: sized.into_iter().map(|(entry, _)| entry).collect(),
            action: TrimAction::Trimmed { dropped },
            size_bytes: current,
        }
    }
}

fn entry_size<T: Serialize>(entry: &T) -> usize {
    serde_json::to_vec(entry).map(|v| v.len()).unwrap_or(0)
}

// `[` + entries joined by `,` + `]`
fn array_size(sizes: &[usize]) -> usize {
    2 + sizes.iter().sum::<usize>() + sizes.len().saturating_sub(1)
}
