use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::watch_history::HistoryEntry;
use crate::watchlist::WatchlistEntry;

/// The per-account remote document holding both synced collections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserDocument {
    pub last_sync_at: DateTime<Utc>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub watchlist: Vec<WatchlistEntry>,
}

impl UserDocument {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            last_sync_at: now,
            history: Vec::new(),
            watchlist: Vec::new(),
        }
    }

    /// Apply a partial update in place. Absent fields are left untouched.
    pub fn apply(&mut self, patch: &DocumentPatch) {
        self.last_sync_at = patch.last_sync_at;
        if let Some(ref history) = patch.history {
            self.history = history.clone();
        }
        if let Some(ref watchlist) = patch.watchlist {
            self.watchlist = watchlist.clone();
        }
    }
}

/// Partial update of a `UserDocument`; one collection at a time in practice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentPatch {
    pub last_sync_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<HistoryEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watchlist: Option<Vec<WatchlistEntry>>,
}

impl DocumentPatch {
    pub fn history(entries: Vec<HistoryEntry>, now: DateTime<Utc>) -> Self {
        Self {
            last_sync_at: now,
            history: Some(entries),
            watchlist: None,
        }
    }

    pub fn watchlist(entries: Vec<WatchlistEntry>, now: DateTime<Utc>) -> Self {
        Self {
            last_sync_at: now,
            history: None,
            watchlist: Some(entries),
        }
    }

    /// A full document seeded with this patch, used when the remote document
    /// does not exist yet.
    pub fn into_document(self) -> UserDocument {
        let mut document = UserDocument::empty(self.last_sync_at);
        document.apply(&self);
        document
    }
}
