use crate::collection::{CollectionKind, SyncContext, SyncReport, SyncedCollection};
use crate::merge::{merge_watchlist, sort_watchlist};
use crate::retry::RetryPolicy;
use anisync_config::SyncSettings;
use anisync_models::{DocumentPatch, SyncKey, UserDocument, WatchlistEntry};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

/// Bookmarks: keyed by anime, presence-preserving merge, bounded retry on
/// remote writes.
pub struct Watchlist;

impl CollectionKind for Watchlist {
    type Entry = WatchlistEntry;

    const LABEL: &'static str = "watchlist";
    const SYNC_KEY: SyncKey = SyncKey::Watchlist;
    const STORAGE_KEY: &'static str = "my_list";
    const BACKUP_KEY: &'static str = "my_list_backup";

    fn merge(local: &[WatchlistEntry], remote: &[WatchlistEntry]) -> Vec<WatchlistEntry> {
        merge_watchlist(local, remote)
    }

    fn sort(entries: &mut [WatchlistEntry]) {
        sort_watchlist(entries)
    }

    fn remote_entries(document: &UserDocument) -> &[WatchlistEntry] {
        &document.watchlist
    }

    fn patch(entries: Vec<WatchlistEntry>, now: DateTime<Utc>) -> DocumentPatch {
        DocumentPatch::watchlist(entries, now)
    }

    fn retry_policy(settings: &SyncSettings) -> RetryPolicy {
        RetryPolicy::fixed(settings.watchlist_retry_attempts, settings.watchlist_retry_backoff())
    }
}

pub struct WatchlistCollection {
    collection: SyncedCollection<Watchlist>,
}

impl WatchlistCollection {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self {
            collection: SyncedCollection::new(ctx),
        }
    }

    pub fn load_initial(&self) -> Vec<WatchlistEntry> {
        self.collection.load_initial()
    }

    pub fn load_local(&self) -> Vec<WatchlistEntry> {
        self.collection.load_local()
    }

    /// Bookmark a show. Returns false if it was already bookmarked.
    pub fn add(&self, entry: WatchlistEntry) -> bool {
        self.collection.mutate("add", move |entries| {
            if entries.iter().any(|e| e.anime_id == entry.anime_id) {
                return false;
            }
            entries.push(entry);
            true
        })
    }

    pub fn remove(&self, anime_id: &str) -> bool {
        self.collection.mutate("remove", |entries| {
            let before = entries.len();
            entries.retain(|e| e.anime_id != anime_id);
            entries.len() != before
        })
    }

    pub async fn clear(&self) -> SyncReport {
        self.collection.clear().await
    }

    pub async fn sync_now(&self) -> SyncReport {
        self.collection.sync_now().await
    }

    /// Most recently added first.
    pub fn entries(&self) -> Vec<WatchlistEntry> {
        self.collection.entries()
    }

    pub fn is_bookmarked(&self, anime_id: &str) -> bool {
        self.collection
            .with_entries(|entries| entries.iter().any(|e| e.anime_id == anime_id))
    }

    pub fn bookmarked_ids(&self) -> HashSet<String> {
        self.collection
            .with_entries(|entries| entries.iter().map(|e| e.anime_id.clone()).collect())
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SessionIdentity;
    use crate::remote::MemoryRemoteStore;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn watchlist() -> WatchlistCollection {
        let ctx = SyncContext::new(
            SyncSettings::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryRemoteStore::new()),
            Arc::new(SessionIdentity::signed_out()),
        );
        WatchlistCollection::new(Arc::new(ctx))
    }

    fn bookmark(id: &str, added: i64) -> WatchlistEntry {
        WatchlistEntry {
            anime_id: id.to_string(),
            name: id.to_uppercase(),
            image_url: String::new(),
            added_at: Utc.timestamp_opt(added, 0).unwrap(),
            external_id: None,
        }
    }

    #[tokio::test]
    async fn test_add_rejects_duplicates() {
        let watchlist = watchlist();
        assert!(watchlist.add(bookmark("one-piece", 10)));
        assert!(!watchlist.add(bookmark("one-piece", 20)));
        assert_eq!(watchlist.len(), 1);
        assert_eq!(watchlist.entries()[0].added_at, Utc.timestamp_opt(10, 0).unwrap());
    }

    #[tokio::test]
    async fn test_bookmark_queries() {
        let watchlist = watchlist();
        watchlist.add(bookmark("a", 10));
        watchlist.add(bookmark("b", 30));
        watchlist.add(bookmark("c", 20));

        assert!(watchlist.is_bookmarked("b"));
        assert!(!watchlist.is_bookmarked("z"));
        assert_eq!(
            watchlist.bookmarked_ids(),
            HashSet::from(["a".to_string(), "b".to_string(), "c".to_string()])
        );
        let order: Vec<String> = watchlist.entries().into_iter().map(|e| e.anime_id).collect();
        assert_eq!(order, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_remove() {
        let watchlist = watchlist();
        watchlist.add(bookmark("a", 10));
        assert!(watchlist.remove("a"));
        assert!(!watchlist.remove("a"));
        assert!(watchlist.is_empty());
    }
}
