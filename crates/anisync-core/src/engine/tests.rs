use super::*;
use crate::backup::{read_snapshot, write_snapshot};
use crate::collection::CloudStatus;
use crate::error::RemoteError;
use crate::identity::SessionIdentity;
use crate::remote::{FailureMode, MemoryRemoteStore};
use crate::size_guard::SizeGuard;
use crate::store::{load_json, MemoryStore};
use anisync_models::{DocumentPatch, HistoryEntry, SubOrDub, UserDocument, WatchlistEntry};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::time::Duration;
use tokio::time::Instant;

struct Harness {
    engine: Arc<SyncEngine>,
    local: Arc<MemoryStore>,
    remote: Arc<MemoryRemoteStore>,
    identity: Arc<SessionIdentity>,
}

fn account() -> AccountId {
    AccountId::new("user-1")
}

fn harness(settings: SyncSettings, remote: MemoryRemoteStore, identity: SessionIdentity) -> Harness {
    let local = Arc::new(MemoryStore::new());
    harness_with_local(settings, local, remote, identity)
}

fn harness_with_local(
    settings: SyncSettings,
    local: Arc<MemoryStore>,
    remote: MemoryRemoteStore,
    identity: SessionIdentity,
) -> Harness {
    let remote = Arc::new(remote);
    let identity = Arc::new(identity);
    let engine = Arc::new(SyncEngine::new(
        settings,
        local.clone(),
        remote.clone(),
        identity.clone(),
    ));
    Harness {
        engine,
        local,
        remote,
        identity,
    }
}

fn signed_in(remote: MemoryRemoteStore) -> Harness {
    harness(
        SyncSettings::default(),
        remote,
        SessionIdentity::signed_in(account(), true),
    )
}

fn seeded(watchlist: Vec<WatchlistEntry>) -> MemoryRemoteStore {
    let mut document = UserDocument::empty(Utc.timestamp_opt(1, 0).unwrap());
    document.watchlist = watchlist;
    MemoryRemoteStore::with_document(&account(), document)
}

fn episode(id: &str, progress: f64, watched: i64) -> HistoryEntry {
    HistoryEntry {
        anime_id: "frieren".to_string(),
        episode_id: id.to_string(),
        episode_number: 1,
        name: "Frieren 1".to_string(),
        image_url: String::new(),
        progress_seconds: progress,
        duration_seconds: 1440.0,
        last_watched_at: Utc.timestamp_opt(watched, 0).unwrap(),
        sub_or_dub: SubOrDub::Sub,
    }
}

fn bookmark(id: &str, added: i64) -> WatchlistEntry {
    WatchlistEntry {
        anime_id: id.to_string(),
        name: format!("Anime {}", id),
        image_url: format!("https://img.example/{}.jpg", id),
        added_at: Utc.timestamp_opt(added, 0).unwrap(),
        external_id: None,
    }
}

fn ids(entries: &[WatchlistEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.anime_id.as_str()).collect()
}

fn stored_progress(local: &MemoryStore, episode_id: &str) -> Option<f64> {
    let entries: Vec<HistoryEntry> = load_json(local, "watch_history").unwrap()?;
    entries
        .into_iter()
        .find(|e| e.episode_id == episode_id)
        .map(|e| e.progress_seconds)
}

/// Remote whose writes for one account are slow and then rejected.
struct RejectingRemote {
    inner: MemoryRemoteStore,
    rejected: AccountId,
    delay: Duration,
}

impl RejectingRemote {
    async fn check(&self, account: &AccountId) -> Result<(), RemoteError> {
        if *account != self.rejected {
            return Ok(());
        }
        tokio::time::sleep(self.delay).await;
        Err(RemoteError::PermissionDenied("account email is not verified".to_string()))
    }
}

#[async_trait]
impl RemoteStore for RejectingRemote {
    async fn get_document(&self, account: &AccountId) -> Result<Option<UserDocument>, RemoteError> {
        self.inner.get_document(account).await
    }

    async fn create_document(&self, account: &AccountId, document: &UserDocument) -> Result<(), RemoteError> {
        self.check(account).await?;
        self.inner.create_document(account, document).await
    }

    async fn update_fields(&self, account: &AccountId, patch: &DocumentPatch) -> Result<(), RemoteError> {
        self.check(account).await?;
        self.inner.update_fields(account, patch).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_rapid_progress_updates_produce_one_write() {
    let h = signed_in(MemoryRemoteStore::new());

    for (i, progress) in [10.0, 20.0, 30.0, 40.0, 50.0].into_iter().enumerate() {
        assert!(h.engine.history().update(episode("ep1", progress, 100 + i as i64)));
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    h.engine.drain().await;

    assert_eq!(h.remote.write_count(), 1);
    let document = h.remote.document(&account()).unwrap();
    assert_eq!(document.history.len(), 1);
    assert_eq!(document.history[0].progress_seconds, 50.0);
}

#[tokio::test(start_paused = true)]
async fn test_sub_second_progress_updates_keep_latest_value() {
    let h = signed_in(MemoryRemoteStore::new());

    let mut saved_immediately = 0;
    for i in 0..10 {
        let progress = 100.0 + i as f64 * 0.5;
        if h.engine.history().update(episode("ep1", progress, 100 + i)) {
            saved_immediately += 1;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    assert_eq!(saved_immediately, 1);
    assert_eq!(h.engine.history().progress_of("ep1"), Some(104.5));
    h.engine.drain().await;

    assert_eq!(h.remote.write_count(), 1);
    let document = h.remote.document(&account()).unwrap();
    assert_eq!(document.history[0].progress_seconds, 104.5);
    assert_eq!(stored_progress(&h.local, "ep1"), Some(104.5));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_saves_held_progress() {
    let h = harness(
        SyncSettings::default(),
        MemoryRemoteStore::new(),
        SessionIdentity::signed_out(),
    );
    assert!(h.engine.history().update(episode("ep1", 100.0, 100)));
    assert!(!h.engine.history().update(episode("ep1", 101.0, 101)));
    assert_eq!(stored_progress(&h.local, "ep1"), Some(100.0));

    h.engine.shutdown();
    assert_eq!(stored_progress(&h.local, "ep1"), Some(101.0));
}

#[tokio::test(start_paused = true)]
async fn test_mutation_during_write_is_replayed_not_overlapped() {
    let remote = seeded(Vec::new());
    remote.set_latency(Duration::from_secs(3));
    let h = signed_in(remote);

    h.engine.watchlist().add(bookmark("a1", 10));
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    h.engine.watchlist().add(bookmark("a2", 20));
    h.engine.drain().await;

    assert_eq!(h.remote.max_concurrent_writes(), 1);
    let snapshots = h.remote.snapshots();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(ids(&snapshots[0].watchlist), vec!["a1"]);
    assert_eq!(ids(&snapshots[1].watchlist), vec!["a2", "a1"]);
}

#[tokio::test(start_paused = true)]
async fn test_watchlist_write_retries_with_fixed_backoff() {
    let h = signed_in(seeded(Vec::new()));
    h.engine.watchlist().sync_now().await;
    h.remote.set_failure_mode(FailureMode::Transient { remaining: 2 });

    let start = Instant::now();
    h.engine.watchlist().add(bookmark("a1", 10));
    h.engine.drain().await;

    assert_eq!(h.remote.write_attempts(), 3);
    assert_eq!(h.remote.write_count(), 1);
    // Debounce plus two backoff intervals
    assert!(start.elapsed() >= Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_watchlist_gives_up_after_three_attempts() {
    let h = signed_in(seeded(Vec::new()));
    h.engine.watchlist().sync_now().await;
    h.remote.set_failure_mode(FailureMode::Transient { remaining: 10 });

    h.engine.watchlist().add(bookmark("a1", 10));
    h.engine.drain().await;

    assert_eq!(h.remote.write_attempts(), 3);
    assert_eq!(h.remote.write_count(), 0);
    // Local state is unaffected
    assert!(h.engine.watchlist().is_bookmarked("a1"));
}

#[tokio::test(start_paused = true)]
async fn test_history_write_is_not_retried() {
    let h = signed_in(seeded(Vec::new()));
    h.engine.history().sync_now().await;
    h.remote.set_failure_mode(FailureMode::Transient { remaining: 1 });

    h.engine.history().add(episode("ep1", 10.0, 100));
    h.engine.drain().await;
    assert_eq!(h.remote.write_attempts(), 1);
    assert_eq!(h.remote.write_count(), 0);

    // The next mutation carries the earlier one with it
    h.engine.history().add(episode("ep2", 10.0, 200));
    h.engine.drain().await;
    let document = h.remote.document(&account()).unwrap();
    assert_eq!(document.history.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_permission_denied_closes_gate_until_identity_changes() {
    let remote = seeded(Vec::new());
    remote.set_failure_mode(FailureMode::PermissionDenied);
    let h = signed_in(remote);

    // The first write reconciles, so the rejection comes from the read
    h.engine.watchlist().add(bookmark("a1", 10));
    h.engine.drain().await;
    assert_eq!(h.remote.read_count(), 1);
    assert_eq!(h.remote.write_attempts(), 0);
    assert!(h.engine.status().remote_known_bad);

    for i in 2..6 {
        h.engine.watchlist().add(bookmark(&format!("a{}", i), i));
        h.engine.drain().await;
    }
    // No further doomed attempts
    assert_eq!(h.remote.read_count(), 1);
    assert_eq!(h.remote.write_attempts(), 0);

    h.remote.set_failure_mode(FailureMode::Healthy);
    h.engine.identity_changed(Some(account()));
    h.engine.drain().await;

    assert!(!h.engine.status().remote_known_bad);
    let document = h.remote.document(&account()).unwrap();
    assert_eq!(document.watchlist.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_rejection_for_previous_account_leaves_gate_open() {
    let remote = Arc::new(RejectingRemote {
        inner: MemoryRemoteStore::new(),
        rejected: account(),
        delay: Duration::from_secs(5),
    });
    let identity = Arc::new(SessionIdentity::signed_in(account(), true));
    let engine = SyncEngine::new(
        SyncSettings::default(),
        Arc::new(MemoryStore::new()),
        remote.clone(),
        identity.clone(),
    );

    engine.history().add(episode("ep1", 10.0, 100));
    // Debounce elapsed, write for user-1 in flight
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    let next = AccountId::new("user-2");
    identity.sign_in(next.clone(), true);
    engine.identity_changed(Some(next.clone()));
    engine.drain().await;
    // Let the rejection for user-1 land
    tokio::time::sleep(Duration::from_secs(10)).await;
    engine.drain().await;
    assert!(!engine.status().remote_known_bad);

    engine.history().add(episode("ep2", 10.0, 200));
    engine.drain().await;
    let document = remote.inner.document(&next).unwrap();
    assert_eq!(document.history.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_offline_start_does_not_erase_remote_bookmarks() {
    let remote = seeded(vec![bookmark("r1", 10), bookmark("r2", 20)]);
    // Both initial reads fail
    remote.set_failure_mode(FailureMode::Transient { remaining: 2 });
    let h = signed_in(remote);

    h.engine.start();
    h.engine.drain().await;
    assert!(h.engine.watchlist().is_empty());

    h.engine.watchlist().add(bookmark("a1", 30));
    h.engine.drain().await;

    assert_eq!(ids(&h.engine.watchlist().entries()), vec!["a1", "r2", "r1"]);
    let document = h.remote.document(&account()).unwrap();
    assert_eq!(ids(&document.watchlist), vec!["a1", "r2", "r1"]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_write_back_still_merges_locally() {
    let remote = seeded(vec![bookmark("r1", 10)]);
    remote.set_failure_mode(FailureMode::WritesTransient { remaining: 100 });
    let h = signed_in(remote);
    h.local
        .set("my_list", &serde_json::to_vec(&vec![bookmark("l1", 20)]).unwrap())
        .unwrap();

    h.engine.start();
    h.engine.drain().await;

    assert_eq!(ids(&h.engine.watchlist().entries()), vec!["l1", "r1"]);
    let stored: Vec<WatchlistEntry> = load_json(&*h.local, "my_list").unwrap().unwrap();
    assert_eq!(ids(&stored), vec!["l1", "r1"]);
    assert_eq!(ids(&h.remote.document(&account()).unwrap().watchlist), vec!["r1"]);

    let report = h.engine.watchlist().sync_now().await;
    assert!(matches!(report.cloud, CloudStatus::Failed(_)));
    assert_eq!(report.local_entries, 2);
}

#[tokio::test(start_paused = true)]
async fn test_unverified_account_never_touches_remote() {
    let h = harness(
        SyncSettings::default(),
        seeded(vec![bookmark("r1", 1)]),
        SessionIdentity::signed_in(account(), false),
    );

    h.engine.start();
    h.engine.watchlist().add(bookmark("a1", 10));
    h.engine.drain().await;

    assert_eq!(h.remote.read_count(), 0);
    assert_eq!(h.remote.write_attempts(), 0);
    let report = h.engine.watchlist().sync_now().await;
    assert_eq!(report.cloud, CloudStatus::Skipped("remote access not permitted".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_fresh_install_keeps_remote_watchlist() {
    let h = signed_in(seeded(vec![bookmark("a1", 10), bookmark("a2", 20)]));

    h.engine.start();
    assert!(h.engine.watchlist().is_empty());
    h.engine.drain().await;

    assert_eq!(ids(&h.engine.watchlist().entries()), vec!["a2", "a1"]);
    assert!(h.local.contains("my_list"));
    // Nothing new to write back
    assert_eq!(h.remote.write_count(), 0);
    assert_eq!(h.remote.document(&account()).unwrap().watchlist.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_merges_both_sides_and_writes_back() {
    let h = signed_in(seeded(vec![bookmark("r1", 10)]));
    h.local
        .set("my_list", &serde_json::to_vec(&vec![bookmark("l1", 20)]).unwrap())
        .unwrap();

    h.engine.start();
    h.engine.drain().await;

    assert_eq!(ids(&h.engine.watchlist().entries()), vec!["l1", "r1"]);
    let document = h.remote.document(&account()).unwrap();
    assert_eq!(ids(&document.watchlist), vec!["l1", "r1"]);
}

#[tokio::test(start_paused = true)]
async fn test_identity_switch_discards_reconcile_result() {
    let remote = seeded(vec![bookmark("a1", 10)]);
    remote.set_latency(Duration::from_secs(5));
    let h = signed_in(remote);

    // Local bookmark forces a write back, held in flight by the latency
    h.local
        .set("my_list", &serde_json::to_vec(&vec![bookmark("l1", 20)]).unwrap())
        .unwrap();
    h.engine.start();
    tokio::time::sleep(Duration::from_secs(1)).await;
    h.identity.sign_in(AccountId::new("user-2"), true);
    h.engine.drain().await;

    assert_eq!(ids(&h.engine.watchlist().entries()), vec!["l1"]);
}

#[tokio::test(start_paused = true)]
async fn test_local_edit_during_reconcile_is_kept_and_resynced() {
    let remote = seeded(vec![bookmark("r1", 10)]);
    remote.set_latency(Duration::from_secs(5));
    let h = signed_in(remote);

    h.local
        .set("my_list", &serde_json::to_vec(&vec![bookmark("l0", 5)]).unwrap())
        .unwrap();
    h.engine.start();
    tokio::time::sleep(Duration::from_secs(1)).await;
    h.engine.watchlist().add(bookmark("l1", 20));
    h.engine.drain().await;

    assert_eq!(ids(&h.engine.watchlist().entries()), vec!["l1", "r1", "l0"]);
    let document = h.remote.document(&account()).unwrap();
    assert_eq!(ids(&document.watchlist), vec!["l1", "r1", "l0"]);
    assert_eq!(h.remote.max_concurrent_writes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_corrupted_local_copy_recovers_from_backup() {
    let local = Arc::new(MemoryStore::new());
    local.set("my_list", b"{truncated").unwrap();
    write_snapshot(&*local, "my_list_backup", &[bookmark("a1", 10)]).unwrap();

    let h = harness_with_local(
        SyncSettings::default(),
        local,
        MemoryRemoteStore::new(),
        SessionIdentity::signed_out(),
    );
    h.engine.start();

    assert_eq!(ids(&h.engine.watchlist().entries()), vec!["a1"]);
    // The primary slot was repaired
    let repaired: Vec<WatchlistEntry> = load_json(&*h.local, "my_list").unwrap().unwrap();
    assert_eq!(ids(&repaired), vec!["a1"]);
}

#[tokio::test(start_paused = true)]
async fn test_cleared_collection_is_not_resurrected_from_backup() {
    let h = harness(
        SyncSettings::default(),
        MemoryRemoteStore::new(),
        SessionIdentity::signed_out(),
    );
    h.engine.watchlist().add(bookmark("a1", 10));
    h.engine.watchlist().clear().await;
    h.engine.drain().await;

    let backup: Vec<WatchlistEntry> = read_snapshot(&*h.local, "my_list_backup").unwrap().unwrap();
    assert_eq!(ids(&backup), vec!["a1"]);

    // A restart sees an empty list, not the snapshot
    let restarted = harness_with_local(
        SyncSettings::default(),
        h.local.clone(),
        MemoryRemoteStore::new(),
        SessionIdentity::signed_out(),
    );
    restarted.engine.start();
    assert!(restarted.engine.watchlist().is_empty());
    assert!(restarted.engine.watchlist().restore_from_backup());
    assert_eq!(ids(&restarted.engine.watchlist().entries()), vec!["a1"]);
}

#[tokio::test(start_paused = true)]
async fn test_mutations_snapshot_previous_state() {
    let h = signed_in(MemoryRemoteStore::new());
    h.engine.watchlist().add(bookmark("a1", 10));
    h.engine.watchlist().add(bookmark("a2", 20));
    h.engine.drain().await;

    let backup: Vec<WatchlistEntry> = read_snapshot(&*h.local, "my_list_backup").unwrap().unwrap();
    assert_eq!(ids(&backup), vec!["a1"]);
}

#[tokio::test(start_paused = true)]
async fn test_clear_empties_remote_when_permitted() {
    let h = signed_in(seeded(Vec::new()));
    h.engine.watchlist().add(bookmark("a1", 10));
    h.engine.watchlist().add(bookmark("a2", 20));

    let report = h.engine.watchlist().clear().await;
    assert_eq!(report.cloud, CloudStatus::Synced);
    assert_eq!(report.local_entries, 0);
    assert!(h.remote.document(&account()).unwrap().watchlist.is_empty());

    // The pending debounced write for the two adds was superseded
    h.engine.drain().await;
    assert_eq!(h.remote.write_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_clear_signed_out_reports_skipped() {
    let h = harness(
        SyncSettings::default(),
        MemoryRemoteStore::new(),
        SessionIdentity::signed_out(),
    );
    h.engine.history().add(episode("ep1", 10.0, 100));
    let report = h.engine.history().clear().await;
    assert_eq!(report.cloud, CloudStatus::Skipped("not signed in".to_string()));
    assert!(h.engine.history().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_sync_now_reports_remote_failure() {
    let remote = seeded(Vec::new());
    remote.set_failure_mode(FailureMode::Transient { remaining: 100 });
    let h = signed_in(remote);
    h.engine.watchlist().add(bookmark("a1", 10));

    let report = h.engine.sync_now().await;
    assert!(matches!(report.watchlist.cloud, CloudStatus::Failed(_)));
    assert!(matches!(report.history.cloud, CloudStatus::Failed(_)));
    assert_eq!(report.watchlist.local_entries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_collection_is_trimmed_on_sync() {
    let settings = SyncSettings {
        soft_ceiling_bytes: 400,
        hard_ceiling_bytes: 800,
        ..SyncSettings::default()
    };
    let h = harness(
        settings,
        MemoryRemoteStore::new(),
        SessionIdentity::signed_in(account(), true),
    );
    for i in 0..20 {
        h.engine.watchlist().add(bookmark(&format!("anime-{:02}", i), i));
    }

    let report = h.engine.watchlist().sync_now().await;
    assert_eq!(report.cloud, CloudStatus::Synced);
    assert!(report.trimmed > 0);
    assert_eq!(report.local_entries, 20 - report.trimmed);

    let document = h.remote.document(&account()).unwrap();
    assert!(SizeGuard::estimate_size(&document.watchlist) <= 800);
    // The newest bookmark survives
    assert_eq!(document.watchlist[0].anime_id, "anime-19");
}

#[tokio::test(start_paused = true)]
async fn test_identity_watcher_syncs_on_sign_in() {
    let h = harness(
        SyncSettings::default(),
        MemoryRemoteStore::new(),
        SessionIdentity::signed_out(),
    );
    h.engine.watch_identity(h.identity.subscribe());

    h.engine.watchlist().add(bookmark("a1", 10));
    h.engine.drain().await;
    assert_eq!(h.remote.write_attempts(), 0);

    h.identity.sign_in(account(), true);
    tokio::time::sleep(Duration::from_millis(10)).await;
    h.engine.drain().await;

    let document = h.remote.document(&account()).unwrap();
    assert_eq!(ids(&document.watchlist), vec!["a1"]);
    h.engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_sign_out_cancels_pending_write() {
    let h = signed_in(MemoryRemoteStore::new());
    h.engine.watchlist().add(bookmark("a1", 10));

    h.identity.sign_out();
    h.engine.identity_changed(None);
    h.engine.drain().await;

    assert_eq!(h.remote.write_attempts(), 0);
    assert!(h.engine.watchlist().is_bookmarked("a1"));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drops_pending_work() {
    let h = signed_in(MemoryRemoteStore::new());
    h.engine.watchlist().add(bookmark("a1", 10));
    h.engine.shutdown();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.remote.write_attempts(), 0);
    assert!(h.engine.context().coordinator.is_shut_down());
}
