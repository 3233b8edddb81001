use crate::backup::{read_snapshot, SnapshotSlot};
use crate::cache::ReadCache;
use crate::coordinator::{operation, SyncCoordinator};
use crate::error::{RemoteError, SyncError};
use crate::gate::AccessGate;
use crate::identity::IdentityProvider;
use crate::remote::{write_patch, RemoteStore};
use crate::retry::{with_retry, RetryPolicy};
use crate::size_guard::{Chronological, SizeGuard, TrimAction};
use crate::store::{load_json, save_json, LocalStore};
use crate::tasks::DetachedTasks;
use anisync_config::SyncSettings;
use anisync_models::{AccountId, DocumentPatch, SyncKey, UserDocument};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

/// Shared collaborators of both collections.
pub struct SyncContext {
    pub local: Arc<dyn LocalStore>,
    pub remote: Arc<dyn RemoteStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub gate: AccessGate,
    pub cache: ReadCache,
    pub coordinator: SyncCoordinator,
    pub tasks: DetachedTasks,
    pub size_guard: SizeGuard,
    pub settings: SyncSettings,
}

impl SyncContext {
    pub fn new(
        settings: SyncSettings,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            gate: AccessGate::new(Arc::clone(&identity)),
            cache: ReadCache::new(settings.cache_ttl()),
            coordinator: SyncCoordinator::new(settings.debounce()),
            tasks: DetachedTasks::new(),
            size_guard: SizeGuard::from_settings(&settings),
            local,
            remote,
            identity,
            settings,
        }
    }
}

/// Per-collection behaviour plugged into [`SyncedCollection`].
pub trait CollectionKind: Send + Sync + 'static {
    type Entry: Clone + PartialEq + Serialize + DeserializeOwned + Chronological + Send + Sync + 'static;

    const LABEL: &'static str;
    const SYNC_KEY: SyncKey;
    /// LocalStore slot of the canonical local copy.
    const STORAGE_KEY: &'static str;
    /// LocalStore slot of the rolling pre-mutation snapshot.
    const BACKUP_KEY: &'static str;

    fn merge(local: &[Self::Entry], remote: &[Self::Entry]) -> Vec<Self::Entry>;
    fn sort(entries: &mut [Self::Entry]);
    fn remote_entries(document: &UserDocument) -> &[Self::Entry];
    fn patch(entries: Vec<Self::Entry>, now: DateTime<Utc>) -> DocumentPatch;
    fn retry_policy(settings: &SyncSettings) -> RetryPolicy;
}

/// Outcome of the remote half of a user-initiated action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum CloudStatus {
    Synced,
    Skipped(String),
    Failed(String),
}

/// Result of `sync_now`/`clear`. The local part always succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub key: SyncKey,
    pub local_entries: usize,
    pub cloud: CloudStatus,
    /// Entries dropped to fit the remote size limit.
    pub trimmed: usize,
}

#[derive(Debug)]
enum RemoteOutcome {
    Written { trimmed: usize },
    UpToDate,
    Skipped(&'static str),
}

struct CollectionState<T> {
    entries: Vec<T>,
    /// Bumped on every local change; lets a reconcile detect mid-flight edits.
    revision: u64,
    /// Memory holds changes not yet written to the LocalStore.
    dirty: bool,
    /// Account whose remote copy has been merged into `entries`. Until then a
    /// push merges first instead of overwriting the remote.
    reconciled_for: Option<AccountId>,
}

struct CollectionInner<K: CollectionKind> {
    ctx: Arc<SyncContext>,
    state: RwLock<CollectionState<K::Entry>>,
    backup: Arc<SnapshotSlot>,
    _kind: PhantomData<K>,
}

/// Offline-first collection: reads and mutations hit memory and the
/// LocalStore synchronously, remote writes are debounced through the
/// coordinator.
pub struct SyncedCollection<K: CollectionKind> {
    inner: Arc<CollectionInner<K>>,
}

impl<K: CollectionKind> Clone for SyncedCollection<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: CollectionKind> SyncedCollection<K> {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self {
            inner: Arc::new(CollectionInner {
                ctx,
                state: RwLock::new(CollectionState {
                    entries: Vec::new(),
                    revision: 0,
                    dirty: false,
                    reconciled_for: None,
                }),
                backup: Arc::new(SnapshotSlot::new(K::BACKUP_KEY)),
                _kind: PhantomData,
            }),
        }
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.inner.ctx
    }

    pub fn entries(&self) -> Vec<K::Entry> {
        self.inner.read().entries.clone()
    }

    /// Borrow the current entries without cloning them.
    pub fn with_entries<R>(&self, f: impl FnOnce(&[K::Entry]) -> R) -> R {
        f(&self.inner.read().entries)
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load the local copy and return it immediately; reconciliation with the
    /// remote document continues in the background.
    pub fn load_initial(&self) -> Vec<K::Entry> {
        let entries = self.load_local();

        let inner = Arc::clone(&self.inner);
        self.inner.ctx.tasks.spawn("initial_reconcile", async move {
            let coordinator = inner.ctx.coordinator.clone();
            match coordinator.flush_now(K::SYNC_KEY, || inner.reconcile()).await {
                Ok(outcome) => debug!("Initial {} reconcile finished: {:?}", K::LABEL, outcome),
                Err(SyncError::Shutdown) => debug!("Initial {} reconcile skipped: shutting down", K::LABEL),
                Err(e) => warn!(
                    operation = "collection_initial_reconcile_failed",
                    collection = K::LABEL,
                    error = %e,
                    "Initial reconcile failed, continuing with local state"
                ),
            }
        });

        entries
    }

    /// Load the local copy (or its backup) into memory without touching the
    /// remote.
    pub fn load_local(&self) -> Vec<K::Entry> {
        let entries = self.inner.load_local();
        {
            let mut state = self.inner.write();
            state.entries = entries.clone();
            state.revision += 1;
            state.dirty = false;
        }
        info!(
            operation = "collection_load_local",
            collection = K::LABEL,
            entries = entries.len(),
            "Loaded local {}",
            K::LABEL
        );
        entries
    }

    /// Apply `change` to the collection. When it reports a change, the
    /// pre-mutation state is snapshotted, the result is persisted and a
    /// remote write is scheduled. Returns whether anything changed.
    pub fn mutate(&self, action: &'static str, change: impl FnOnce(&mut Vec<K::Entry>) -> bool) -> bool {
        let (before, sequence) = {
            let mut state = self.inner.write();
            let before = state.entries.clone();
            if !change(&mut state.entries) {
                return false;
            }
            K::sort(&mut state.entries);
            state.revision += 1;
            // In-memory state is kept even if this fails
            self.inner.persist(&state.entries);
            state.dirty = false;
            (before, self.inner.backup.next_sequence())
        };
        debug!(
            operation = "collection_mutate",
            collection = K::LABEL,
            action,
            "Local {} updated",
            K::LABEL
        );

        self.inner.snapshot_backup(before, sequence);
        self.schedule_push();
        true
    }

    /// Like [`mutate`](Self::mutate) but only in memory: the LocalStore copy
    /// is written when the scheduled push runs (or on [`flush_local`]). For
    /// high-rate changes such as playback progress.
    ///
    /// [`flush_local`]: Self::flush_local
    pub fn mutate_deferred(&self, action: &'static str, change: impl FnOnce(&mut Vec<K::Entry>) -> bool) -> bool {
        {
            let mut state = self.inner.write();
            if !change(&mut state.entries) {
                return false;
            }
            K::sort(&mut state.entries);
            state.revision += 1;
            state.dirty = true;
        }
        debug!(
            operation = "collection_mutate_deferred",
            collection = K::LABEL,
            action,
            "Local {} updated in memory",
            K::LABEL
        );
        self.schedule_push();
        true
    }

    /// Write deferred in-memory changes to the LocalStore.
    pub fn flush_local(&self) {
        self.inner.flush_dirty();
    }

    /// Reconcile with the remote document now, waiting for any in-flight
    /// write first.
    pub async fn sync_now(&self) -> SyncReport {
        let inner = Arc::clone(&self.inner);
        let result = self
            .inner
            .ctx
            .coordinator
            .flush_now(K::SYNC_KEY, || inner.reconcile())
            .await;
        self.report("sync_now", result)
    }

    /// Empty the collection locally and, when permitted, remotely.
    pub async fn clear(&self) -> SyncReport {
        self.inner.ctx.coordinator.clear(K::SYNC_KEY);
        let (before, sequence) = {
            let mut state = self.inner.write();
            let before = std::mem::take(&mut state.entries);
            state.revision += 1;
            self.inner.persist(&state.entries);
            state.dirty = false;
            (before, self.inner.backup.next_sequence())
        };
        info!(
            operation = "collection_clear",
            collection = K::LABEL,
            removed = before.len(),
            "Cleared local {}",
            K::LABEL
        );
        self.inner.snapshot_backup(before, sequence);

        // An explicit clear overwrites the remote instead of merging with it
        let inner = Arc::clone(&self.inner);
        let result = self
            .inner
            .ctx
            .coordinator
            .flush_now(K::SYNC_KEY, || inner.replace_remote())
            .await;
        self.report("clear", result)
    }

    /// Replace memory and the local copy with the last backup snapshot.
    /// Returns false when there is no usable snapshot.
    pub fn restore_from_backup(&self) -> bool {
        self.inner.restore_from_backup()
    }

    fn schedule_push(&self) {
        let inner = Arc::clone(&self.inner);
        let op = operation(move || {
            let inner = Arc::clone(&inner);
            async move { inner.push().await.map(|_| ()) }
        });
        self.inner.ctx.coordinator.enqueue(K::SYNC_KEY, op);
    }

    fn report(&self, action: &str, result: Result<RemoteOutcome, SyncError>) -> SyncReport {
        let (cloud, trimmed) = match result {
            Ok(RemoteOutcome::Written { trimmed }) => (CloudStatus::Synced, trimmed),
            Ok(RemoteOutcome::UpToDate) => (CloudStatus::Synced, 0),
            Ok(RemoteOutcome::Skipped(reason)) => (CloudStatus::Skipped(reason.to_string()), 0),
            Err(e) => (CloudStatus::Failed(e.to_string()), 0),
        };
        let report = SyncReport {
            key: K::SYNC_KEY,
            local_entries: self.len(),
            cloud,
            trimmed,
        };
        info!(
            operation = "collection_report",
            collection = K::LABEL,
            action,
            local_entries = report.local_entries,
            cloud = ?report.cloud,
            "{} {} finished",
            K::LABEL,
            action
        );
        report
    }
}

impl<K: CollectionKind> CollectionInner<K> {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, CollectionState<K::Entry>> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, CollectionState<K::Entry>> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn snapshot(&self) -> (Vec<K::Entry>, u64) {
        let state = self.read();
        (state.entries.clone(), state.revision)
    }

    /// A missing or undecodable local copy falls back to the backup; an
    /// empty one is a legitimate state (e.g. after `clear`).
    fn load_local(&self) -> Vec<K::Entry> {
        let mut entries = match load_json::<Vec<K::Entry>>(&*self.ctx.local, K::STORAGE_KEY) {
            Ok(Some(entries)) => entries,
            Ok(None) => {
                info!("No local {} found, checking backup snapshot", K::LABEL);
                self.recover_backup().unwrap_or_default()
            }
            Err(e) => {
                error!(
                    operation = "collection_local_corrupted",
                    collection = K::LABEL,
                    error = %e,
                    "Local {} is unreadable, recovering from backup",
                    K::LABEL
                );
                self.recover_backup().unwrap_or_default()
            }
        };
        K::sort(&mut entries);
        entries
    }

    /// Read the backup and write it back to the primary slot.
    fn recover_backup(&self) -> Option<Vec<K::Entry>> {
        match read_snapshot::<K::Entry>(&*self.ctx.local, K::BACKUP_KEY) {
            Ok(Some(entries)) => {
                info!(
                    operation = "collection_backup_recovered",
                    collection = K::LABEL,
                    entries = entries.len(),
                    "Recovered {} from backup snapshot",
                    K::LABEL
                );
                self.persist(&entries);
                Some(entries)
            }
            Ok(None) => None,
            Err(e) => {
                error!(
                    operation = "collection_backup_unreadable",
                    collection = K::LABEL,
                    error = %e,
                    "Backup snapshot could not be read"
                );
                None
            }
        }
    }

    fn restore_from_backup(&self) -> bool {
        let Some(mut entries) = self.recover_backup() else {
            warn!(
                operation = "collection_restore_failed",
                collection = K::LABEL,
                "No backup snapshot available to restore {}",
                K::LABEL
            );
            return false;
        };
        K::sort(&mut entries);
        let mut state = self.write();
        state.entries = entries;
        state.revision += 1;
        state.dirty = false;
        true
    }

    fn persist(&self, entries: &[K::Entry]) -> bool {
        match save_json(&*self.ctx.local, K::STORAGE_KEY, entries) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    operation = "collection_persist_failed",
                    collection = K::LABEL,
                    error = %e,
                    "Failed to persist local {}",
                    K::LABEL
                );
                false
            }
        }
    }

    fn flush_dirty(&self) {
        let mut state = self.write();
        if state.dirty && self.persist(&state.entries) {
            state.dirty = false;
            debug!("Deferred {} changes written locally", K::LABEL);
        }
    }

    /// Best effort; an empty collection never overwrites a snapshot.
    /// `sequence` orders snapshots taken by racing mutations.
    fn snapshot_backup(&self, entries: Vec<K::Entry>, sequence: u64) {
        if entries.is_empty() {
            return;
        }
        let local = Arc::clone(&self.ctx.local);
        let slot = Arc::clone(&self.backup);
        self.ctx.tasks.spawn_blocking("backup_snapshot", move || {
            if let Err(e) = slot.write_if_newest(&*local, sequence, &entries) {
                warn!(
                    operation = "collection_backup_failed",
                    collection = K::LABEL,
                    error = %e,
                    "Failed to write backup snapshot"
                );
            }
        });
    }

    /// Checks identity and gate; `Err` carries the skip reason.
    async fn remote_account(&self) -> Result<AccountId, &'static str> {
        let Some(account) = self.ctx.identity.current_account() else {
            debug!("{} sync skipped: not signed in", K::LABEL);
            return Err("not signed in");
        };
        if !self.ctx.gate.permitted().await {
            debug!("{} sync skipped: remote access not permitted", K::LABEL);
            return Err("remote access not permitted");
        }
        Ok(account)
    }

    async fn write_remote(&self, account: &AccountId, entries: Vec<K::Entry>) -> Result<(), RemoteError> {
        let patch = K::patch(entries, Utc::now());
        let remote: &dyn RemoteStore = &*self.ctx.remote;
        let patch = &patch;
        let result = with_retry(K::retry_policy(&self.ctx.settings), K::LABEL, move || {
            write_patch(remote, account, patch)
        })
        .await;

        match &result {
            Ok(()) => self.ctx.cache.invalidate(account),
            Err(e) if e.is_permission_denied() => self.ctx.gate.mark_bad(account),
            Err(_) => {}
        }
        result
    }

    fn trim(&self, entries: Vec<K::Entry>) -> (Vec<K::Entry>, usize) {
        let result = self.ctx.size_guard.trim(K::LABEL, entries);
        let dropped = match result.action {
            TrimAction::Trimmed { dropped } => dropped,
            TrimAction::Unchanged | TrimAction::SoftCeilingWarning => 0,
        };
        (result.entries, dropped)
    }

    fn identity_unchanged(&self, account: &AccountId) -> bool {
        if self.ctx.identity.current_account().as_ref() == Some(account) {
            return true;
        }
        info!(
            operation = "collection_identity_changed_mid_write",
            collection = K::LABEL,
            account = %account,
            "Identity changed during remote write, discarding result"
        );
        false
    }

    /// Debounced write after local mutations. Until this collection has been
    /// merged with the account's remote copy it reconciles instead, so
    /// entries only the remote knows about are never overwritten.
    async fn push(self: Arc<Self>) -> Result<RemoteOutcome, SyncError> {
        self.flush_dirty();
        let account = match self.remote_account().await {
            Ok(account) => account,
            Err(reason) => return Ok(RemoteOutcome::Skipped(reason)),
        };
        if self.read().reconciled_for.as_ref() != Some(&account) {
            debug!("{} not reconciled with {} yet, merging before write", K::LABEL, account);
            return self.reconcile().await;
        }
        self.overwrite_remote(account).await
    }

    /// Write the local collection over the remote one regardless of what the
    /// remote holds.
    async fn replace_remote(self: Arc<Self>) -> Result<RemoteOutcome, SyncError> {
        let account = match self.remote_account().await {
            Ok(account) => account,
            Err(reason) => return Ok(RemoteOutcome::Skipped(reason)),
        };
        self.overwrite_remote(account).await
    }

    async fn overwrite_remote(&self, account: AccountId) -> Result<RemoteOutcome, SyncError> {
        let (entries, _) = self.snapshot();
        let (entries, trimmed) = self.trim(entries);
        let count = entries.len();

        self.write_remote(&account, entries).await?;
        if !self.identity_unchanged(&account) {
            return Ok(RemoteOutcome::Skipped("identity changed during sync"));
        }
        self.write().reconciled_for = Some(account.clone());
        info!(
            operation = "collection_push",
            collection = K::LABEL,
            account = %account,
            entries = count,
            "Pushed {} to remote",
            K::LABEL
        );
        Ok(RemoteOutcome::Written { trimmed })
    }

    /// Read, merge, trim, write back to both stores. The merged result is
    /// kept locally even when the remote write fails.
    async fn reconcile(self: Arc<Self>) -> Result<RemoteOutcome, SyncError> {
        self.flush_dirty();
        let account = match self.remote_account().await {
            Ok(account) => account,
            Err(reason) => return Ok(RemoteOutcome::Skipped(reason)),
        };
        let (local, revision) = self.snapshot();

        let document = match self.ctx.cache.get(&account) {
            Some(document) => Some(document),
            None => match self.ctx.remote.get_document(&account).await {
                Ok(document) => {
                    if let Some(ref document) = document {
                        self.ctx.cache.put(&account, document.clone());
                    }
                    document
                }
                Err(e) => {
                    if e.is_permission_denied() {
                        self.ctx.gate.mark_bad(&account);
                    }
                    return Err(e.into());
                }
            },
        };
        let remote: &[K::Entry] = document.as_ref().map(K::remote_entries).unwrap_or(&[]);
        let merged = K::merge(&local, remote);
        let (merged, trimmed) = self.trim(merged);

        let up_to_date = match document {
            Some(_) => {
                let mut current = remote.to_vec();
                K::sort(&mut current);
                merged == current
            }
            None => merged.is_empty(),
        };
        let written = if up_to_date {
            debug!("Remote {} already up to date", K::LABEL);
            Ok(RemoteOutcome::UpToDate)
        } else {
            self.write_remote(&account, merged.clone())
                .await
                .map(|()| RemoteOutcome::Written { trimmed })
        };

        if !self.identity_unchanged(&account) {
            return Ok(RemoteOutcome::Skipped("identity changed during sync"));
        }
        self.apply_reconciled(merged, revision, &account);

        match written {
            Ok(outcome) => {
                info!(
                    operation = "collection_reconcile",
                    collection = K::LABEL,
                    account = %account,
                    local = local.len(),
                    remote = remote.len(),
                    trimmed,
                    "Reconciled {} with remote",
                    K::LABEL
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!(
                    operation = "collection_reconcile_write_failed",
                    collection = K::LABEL,
                    account = %account,
                    error = %e,
                    "Merged remote {} locally, but writing back failed",
                    K::LABEL
                );
                Err(e.into())
            }
        }
    }

    fn apply_reconciled(self: &Arc<Self>, reconciled: Vec<K::Entry>, revision: u64, account: &AccountId) {
        let (persisted, changed_mid_flight) = {
            let mut state = self.write();
            let changed_mid_flight = state.revision != revision;
            state.entries = if changed_mid_flight {
                K::merge(&state.entries, &reconciled)
            } else {
                reconciled
            };
            state.revision += 1;
            let persisted = self.persist(&state.entries);
            if persisted {
                state.dirty = false;
                state.reconciled_for = Some(account.clone());
            }
            (persisted, changed_mid_flight)
        };

        if !persisted {
            error!(
                operation = "collection_reconcile_persist_failed",
                collection = K::LABEL,
                "Could not store reconciled {}, restoring backup snapshot",
                K::LABEL
            );
            self.restore_from_backup();
            return;
        }
        if changed_mid_flight {
            debug!("Local {} changed during reconcile, scheduling another write", K::LABEL);
            SyncedCollection {
                inner: Arc::clone(self),
            }
            .schedule_push();
        }
    }
}
