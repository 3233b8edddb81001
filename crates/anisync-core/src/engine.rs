use crate::collection::{SyncContext, SyncReport};
use crate::coordinator::QueueStatus;
use crate::history::HistoryCollection;
use crate::identity::IdentityProvider;
use crate::remote::RemoteStore;
use crate::store::LocalStore;
use crate::watchlist::WatchlistCollection;
use anisync_config::SyncSettings;
use anisync_models::{AccountId, SyncKey};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

/// Both collections' reports from an explicit sync.
#[derive(Debug, Clone, Serialize)]
pub struct EngineReport {
    pub history: SyncReport,
    pub watchlist: SyncReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub account: Option<AccountId>,
    /// Remote access was rejected earlier in this session.
    pub remote_known_bad: bool,
    pub history_entries: usize,
    pub watchlist_entries: usize,
    pub history_queue: QueueStatus,
    pub watchlist_queue: QueueStatus,
}

/// Owns the shared sync machinery and both collections.
pub struct SyncEngine {
    ctx: Arc<SyncContext>,
    history: Arc<HistoryCollection>,
    watchlist: Arc<WatchlistCollection>,
    last_identity: Mutex<Option<AccountId>>,
    /// Not part of `tasks`: it runs until shutdown, so draining would hang.
    identity_watcher: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn new(
        settings: SyncSettings,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let last_identity = identity.current_account();
        let ctx = Arc::new(SyncContext::new(settings, local, remote, identity));
        Self {
            history: Arc::new(HistoryCollection::new(Arc::clone(&ctx))),
            watchlist: Arc::new(WatchlistCollection::new(Arc::clone(&ctx))),
            last_identity: Mutex::new(last_identity),
            identity_watcher: Mutex::new(None),
            ctx,
        }
    }

    pub fn history(&self) -> &HistoryCollection {
        &self.history
    }

    pub fn watchlist(&self) -> &WatchlistCollection {
        &self.watchlist
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    /// Load both collections from local storage and start background
    /// reconciliation.
    pub fn start(&self) {
        let history = self.history.load_initial().len();
        let watchlist = self.watchlist.load_initial().len();
        info!(
            operation = "sync_engine_start",
            history, watchlist, "Sync engine started"
        );
    }

    /// Load both collections from local storage only.
    pub fn load_local(&self) {
        self.history.load_local();
        self.watchlist.load_local();
    }

    /// Sign-in, sign-out or account switch. Pending writes for the previous
    /// identity are cancelled; a signed-in identity is reconciled in the
    /// background.
    pub fn identity_changed(&self, account: Option<AccountId>) {
        let previous = {
            let mut last = self.last_identity.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::replace(&mut *last, account.clone())
        };
        info!(
            operation = "sync_engine_identity_changed",
            previous = previous.as_ref().map(|a| a.as_str()).unwrap_or("<none>"),
            current = account.as_ref().map(|a| a.as_str()).unwrap_or("<none>"),
            "Identity changed"
        );

        self.ctx.gate.identity_changed(account.clone());
        // Cancelled pushes would have saved held progress
        self.history.flush_local();
        self.ctx.coordinator.clear_all();
        if let Some(previous) = previous {
            self.ctx.cache.invalidate(&previous);
        }

        if account.is_some() {
            let history = Arc::clone(&self.history);
            let watchlist = Arc::clone(&self.watchlist);
            self.ctx.tasks.spawn("identity_reconcile", async move {
                let (history, watchlist) = tokio::join!(history.sync_now(), watchlist.sync_now());
                debug!("Identity reconcile: history={:?}, watchlist={:?}", history.cloud, watchlist.cloud);
            });
        }
    }

    /// Forward every value published on `changes` to
    /// [`identity_changed`](Self::identity_changed).
    pub fn watch_identity(self: &Arc<Self>, mut changes: watch::Receiver<Option<AccountId>>) {
        let engine = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let account = changes.borrow_and_update().clone();
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.identity_changed(account);
            }
            debug!("Identity watcher stopped");
        });
        let previous = self
            .identity_watcher
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Reconcile both collections now.
    #[instrument(skip(self))]
    pub async fn sync_now(&self) -> EngineReport {
        let (history, watchlist) = tokio::join!(self.history.sync_now(), self.watchlist.sync_now());
        EngineReport { history, watchlist }
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            account: self.ctx.identity.current_account(),
            remote_known_bad: self.ctx.gate.is_known_bad(),
            history_entries: self.history.len(),
            watchlist_entries: self.watchlist.len(),
            history_queue: self.ctx.coordinator.pending(SyncKey::History),
            watchlist_queue: self.ctx.coordinator.pending(SyncKey::Watchlist),
        }
    }

    /// Wait for pending debounced writes and detached work to finish.
    pub async fn drain(&self) {
        loop {
            self.ctx.coordinator.wait_idle().await;
            self.ctx.tasks.drain().await;
            if self.ctx.coordinator.is_idle() && self.ctx.tasks.is_empty() {
                return;
            }
        }
    }

    /// Cancel pending timers, abort detached tasks and drop cached reads.
    /// In-flight writes finish but nothing new is scheduled.
    pub fn shutdown(&self) {
        self.history.flush_local();
        self.ctx.coordinator.shutdown();
        self.ctx.tasks.shutdown();
        if let Some(watcher) = self.identity_watcher.lock().unwrap_or_else(|p| p.into_inner()).take() {
            watcher.abort();
        }
        self.ctx.cache.clear();
        info!(operation = "sync_engine_shutdown", "Sync engine shut down");
    }
}

#[cfg(test)]
mod tests;
