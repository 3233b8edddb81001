use crate::error::SyncError;
use anisync_models::SyncKey;
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A remote write. Invoked at flush time, so it observes the latest local state.
pub type SyncOperation = Arc<dyn Fn() -> BoxFuture<'static, Result<(), SyncError>> + Send + Sync>;

/// Wrap an async closure as a [`SyncOperation`].
pub fn operation<F, Fut>(f: F) -> SyncOperation
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), SyncError>> + Send + 'static,
{
    Arc::new(move || -> BoxFuture<'static, Result<(), SyncError>> { Box::pin(f()) })
}

#[derive(Default)]
struct QueueEntry {
    timer: Option<JoinHandle<()>>,
    /// Identifies the armed timer; a fired timer with a stale value does nothing.
    generation: u64,
    in_flight: bool,
    replay_requested: bool,
    operation: Option<SyncOperation>,
}

impl QueueEntry {
    fn is_idle(&self) -> bool {
        self.timer.is_none() && !self.in_flight && !self.replay_requested
    }
}

#[derive(Default)]
struct CoordinatorState {
    queues: HashMap<SyncKey, QueueEntry>,
    next_generation: u64,
    completed_flushes: u64,
    shut_down: bool,
}

impl CoordinatorState {
    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

struct Inner {
    debounce: Duration,
    state: Mutex<CoordinatorState>,
    /// Signalled whenever a flush completes or a queue is dropped.
    idle: Notify,
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Snapshot of one key's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct QueueStatus {
    pub timer_pending: bool,
    pub in_flight: bool,
    pub replay_requested: bool,
}

/// Debounces and serializes remote writes per [`SyncKey`].
///
/// Bursts of `enqueue` calls inside the debounce window collapse into one
/// flush. At most one operation per key runs at a time; an enqueue that lands
/// while a write is in flight is replayed once the write completes.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl SyncCoordinator {
    pub fn new(debounce: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                debounce,
                state: Mutex::new(CoordinatorState::default()),
                idle: Notify::new(),
            }),
        }
    }

    pub fn debounce(&self) -> Duration {
        self.inner.debounce
    }

    /// (Re)arm the debounce timer for `key`. Must be called from within a
    /// tokio runtime. Ignored after [`shutdown`](Self::shutdown).
    pub fn enqueue(&self, key: SyncKey, operation: SyncOperation) {
        let mut state = self.inner.lock();
        if state.shut_down {
            debug!(operation = "sync_enqueue_ignored", key = %key, "Coordinator is shut down");
            return;
        }
        let generation = state.bump_generation();
        let entry = state.queues.entry(key).or_default();
        if let Some(timer) = entry.timer.take() {
            timer.abort();
            debug!(operation = "sync_debounce_reset", key = %key, "Pending sync replaced");
        }
        entry.generation = generation;
        entry.operation = Some(operation);

        let inner = Arc::clone(&self.inner);
        entry.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            Self::fire(inner, key, generation).await;
        }));
    }

    async fn fire(inner: Arc<Inner>, key: SyncKey, generation: u64) {
        let operation = {
            let mut state = inner.lock();
            let Some(entry) = state.queues.get_mut(&key) else {
                return;
            };
            if entry.generation != generation {
                return;
            }
            entry.timer = None;
            if entry.in_flight {
                entry.replay_requested = true;
                debug!(operation = "sync_replay_requested", key = %key, "Write in flight, replay scheduled");
                return;
            }
            let Some(operation) = entry.operation.clone() else {
                state.queues.remove(&key);
                inner.idle.notify_waiters();
                return;
            };
            entry.in_flight = true;
            operation
        };

        debug!(operation = "sync_flush", key = %key, "Flushing debounced sync");
        let result = operation().await;
        match &result {
            Ok(()) => debug!(operation = "sync_flush_complete", key = %key, "Sync flush complete"),
            Err(e) => warn!(operation = "sync_flush_failed", key = %key, error = %e, "Sync flush failed"),
        }
        Self::complete(&inner, key);
    }

    // Clear `in_flight` and either replay or drop the queue.
    fn complete(inner: &Arc<Inner>, key: SyncKey) {
        let replay = {
            let mut state = inner.lock();
            state.completed_flushes += 1;
            let shut_down = state.shut_down;
            let mut replay = None;
            let mut remove = false;
            if let Some(entry) = state.queues.get_mut(&key) {
                entry.in_flight = false;
                if entry.replay_requested {
                    entry.replay_requested = false;
                    if !shut_down {
                        replay = entry.operation.clone();
                    }
                }
                remove = replay.is_none() && entry.is_idle();
            }
            if remove {
                state.queues.remove(&key);
            }
            replay
        };
        inner.idle.notify_waiters();

        if let Some(operation) = replay {
            debug!(operation = "sync_replay", key = %key, "Replaying sync for mutations made mid-flight");
            SyncCoordinator {
                inner: Arc::clone(inner),
            }
            .enqueue(key, operation);
        }
    }

    /// Run `work` now under the single-writer rule: waits for an in-flight
    /// write on `key` and cancels any pending timer, since `work` is expected
    /// to carry the latest local state itself.
    pub async fn flush_now<F, Fut, T>(&self, key: SyncKey, work: F) -> Result<T, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, SyncError>>,
    {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.inner.lock();
                if state.shut_down {
                    return Err(SyncError::Shutdown);
                }
                let generation = state.bump_generation();
                let entry = state.queues.entry(key).or_default();
                if !entry.in_flight {
                    if let Some(timer) = entry.timer.take() {
                        timer.abort();
                        debug!(operation = "sync_debounce_superseded", key = %key, "Pending sync replaced by immediate flush");
                    }
                    entry.generation = generation;
                    entry.replay_requested = false;
                    entry.in_flight = true;
                    break;
                }
            }
            debug!(operation = "sync_flush_wait", key = %key, "Waiting for in-flight write");
            notified.await;
        }

        let result = work().await;
        if let Err(e) = &result {
            warn!(operation = "sync_flush_failed", key = %key, error = %e, "Immediate sync failed");
        }
        Self::complete(&self.inner, key);
        result
    }

    /// Cancel the pending timer for `key`. An in-flight write completes.
    pub fn clear(&self, key: SyncKey) {
        let mut state = self.inner.lock();
        let generation = state.bump_generation();
        let mut remove = false;
        if let Some(entry) = state.queues.get_mut(&key) {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
                info!(operation = "sync_cancelled", key = %key, "Pending sync cancelled");
            }
            entry.generation = generation;
            entry.replay_requested = false;
            entry.operation = None;
            remove = !entry.in_flight;
        }
        if remove {
            state.queues.remove(&key);
        }
        drop(state);
        self.inner.idle.notify_waiters();
    }

    /// Cancel every pending timer (logout, account switch).
    pub fn clear_all(&self) {
        for key in SyncKey::ALL {
            self.clear(key);
        }
    }

    pub fn pending(&self, key: SyncKey) -> QueueStatus {
        let state = self.inner.lock();
        state
            .queues
            .get(&key)
            .map(|entry| QueueStatus {
                timer_pending: entry.timer.is_some(),
                in_flight: entry.in_flight,
                replay_requested: entry.replay_requested,
            })
            .unwrap_or_default()
    }

    pub fn is_idle(&self) -> bool {
        self.inner.lock().queues.is_empty()
    }

    /// Flushes run to completion (successful or failed) since creation.
    pub fn completed_flushes(&self) -> u64 {
        self.inner.lock().completed_flushes
    }

    /// Resolve once no key has a pending timer, in-flight write or replay.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Cancel every timer and refuse further work. In-flight writes complete
    /// but are not replayed.
    pub fn shutdown(&self) {
        let mut state = self.inner.lock();
        if state.shut_down {
            return;
        }
        state.shut_down = true;
        let generation = state.bump_generation();
        let mut cancelled = 0usize;
        state.queues.retain(|_, entry| {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
                cancelled += 1;
            }
            entry.generation = generation;
            entry.replay_requested = false;
            entry.in_flight
        });
        drop(state);
        info!(operation = "sync_coordinator_shutdown", cancelled, "Sync coordinator shut down");
        self.inner.idle.notify_waiters();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.lock().shut_down
    }
}
