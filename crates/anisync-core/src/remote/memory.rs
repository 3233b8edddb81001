use super::RemoteStore;
use crate::error::RemoteError;
use anisync_models::{AccountId, DocumentPatch, UserDocument};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Injected behaviour for `MemoryRemoteStore` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    #[default]
    Healthy,
    /// Every call is rejected as if the account were unverified.
    PermissionDenied,
    /// The next `remaining` calls fail transiently, then calls succeed.
    Transient { remaining: u32 },
    /// Reads succeed; the next `remaining` writes fail transiently.
    WritesTransient { remaining: u32 },
}

#[derive(Default)]
struct RemoteState {
    documents: HashMap<AccountId, UserDocument>,
    failure: FailureMode,
    latency: Duration,
    reads: usize,
    write_attempts: usize,
    creates: usize,
    snapshots: Vec<UserDocument>,
    active_writes: usize,
    max_concurrent_writes: usize,
}

/// In-process remote store for offline mode and tests.
#[derive(Default)]
pub struct MemoryRemoteStore {
    state: Mutex<RemoteState>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(account: &AccountId, document: UserDocument) -> Self {
        let store = Self::new();
        store.lock().documents.insert(account.clone(), document);
        store
    }

    pub fn set_failure_mode(&self, mode: FailureMode) {
        self.lock().failure = mode;
    }

    /// Delay applied to every write, to hold writes in flight.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    pub fn document(&self, account: &AccountId) -> Option<UserDocument> {
        self.lock().documents.get(account).cloned()
    }

    pub fn read_count(&self) -> usize {
        self.lock().reads
    }

    /// Successful writes (creates and updates).
    pub fn write_count(&self) -> usize {
        self.lock().snapshots.len()
    }

    /// All write calls, including rejected ones.
    pub fn write_attempts(&self) -> usize {
        self.lock().write_attempts
    }

    pub fn create_count(&self) -> usize {
        self.lock().creates
    }

    /// Document contents after each successful write, oldest first.
    pub fn snapshots(&self) -> Vec<UserDocument> {
        self.lock().snapshots.clone()
    }

    pub fn max_concurrent_writes(&self) -> usize {
        self.lock().max_concurrent_writes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_failure(state: &mut RemoteState, is_write: bool) -> Result<(), RemoteError> {
        match state.failure {
            FailureMode::Healthy => Ok(()),
            FailureMode::PermissionDenied => {
                Err(RemoteError::PermissionDenied("account email is not verified".to_string()))
            }
            FailureMode::Transient { remaining } => {
                if remaining == 0 {
                    state.failure = FailureMode::Healthy;
                    return Ok(());
                }
                state.failure = FailureMode::Transient { remaining: remaining - 1 };
                Err(RemoteError::Transient("simulated network failure".to_string()))
            }
            FailureMode::WritesTransient { .. } if !is_write => Ok(()),
            FailureMode::WritesTransient { remaining } => {
                if remaining == 0 {
                    state.failure = FailureMode::Healthy;
                    return Ok(());
                }
                state.failure = FailureMode::WritesTransient { remaining: remaining - 1 };
                Err(RemoteError::Transient("simulated write timeout".to_string()))
            }
        }
    }

    /// Runs a write with latency and concurrency bookkeeping.
    async fn write<F>(&self, apply: F) -> Result<(), RemoteError>
    where
        F: FnOnce(&mut RemoteState) -> Result<(), RemoteError>,
    {
        let latency = {
            let mut state = self.lock();
            state.write_attempts += 1;
            state.active_writes += 1;
            state.max_concurrent_writes = state.max_concurrent_writes.max(state.active_writes);
            state.latency
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        state.active_writes -= 1;
        Self::check_failure(&mut state, true)?;
        apply(&mut state)
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get_document(&self, account: &AccountId) -> Result<Option<UserDocument>, RemoteError> {
        let mut state = self.lock();
        state.reads += 1;
        Self::check_failure(&mut state, false)?;
        Ok(state.documents.get(account).cloned())
    }

    async fn create_document(&self, account: &AccountId, document: &UserDocument) -> Result<(), RemoteError> {
        self.write(|state| {
            state.documents.insert(account.clone(), document.clone());
            state.creates += 1;
            state.snapshots.push(document.clone());
            Ok(())
        })
        .await
    }

    async fn update_fields(&self, account: &AccountId, patch: &DocumentPatch) -> Result<(), RemoteError> {
        self.write(|state| {
            let document = state.documents.get_mut(account).ok_or(RemoteError::NotFound)?;
            document.apply(patch);
            let snapshot = document.clone();
            state.snapshots.push(snapshot);
            Ok(())
        })
        .await
    }
}
