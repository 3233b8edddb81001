use anisync_models::{AccountId, UserDocument};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

struct CacheEntry {
    document: UserDocument,
    fetched_at: Instant,
}

/// Time-bounded cache of the last fetched remote document, per account.
pub struct ReadCache {
    ttl: Duration,
    entries: Mutex<HashMap<AccountId, CacheEntry>>,
}

impl ReadCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// A hit requires an entry younger than the TTL; expired entries are
    /// evicted on lookup.
    pub fn get(&self, account: &AccountId) -> Option<UserDocument> {
        let mut entries = self.lock();
        match entries.get(account) {
            Some(entry) if entry.fetched_at.elapsed() < self.ttl => {
                debug!("Read cache hit: {}", account);
                Some(entry.document.clone())
            }
            Some(_) => {
                debug!("Read cache expired: {}", account);
                entries.remove(account);
                None
            }
            None => {
                debug!("Read cache miss: {}", account);
                None
            }
        }
    }

    pub fn put(&self, account: &AccountId, document: UserDocument) {
        self.lock().insert(
            account.clone(),
            CacheEntry {
                document,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Called on logout and after every successful remote write.
    pub fn invalidate(&self, account: &AccountId) {
        if self.lock().remove(account).is_some() {
            debug!("Read cache invalidated: {}", account);
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<AccountId, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
