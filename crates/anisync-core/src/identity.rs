use crate::error::RemoteError;
use anisync_models::AccountId;
use async_trait::async_trait;
use std::sync::RwLock;
use tokio::sync::watch;
use tracing::info;

/// Source of the signed-in account and its verification state.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn current_account(&self) -> Option<AccountId>;

    /// Whether the account may currently write to the remote store.
    async fn is_verified(&self, account: &AccountId) -> Result<bool, RemoteError>;
}

#[derive(Debug, Clone)]
struct Session {
    account: AccountId,
    verified: bool,
}

/// Identity provider driven by explicit sign-in/sign-out calls.
///
/// Every change is published on a `watch` channel so the engine can react to
/// `identityChanged` events.
pub struct SessionIdentity {
    session: RwLock<Option<Session>>,
    changes: watch::Sender<Option<AccountId>>,
}

impl SessionIdentity {
    pub fn signed_out() -> Self {
        let (changes, _) = watch::channel(None);
        Self {
            session: RwLock::new(None),
            changes,
        }
    }

    pub fn signed_in(account: AccountId, verified: bool) -> Self {
        let (changes, _) = watch::channel(Some(account.clone()));
        Self {
            session: RwLock::new(Some(Session { account, verified })),
            changes,
        }
    }

    pub fn sign_in(&self, account: AccountId, verified: bool) {
        info!(operation = "identity_sign_in", account = %account, verified, "Signed in");
        *self.write() = Some(Session {
            account: account.clone(),
            verified,
        });
        self.changes.send_replace(Some(account));
    }

    pub fn sign_out(&self) {
        let previous = self.write().take();
        if let Some(previous) = previous {
            info!(operation = "identity_sign_out", account = %previous.account, "Signed out");
        }
        self.changes.send_replace(None);
    }

    /// Update verification for the current account (e.g. email confirmed).
    pub fn set_verified(&self, verified: bool) {
        if let Some(ref mut session) = *self.write() {
            session.verified = verified;
        }
    }

    /// Receiver of `identityChanged` events; the current value is the
    /// signed-in account.
    pub fn subscribe(&self) -> watch::Receiver<Option<AccountId>> {
        self.changes.subscribe()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<Session>> {
        self.session.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<Session>> {
        self.session.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl IdentityProvider for SessionIdentity {
    fn current_account(&self) -> Option<AccountId> {
        self.read().as_ref().map(|s| s.account.clone())
    }

    async fn is_verified(&self, account: &AccountId) -> Result<bool, RemoteError> {
        Ok(self
            .read()
            .as_ref()
            .map(|s| &s.account == account && s.verified)
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sign_in_out_publishes_changes() {
        let identity = SessionIdentity::signed_out();
        let mut changes = identity.subscribe();
        assert!(identity.current_account().is_none());

        identity.sign_in(AccountId::new("u1"), false);
        changes.changed().await.unwrap();
        assert_eq!(*changes.borrow(), Some(AccountId::new("u1")));
        assert!(!identity.is_verified(&AccountId::new("u1")).await.unwrap());

        identity.set_verified(true);
        assert!(identity.is_verified(&AccountId::new("u1")).await.unwrap());
        assert!(!identity.is_verified(&AccountId::new("someone-else")).await.unwrap());

        identity.sign_out();
        changes.changed().await.unwrap();
        assert!(changes.borrow().is_none());
        assert!(identity.current_account().is_none());
    }
}
