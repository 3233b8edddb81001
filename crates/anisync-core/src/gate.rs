use crate::identity::IdentityProvider;
use anisync_models::AccountId;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct GateState {
    last_known: Option<AccountId>,
    known_bad: bool,
}

/// Decides whether remote operations should be attempted right now.
///
/// Once a remote call is rejected for permission reasons the gate stays
/// closed for that identity until the identity changes or `reset` is called.
pub struct AccessGate {
    identity: Arc<dyn IdentityProvider>,
    state: Mutex<GateState>,
}

impl AccessGate {
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        let last_known = identity.current_account();
        Self {
            identity,
            state: Mutex::new(GateState {
                last_known,
                known_bad: false,
            }),
        }
    }

    /// False without any network call when signed out or known bad;
    /// otherwise the account's verification flag.
    pub async fn permitted(&self) -> bool {
        let Some(account) = self.identity.current_account() else {
            self.observe(None);
            return false;
        };
        self.observe(Some(&account));

        if self.lock().known_bad {
            debug!(operation = "access_gate_denied", account = %account, "Remote access known bad for this session");
            return false;
        }

        match self.identity.is_verified(&account).await {
            Ok(verified) => {
                if !verified {
                    debug!(operation = "access_gate_unverified", account = %account, "Account not verified, skipping remote");
                }
                verified
            }
            Err(e) => {
                warn!(operation = "access_gate_check_failed", account = %account, error = %e, "Could not check verification state");
                false
            }
        }
    }

    /// Close the gate after `account` was rejected. A rejection for an
    /// identity that is no longer current is ignored.
    pub fn mark_bad(&self, account: &AccountId) {
        if self.identity.current_account().as_ref() != Some(account) {
            debug!(
                operation = "access_gate_stale_rejection",
                account = %account,
                "Ignoring permission error for a previous identity"
            );
            return;
        }
        self.observe(Some(account));

        let mut state = self.lock();
        if !state.known_bad {
            warn!(
                operation = "access_gate_marked_bad",
                account = %account,
                "Remote rejected access; disabling remote sync for this session"
            );
        }
        state.known_bad = true;
    }

    /// Sign-in, sign-out or account switch. Always reopens the gate, since a
    /// fresh sign-in of the same account is a re-authentication.
    pub fn identity_changed(&self, account: Option<AccountId>) {
        let mut state = self.lock();
        info!(
            operation = "access_gate_identity_changed",
            account = account.as_ref().map(|a| a.as_str()).unwrap_or("<none>"),
            "Identity changed, resetting access gate"
        );
        state.last_known = account;
        state.known_bad = false;
    }

    /// Explicit reopen, e.g. after the verification state changed.
    pub fn reset(&self) {
        self.lock().known_bad = false;
    }

    pub fn is_known_bad(&self) -> bool {
        self.lock().known_bad
    }

    // Identity switched underneath us without an explicit event.
    fn observe(&self, account: Option<&AccountId>) {
        let mut state = self.lock();
        if state.last_known.as_ref() != account {
            debug!("Access gate observed a new identity, resetting");
            state.last_known = account.cloned();
            state.known_bad = false;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
