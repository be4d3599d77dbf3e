//! Pending-login storage for in-flight authorization round trips
//!
//! Holds `{state -> {verifier, return_to}}` between the redirect to the
//! authorization server and the callback. Keyed by `state` rather than a
//! single slot so concurrent login attempts (two tabs) stay independent.
//! Entries are single-use: `take` consumes exactly once and leaves a
//! tombstone so a replayed callback is distinguishable from an unknown one.
//!
//! Session-scoped and in-memory only. Cleared wholesale on logout.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

/// A login attempt awaiting its authorization callback.
#[derive(Debug, Clone)]
pub struct PendingLogin {
    /// PKCE code verifier, sent to the token endpoint at exchange time
    pub verifier: String,
    /// Where to send the user after login completes
    pub return_to: Option<String>,
}

enum Slot {
    Pending(PendingLogin),
    /// The entry was consumed by `take`. Kept so a second callback with the
    /// same state maps to `MissingVerifier` instead of `StateMismatch`.
    Consumed,
}

/// State-keyed store of in-flight login attempts.
#[derive(Default)]
pub struct LoginStore {
    state: Mutex<HashMap<String, Slot>>,
}

impl LoginStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new login attempt under its `state` key.
    ///
    /// Never overwrites: a second attempt under an existing key returns
    /// `StateCollision` and the caller regenerates the state. States carry
    /// 32 bytes of randomness, so this fires only under test-forced keys.
    pub async fn insert(
        &self,
        state: String,
        verifier: String,
        return_to: Option<String>,
    ) -> Result<()> {
        let mut entries = self.state.lock().await;
        if entries.contains_key(&state) {
            return Err(Error::StateCollision(state));
        }
        debug!(state = %state, "recorded pending login");
        entries.insert(state, Slot::Pending(PendingLogin { verifier, return_to }));
        Ok(())
    }

    /// Consume the pending entry for `state`, exactly once.
    ///
    /// Absent key → `StateMismatch` (unknown or forged callback).
    /// Consumed key → `MissingVerifier` (replayed callback).
    pub async fn take(&self, state: &str) -> Result<PendingLogin> {
        let mut entries = self.state.lock().await;
        match entries.get_mut(state) {
            None => Err(Error::StateMismatch(state.to_owned())),
            Some(slot @ Slot::Pending(_)) => {
                let taken = std::mem::replace(slot, Slot::Consumed);
                let Slot::Pending(login) = taken else {
                    unreachable!("matched Pending above");
                };
                debug!(state = %state, "consumed pending login");
                Ok(login)
            }
            Some(Slot::Consumed) => Err(Error::MissingVerifier(state.to_owned())),
        }
    }

    /// Drop all pending entries and tombstones (logout path).
    pub async fn clear(&self) {
        let mut entries = self.state.lock().await;
        if !entries.is_empty() {
            debug!(entries = entries.len(), "cleared pending logins");
            entries.clear();
        }
    }

    /// Number of live (unconsumed) entries.
    #[cfg(test)]
    async fn pending_count(&self) -> usize {
        let entries = self.state.lock().await;
        entries
            .values()
            .filter(|slot| matches!(slot, Slot::Pending(_)))
            .count()
    }
}
