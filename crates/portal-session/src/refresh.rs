//! Single-flight refresh coordination
//!
//! The state machine at the center of the session manager. At most one
//! refresh network call is in flight at any instant: the first caller to
//! hit a 401 (or a stale-token pre-check) becomes the leader and issues the
//! call; every concurrent caller enqueues a oneshot waiter and suspends.
//! The leader resolves or rejects every waiter exactly once.
//!
//! Logout bumps a generation counter under the same lock. A refresh call
//! that completes after its generation was invalidated is discarded without
//! touching the token store or any waiter — a late success must not
//! resurrect a session the user explicitly ended.

use std::sync::Arc;

use portal_auth::{LoginStore, TokenEndpoint};
use tokio::sync::{Mutex, broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::session::{SessionEndReason, SessionEvent};
use crate::store::{Credential, TokenStore, unix_millis};

#[derive(Debug, Clone, Copy, PartialEq)]
enum RefreshState {
    Idle,
    Refreshing,
}

/// Why a queued waiter was rejected.
#[derive(Debug, Clone)]
enum Rejection {
    /// Logout ran while the waiter was suspended.
    SessionEnded,
    /// The refresh call itself failed.
    RefreshFailed(String),
}

type Waiter = oneshot::Sender<std::result::Result<String, Rejection>>;

/// Mutable coordinator state. The `Idle → Refreshing` transition and the
/// waiter push are guarded by one mutex so they are a single atomic step
/// even under a preemptive runtime.
struct Inner {
    state: RefreshState,
    generation: u64,
    waiters: Vec<Waiter>,
}

pub(crate) struct RefreshCoordinator {
    endpoint: Arc<dyn TokenEndpoint>,
    store: Arc<TokenStore>,
    logins: Arc<LoginStore>,
    events: broadcast::Sender<SessionEvent>,
    inner: Mutex<Inner>,
}

impl RefreshCoordinator {
    pub(crate) fn new(
        endpoint: Arc<dyn TokenEndpoint>,
        store: Arc<TokenStore>,
        logins: Arc<LoginStore>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            endpoint,
            store,
            logins,
            events,
            inner: Mutex::new(Inner {
                state: RefreshState::Idle,
                generation: 0,
                waiters: Vec::new(),
            }),
        }
    }

    /// Obtain a fresh access token, coordinating with any refresh already in
    /// flight.
    ///
    /// If a refresh is running, this caller suspends as a waiter and resumes
    /// with its outcome. Otherwise this caller becomes the leader, issues
    /// exactly one refresh call, and fans the result out to every waiter
    /// that queued behind it.
    pub(crate) async fn refreshed_token(&self) -> Result<String> {
        let leader_generation = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                RefreshState::Refreshing => {
                    let (tx, rx) = oneshot::channel();
                    inner.waiters.push(tx);
                    drop(inner);
                    debug!("refresh in flight, queued as waiter");
                    return match rx.await {
                        Ok(Ok(token)) => Ok(token),
                        Ok(Err(Rejection::SessionEnded)) => Err(Error::SessionEnded),
                        Ok(Err(Rejection::RefreshFailed(reason))) => {
                            Err(Error::RefreshFailed(reason))
                        }
                        // The sender only drops unsent if the coordinator is
                        // itself dropped mid-flight
                        Err(_) => Err(Error::SessionEnded),
                    };
                }
                RefreshState::Idle => {
                    inner.state = RefreshState::Refreshing;
                    inner.generation
                }
            }
        };

        self.lead_refresh(leader_generation).await
    }

    /// Leader path: issue the one refresh call and settle all waiters.
    async fn lead_refresh(&self, generation: u64) -> Result<String> {
        metrics::counter!("session_refresh_total").increment(1);

        let previous = self.store.get().await;
        let result = match previous {
            Some(credential) => {
                debug!("issuing refresh call");
                self.endpoint
                    .refresh(credential.refresh.expose())
                    .await
                    .map(|response| (response, credential))
            }
            // Store emptied between the 401 and leader election (logout
            // racing in) or never populated: nothing to refresh with.
            None => Err(portal_auth::Error::RefreshFailed(
                "no refresh token available".into(),
            )),
        };

        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            // Logout raced the in-flight call: waiters are already rejected
            // and the store cleared. Discard the result untouched.
            debug!("discarding refresh result from a stale generation");
            return Err(Error::SessionEnded);
        }

        match result {
            Ok((response, previous)) => {
                let credential = Credential::after_refresh(&response, previous, unix_millis());
                let access = credential.access.expose().clone();
                // Store write happens while holding the coordinator lock so
                // a concurrent logout cannot interleave between the write
                // and the waiter fan-out.
                if let Err(e) = self.store.set(credential).await {
                    warn!(error = %e, "failed to persist refreshed credential");
                }
                inner.state = RefreshState::Idle;
                let waiters = inner.waiters.len();
                for waiter in inner.waiters.drain(..) {
                    let _ = waiter.send(Ok(access.clone()));
                }
                info!(waiters, "access token refreshed");
                Ok(access)
            }
            Err(e) => {
                metrics::counter!("session_refresh_failures_total").increment(1);
                let reason = e.to_string();
                warn!(error = %reason, "refresh failed, ending session");
                inner.state = RefreshState::Idle;
                self.teardown_locked(&mut inner, Rejection::RefreshFailed(reason.clone()))
                    .await;
                self.end_session(SessionEndReason::RefreshFailed).await;
                Err(Error::RefreshFailed(reason))
            }
        }
    }

    /// Explicit logout. Idempotent: concurrent calls clear and notify once.
    pub(crate) async fn logout(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = RefreshState::Idle;
        self.teardown_locked(&mut inner, Rejection::SessionEnded).await;
        drop(inner);
        self.end_session(SessionEndReason::UserLogout).await;
    }

    /// Invalidate the current refresh generation and reject queued waiters.
    /// Must be called with the coordinator lock held.
    async fn teardown_locked(&self, inner: &mut Inner, rejection: Rejection) {
        inner.generation += 1;
        let waiters = inner.waiters.len();
        if waiters > 0 {
            debug!(waiters, "rejecting queued waiters");
        }
        for waiter in inner.waiters.drain(..) {
            let _ = waiter.send(Err(rejection.clone()));
        }
    }

    /// Clear durable and pending state; emit the session-ended notification
    /// only if the store actually held tokens. This is what makes logout
    /// fire exactly once per ended session no matter how many callers race.
    async fn end_session(&self, reason: SessionEndReason) {
        let previous = match self.store.clear().await {
            Ok(previous) => previous,
            Err(e) => {
                warn!(error = %e, "failed to clear token store");
                None
            }
        };
        self.logins.clear().await;
        if previous.is_some() {
            info!(reason = ?reason, "session ended");
            let _ = self.events.send(SessionEvent::Ended(reason));
        }
    }
}
