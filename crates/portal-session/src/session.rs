//! Session state and login orchestration
//!
//! `SessionContext` is the explicit, injectable root object for one logical
//! session: login redirect + exchange, derived authenticated status, logout,
//! and the session-ended notification stream. Collaborators (UI, routing,
//! domain code) never touch the token store or the refresh coordinator
//! directly.

use std::sync::Arc;

use portal_auth::{
    ExchangeOutcome, HttpTokenEndpoint, LoginStore, OAuthConfig, TokenEndpoint, pkce,
};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::refresh::RefreshCoordinator;
use crate::store::{Credential, TokenStore, unix_millis};

/// Pre-emptive refresh threshold: a token expiring within this window is
/// refreshed before the request goes out, avoiding a doomed round trip.
pub(crate) const STALE_SKEW_MILLIS: u64 = 60_000;

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEndReason {
    /// Explicit `logout()` call.
    UserLogout,
    /// The refresh token was rejected or the refresh call failed.
    RefreshFailed,
}

/// Notification consumed by session listeners (redirect to login, UI resets).
/// Emitted exactly once per ended session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Ended(SessionEndReason),
}

/// The authorization redirect handed to the browser.
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    pub url: String,
    /// Anti-CSRF state; also the key of the pending login entry
    pub state: String,
}

/// Result of completing a login callback.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    /// Tokens stored; the session is established.
    Established {
        subject: Option<String>,
        return_to: Option<String>,
    },
    /// The provider wants account setup first. No session is established;
    /// the pending token is short-lived and scoped to onboarding.
    NeedsOnboarding {
        pending_token: String,
        prefill: Option<serde_json::Value>,
        return_to: Option<String>,
    },
}

/// One logical session: token store, pending logins, refresh coordination,
/// and the event stream. Cheap to share behind an `Arc`; multiple isolated
/// contexts coexist in one process.
pub struct SessionContext {
    config: Arc<OAuthConfig>,
    endpoint: Arc<dyn TokenEndpoint>,
    store: Arc<TokenStore>,
    logins: Arc<LoginStore>,
    coordinator: RefreshCoordinator,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionContext {
    /// Build a session context over an injected token endpoint.
    ///
    /// Validates the configuration eagerly; a bad endpoint URL or missing
    /// client id fails here, never inside a request path.
    pub fn new(
        config: Arc<OAuthConfig>,
        endpoint: Arc<dyn TokenEndpoint>,
        store: Arc<TokenStore>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;
        let logins = Arc::new(LoginStore::new());
        let (events, _) = broadcast::channel(16);
        let coordinator = RefreshCoordinator::new(
            endpoint.clone(),
            store.clone(),
            logins.clone(),
            events.clone(),
        );
        Ok(Self {
            config,
            endpoint,
            store,
            logins,
            coordinator,
            events,
        })
    }

    /// Build a session context with the production HTTP token endpoint.
    pub fn with_http_endpoint(config: Arc<OAuthConfig>, store: Arc<TokenStore>) -> Result<Self> {
        let endpoint = Arc::new(HttpTokenEndpoint::new(config.clone())?);
        Self::new(config, endpoint, store)
    }

    /// Start a login attempt: generate the PKCE values, persist the pending
    /// entry keyed by `state`, and return the authorization redirect.
    ///
    /// Concurrent attempts (two tabs) each get their own `state` key and
    /// never disturb each other's verifier.
    pub async fn begin_login(&self, return_to: Option<String>) -> Result<LoginRedirect> {
        let verifier = pkce::generate_verifier();
        let challenge = pkce::compute_challenge(&verifier);
        loop {
            let state = pkce::generate_state();
            match self
                .logins
                .insert(state.clone(), verifier.clone(), return_to.clone())
                .await
            {
                Ok(()) => {
                    info!(state = %state, "login attempt started");
                    let url = pkce::build_authorization_url(&self.config, &challenge, &state);
                    return Ok(LoginRedirect { url, state });
                }
                // 32 bytes of state randomness makes this unreachable in
                // practice; regenerate rather than overwrite
                Err(portal_auth::Error::StateCollision(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Complete a login callback: consume the pending entry (single-use),
    /// exchange the code, and on success store the credential pair.
    ///
    /// An unknown `state` is rejected before any network call. The
    /// authorization code is never retried — it is single-use server-side.
    pub async fn complete_login(&self, code: &str, state: &str) -> Result<LoginOutcome> {
        let pending = self.logins.take(state).await?;

        match self.endpoint.exchange(code, &pending.verifier).await? {
            ExchangeOutcome::Tokens(response) => {
                let credential = Credential::from_exchange(&response, unix_millis());
                let subject = credential.subject.clone();
                self.store.set(credential).await?;
                info!(subject = subject.as_deref().unwrap_or("<opaque>"), "session established");
                Ok(LoginOutcome::Established {
                    subject,
                    return_to: pending.return_to,
                })
            }
            ExchangeOutcome::NeedsOnboarding {
                pending_token,
                prefill,
                return_to,
            } => {
                debug!("exchange deferred to onboarding");
                Ok(LoginOutcome::NeedsOnboarding {
                    pending_token,
                    prefill,
                    return_to: return_to.or(pending.return_to),
                })
            }
        }
    }

    /// Whether the store holds an access token whose expiry is in the
    /// future by the local clock. Derived on demand, never cached.
    pub async fn authenticated(&self) -> bool {
        match self.store.get().await {
            Some(credential) => !credential.is_expired(unix_millis(), 0),
            None => false,
        }
    }

    /// Subject id of the current session, when known.
    pub async fn subject(&self) -> Option<String> {
        self.store.get().await.and_then(|c| c.subject)
    }

    /// End the session: clear the token store and pending login entries,
    /// reject queued refresh waiters, and emit one `Ended` notification.
    /// Idempotent under concurrency.
    pub async fn logout(&self) {
        self.coordinator.logout().await;
    }

    /// Subscribe to session-ended notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Obtain a fresh access token via the single-flight coordinator.
    /// Used by the request authenticator on a 401; exposed for callers that
    /// manage their own transport.
    pub async fn refreshed_token(&self) -> Result<String> {
        self.coordinator.refreshed_token().await
    }

    /// Access token for an outgoing request, refreshing first when the
    /// stored token is expired or inside the pre-emptive window.
    pub(crate) async fn access_token_for_request(&self) -> Result<String> {
        match self.store.get().await {
            None => Err(Error::NotAuthenticated),
            Some(credential) => {
                if credential.is_expired(unix_millis(), STALE_SKEW_MILLIS) {
                    debug!("stored token stale, refreshing before request");
                    self.refreshed_token().await
                } else {
                    Ok(credential.access.expose().clone())
                }
            }
        }
    }
}
