//! Error types for OAuth login and token operations

/// Errors from the PKCE login flow and token endpoint.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No pending login entry exists for the callback's `state` value.
    /// Rejected before any network call reaches the token endpoint.
    #[error("unknown login state: {0}")]
    StateMismatch(String),

    /// The pending login entry for this `state` was already consumed.
    /// Verifiers are single-use; a replayed callback cannot be honored.
    #[error("login verifier already consumed for state: {0}")]
    MissingVerifier(String),

    /// A pending login already exists under this `state` key. The caller
    /// regenerates the state rather than overwriting a concurrent attempt.
    #[error("login state collision: {0}")]
    StateCollision(String),

    /// Non-success response from the token endpoint during code exchange.
    /// The authorization code is single-use server-side, so the exchange is
    /// never retried automatically.
    #[error("code exchange failed with status {status}: {body}")]
    ExchangeFailed { status: u16, body: String },

    /// The token endpoint rejected the refresh token (401/403). Terminal:
    /// the session cannot be recovered without a new login.
    #[error("refresh token rejected with status {status}: {body}")]
    RefreshRejected { status: u16, body: String },

    /// Refresh failed for a reason other than credential rejection
    /// (5xx, malformed response).
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// The bounded request timeout elapsed. Treated identically to a
    /// failed call by the refresh coordinator.
    #[error("token endpoint timed out: {0}")]
    Timeout(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("invalid token endpoint response: {0}")]
    InvalidResponse(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
