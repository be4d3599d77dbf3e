//! Error types for session operations

/// Errors from session and request operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No credential is stored; the caller must go through login.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The session ended (logout or refresh failure) while this operation
    /// was waiting on it.
    #[error("session ended")]
    SessionEnded,

    /// The single-flight refresh cycle this caller was attached to failed.
    /// The session has already been torn down; one `Ended` event was emitted.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// A request received a second 401 after its single refresh-and-retry.
    /// The upstream response is carried unchanged; no further refresh is
    /// attempted.
    #[error("unauthorized after retry (status {status})")]
    Unauthorized { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("token store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Auth(#[from] portal_auth::Error),
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
