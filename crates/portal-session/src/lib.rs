//! Session lifecycle for the portal client
//!
//! Owns the credential pair for one logical session: durable token storage,
//! the single-flight refresh coordinator, the request authenticator, and the
//! login/logout surface. Everything hangs off an explicit `SessionContext` —
//! no process-wide globals, so isolated sessions (tests, multi-tenant
//! embedding) coexist freely.
//!
//! Request path:
//! 1. `ApiClient::send()` attaches `Authorization: Bearer <access>` from the
//!    token store
//! 2. A 401 hands control to the refresh coordinator — at most one refresh
//!    call in flight, concurrent callers queue as waiters
//! 3. On refresh success every queued request resends exactly once with the
//!    new token; on failure the session tears down and one `Ended` event fires

pub mod error;
mod refresh;
pub mod request;
pub mod session;
pub mod store;

pub use error::{Error, Result};
pub use request::{ApiClient, ApiRequest, ApiResponse, HttpTransport, Transport};
pub use session::{
    LoginOutcome, LoginRedirect, SessionContext, SessionEndReason, SessionEvent,
};
pub use store::{Credential, TokenStore};
