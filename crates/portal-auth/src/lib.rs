//! OAuth2 Authorization-Code-with-PKCE login flow
//!
//! Provides PKCE generation, the pending-login store, the token endpoint
//! client, and unverified claim decoding for the portal session manager.
//! This crate is a standalone library with no dependency on the session
//! crate — it can be tested and used independently.
//!
//! Login flow:
//! 1. Caller generates `pkce::generate_verifier()` + `pkce::compute_challenge()`
//!    + `pkce::generate_state()`
//! 2. `{state -> {verifier, return_to}}` persisted via `LoginStore::insert()`
//! 3. Browser navigates to `pkce::build_authorization_url()`
//! 4. Callback arrives; `LoginStore::take()` consumes the entry (single-use)
//! 5. `TokenEndpoint::exchange()` trades code + verifier for tokens
//! 6. Later, `TokenEndpoint::refresh()` rotates the access token

pub mod claims;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod login;
pub mod pkce;

pub use claims::{Claims, decode_claims};
pub use config::OAuthConfig;
pub use endpoint::{ExchangeOutcome, HttpTokenEndpoint, RefreshResponse, TokenEndpoint, TokenResponse};
pub use error::{Error, Result};
pub use login::{LoginStore, PendingLogin};
pub use pkce::{build_authorization_url, compute_challenge, generate_state, generate_verifier};
