//! PKCE (Proof Key for Code Exchange) implementation per RFC 7636
//!
//! Generates the code verifier, S256 challenge, and anti-CSRF state values
//! used during the OAuth authorization flow. The verifier is held in the
//! pending-login store and sent during token exchange; the challenge is
//! included in the authorization URL so the authorization server can verify
//! the exchange request came from the same party that initiated the flow.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};

use crate::config::OAuthConfig;

/// Generate a cryptographically random PKCE code verifier.
///
/// Produces a 64-byte random value encoded as URL-safe base64 (no padding):
/// 86 characters, inside RFC 7636's required 43-128 range.
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 64];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`
///
/// Deterministic: the same verifier always yields the same challenge. The
/// digest is one-way; the verifier cannot be derived from the challenge.
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generate an opaque anti-CSRF state token.
///
/// Independent of the verifier. Doubles as the lookup key for the pending
/// login entry when the authorization callback arrives.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Build the full authorization URL with all required OAuth parameters.
///
/// The `state` parameter is returned unchanged by the authorization server
/// in the callback. Optional provider hints (`access_type`, `prompt`) are
/// appended only when configured.
pub fn build_authorization_url(config: &OAuthConfig, challenge: &str, state: &str) -> String {
    let mut url = format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&code_challenge={}&code_challenge_method=S256&state={}",
        config.authorize_endpoint,
        urlencoded(&config.client_id),
        urlencoded(&config.redirect_uri),
        urlencoded(&config.scopes),
        challenge,
        state,
    );
    if let Some(ref access_type) = config.access_type {
        url.push_str("&access_type=");
        url.push_str(&urlencoded(access_type));
    }
    if let Some(ref prompt) = config.prompt {
        url.push_str("&prompt=");
        url.push_str(&urlencoded(prompt));
    }
    url
}

/// Minimal URL encoding for parameter values.
/// Only encodes characters that would break URL parameter parsing.
fn urlencoded(s: &str) -> String {
    s.replace(' ', "%20")
        .replace(':', "%3A")
        .replace('/', "%2F")
}
