//! Unverified access token claim decoding
//!
//! The session manager stores only the claims it needs for session checks:
//! the subject id and the token expiry. Signature verification is the
//! server's job; this decode is a plain base64url + JSON parse of the JWT
//! payload segment and must never be used as an authorization decision.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

/// Claims extracted from an access token payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Claims {
    /// Subject id (`sub`), when present
    pub subject: Option<String>,
    /// Expiry as unix seconds (`exp`), when present
    pub expiry_epoch: Option<u64>,
}

#[derive(Deserialize)]
struct RawClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    exp: Option<u64>,
}

/// Decode the payload segment of a JWT access token, without verification.
///
/// Returns `None` for opaque (non-JWT) tokens or undecodable payloads; the
/// caller falls back to the token response's `expires_in` for expiry, which
/// stays authoritative either way.
pub fn decode_claims(token: &str) -> Option<Claims> {
    // A JWT has exactly three segments
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(segments[1]).ok()?;
    let raw: RawClaims = serde_json::from_slice(&bytes).ok()?;
    Some(Claims {
        subject: raw.sub,
        expiry_epoch: raw.exp,
    })
}
