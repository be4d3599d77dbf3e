//! Durable storage for the session's credential pair
//!
//! One credential slot per store, persisted as a JSON file. All writes use
//! atomic temp-file + rename to prevent corruption on crash; a tokio Mutex
//! serializes concurrent access from the request path and the refresh
//! coordinator. Isolation between tenant/host contexts is per-path: each
//! logical session gets its own file, nothing is shared.
//!
//! Writers are the login exchange and the refresh coordinator only; every
//! other component reads.

use std::path::{Path, PathBuf};

use common::Secret;
use portal_auth::{RefreshResponse, TokenResponse, decode_claims, endpoint::DEFAULT_EXPIRES_IN_SECS};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// The session's credential pair plus the decoded claims needed for session
/// checks. Signatures are never verified client-side; `subject` and
/// `expires` are bookkeeping, not authorization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// Current access token (Bearer token for API calls)
    pub access: Secret<String>,
    /// Refresh token for obtaining new access tokens
    pub refresh: Secret<String>,
    /// Access token expiration as unix timestamp in milliseconds
    pub expires: u64,
    /// Subject id decoded from the access token, when it is a JWT
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl Credential {
    /// Build a credential from a successful code exchange.
    pub fn from_exchange(response: &TokenResponse, now_millis: u64) -> Self {
        Self {
            subject: decode_claims(&response.access_token).and_then(|c| c.subject),
            access: Secret::new(response.access_token.clone()),
            refresh: Secret::new(response.refresh_token.clone()),
            expires: now_millis + response.expires_in * 1000,
        }
    }

    /// Build the successor credential after a refresh. A rotated refresh
    /// token replaces the previous one; otherwise the previous token stays
    /// valid and is carried forward. Same for the subject claim when the
    /// new access token is opaque.
    pub fn after_refresh(response: &RefreshResponse, previous: Credential, now_millis: u64) -> Self {
        let expires_in = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        Self {
            subject: decode_claims(&response.access_token)
                .and_then(|c| c.subject)
                .or(previous.subject),
            access: Secret::new(response.access_token.clone()),
            refresh: response
                .refresh_token
                .clone()
                .map(Secret::new)
                .unwrap_or(previous.refresh),
            expires: now_millis + expires_in * 1000,
        }
    }

    /// Whether the access token is expired (or will be within `skew_millis`)
    /// by the local clock.
    pub fn is_expired(&self, now_millis: u64, skew_millis: u64) -> bool {
        self.expires <= now_millis + skew_millis
    }
}

/// Current unix time in milliseconds.
pub(crate) fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Durable single-slot credential store.
pub struct TokenStore {
    path: PathBuf,
    state: Mutex<Option<Credential>>,
}

impl TokenStore {
    /// Load the credential file at the given path.
    ///
    /// A missing file means an unauthenticated session; it is created
    /// (holding `null`) so future loads skip the cold-start path.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Store(format!("reading credential file: {e}")))?;
            let credential: Option<Credential> = serde_json::from_str(&contents)
                .map_err(|e| Error::Store(format!("parsing credential file: {e}")))?;
            info!(path = %path.display(), authenticated = credential.is_some(), "loaded credential store");
            credential
        } else {
            info!(path = %path.display(), "credential file not found, starting unauthenticated");
            write_atomic(&path, &None).await?;
            None
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Get a clone of the stored credential, if any.
    pub async fn get(&self) -> Option<Credential> {
        let state = self.state.lock().await;
        state.clone()
    }

    /// Replace the stored credential and persist to disk.
    ///
    /// Called by the login exchange and by the refresh coordinator; no other
    /// component writes.
    pub async fn set(&self, credential: Credential) -> Result<()> {
        let mut state = self.state.lock().await;
        *state = Some(credential);
        debug!("stored credential");
        write_atomic(&self.path, &state).await
    }

    /// Clear the stored credential and persist the empty slot.
    ///
    /// Returns the prior credential if one existed, so the caller can make
    /// logout notification emit-once.
    pub async fn clear(&self) -> Result<Option<Credential>> {
        let mut state = self.state.lock().await;
        let previous = state.take();
        if previous.is_some() {
            debug!("cleared credential");
            write_atomic(&self.path, &state).await?;
        }
        Ok(previous)
    }
}

/// Write the credential slot to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. This prevents corruption if the process crashes mid-write.
/// Sets file permissions to 0600 (owner read/write only) since the file
/// contains OAuth tokens.
async fn write_atomic(path: &Path, data: &Option<Credential>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Store(format!("serializing credential: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Store("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credential.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Store(format!("writing temp credential file: {e}")))?;

    // Set 0600 permissions (unix only)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Store(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Store(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credential");
    Ok(())
}
