//! OAuth client configuration
//!
//! All provider coordinates live in one explicit struct validated eagerly at
//! load time. A missing endpoint or client id fails here, at startup, never
//! later inside a request path.

use std::path::Path;

use serde::Deserialize;

/// OAuth provider coordinates and client identity.
///
/// `client_id` and the endpoints are not secrets — they identify the public
/// client application. The actual secrets (access/refresh tokens) are managed
/// by the session token store.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// Authorization endpoint the browser is redirected to
    pub authorize_endpoint: String,
    /// Token endpoint for code exchange and refresh
    pub token_endpoint: String,
    /// Public OAuth client id
    pub client_id: String,
    /// Redirect URI registered with the provider
    pub redirect_uri: String,
    /// Space-separated scope list
    pub scopes: String,
    /// Optional provider hint, e.g. "offline" to request a refresh token
    #[serde(default)]
    pub access_type: Option<String>,
    /// Optional provider hint, e.g. "consent"
    #[serde(default)]
    pub prompt: Option<String>,
    /// Bounded timeout for token endpoint calls, in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

impl OAuthConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: OAuthConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all fields. Called by `load`; embedders constructing the
    /// struct directly should call it before first use.
    pub fn validate(&self) -> common::Result<()> {
        for (name, value) in [
            ("authorize_endpoint", &self.authorize_endpoint),
            ("token_endpoint", &self.token_endpoint),
            ("redirect_uri", &self.redirect_uri),
        ] {
            if !value.starts_with("http://") && !value.starts_with("https://") {
                return Err(common::Error::config(format!(
                    "{name} must start with http:// or https://, got: {value}"
                )));
            }
        }

        if self.client_id.trim().is_empty() {
            return Err(common::Error::config("client_id must not be empty"));
        }

        if self.scopes.trim().is_empty() {
            return Err(common::Error::config("scopes must not be empty"));
        }

        if self.timeout_secs == 0 {
            return Err(common::Error::config("timeout_secs must be greater than 0"));
        }

        Ok(())
    }
}
