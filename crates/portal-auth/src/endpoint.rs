//! Token endpoint client for code exchange and refresh
//!
//! Both operations POST form-encoded bodies to the configured token endpoint
//! with different grant types. The `TokenEndpoint` trait is the seam between
//! the session manager and the network: the refresh coordinator and the
//! login flow talk to the trait, tests drive them with a counting mock.
//!
//! A 401 from this endpoint is a terminal authentication failure by
//! construction: these calls never route through the request authenticator,
//! so an unauthorized token response can never trigger a recursive refresh.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::OAuthConfig;
use crate::error::{Error, Result};

/// Default access token lifetime when the provider omits `expires_in`
/// on a refresh response.
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Successful code exchange: a full credential pair.
///
/// `expires_in` is a delta in seconds from the response time. The caller
/// converts it to an absolute unix millisecond timestamp when storing the
/// credential.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Seconds until the access token expires (delta, not absolute)
    pub expires_in: u64,
}

/// Refresh response. The provider may rotate the refresh token; when absent,
/// the previous one remains valid. `expires_in` falls back to
/// `DEFAULT_EXPIRES_IN_SECS` when omitted.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

/// Outcome of a code exchange.
///
/// The onboarding branch carries a short-lived pending token without
/// establishing a session; the caller routes the user into account setup.
#[derive(Debug, Clone)]
pub enum ExchangeOutcome {
    Tokens(TokenResponse),
    NeedsOnboarding {
        pending_token: String,
        prefill: Option<serde_json::Value>,
        return_to: Option<String>,
    },
}

/// Onboarding branch of the exchange response body.
#[derive(Debug, Deserialize)]
struct OnboardingBody {
    needs_onboarding: bool,
    pending_token: String,
    #[serde(default)]
    prefill: Option<serde_json::Value>,
    #[serde(default)]
    return_to: Option<String>,
}

/// Abstraction over the token endpoint.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn TokenEndpoint>` shared between the login flow and the refresh
/// coordinator).
pub trait TokenEndpoint: Send + Sync {
    /// Exchange an authorization code and PKCE verifier for tokens.
    fn exchange<'a>(
        &'a self,
        code: &'a str,
        verifier: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ExchangeOutcome>> + Send + 'a>>;

    /// Obtain a new access token from a refresh token.
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<RefreshResponse>> + Send + 'a>>;
}

/// Production `TokenEndpoint` backed by reqwest.
pub struct HttpTokenEndpoint {
    config: Arc<OAuthConfig>,
    client: reqwest::Client,
}

impl HttpTokenEndpoint {
    /// Build the endpoint client with the config's bounded timeout applied
    /// to every call.
    pub fn new(config: Arc<OAuthConfig>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Http(format!("building token endpoint client: {e}")))?;
        Ok(Self { config, client })
    }

    async fn post_form(&self, form: &[(&str, &str)]) -> Result<reqwest::Response> {
        self.client
            .post(&self.config.token_endpoint)
            .form(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("token endpoint: {e}"))
                } else {
                    Error::Http(format!("token endpoint request failed: {e}"))
                }
            })
    }
}

impl TokenEndpoint for HttpTokenEndpoint {
    fn exchange<'a>(
        &'a self,
        code: &'a str,
        verifier: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ExchangeOutcome>> + Send + 'a>> {
        Box::pin(async move {
            let response = self
                .post_form(&[
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("code_verifier", verifier),
                    ("client_id", &self.config.client_id),
                    ("redirect_uri", &self.config.redirect_uri),
                ])
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| String::from("<no body>"));
                // The authorization code is single-use server-side: a second
                // attempt cannot succeed, so no automatic retry here.
                warn!(status = status.as_u16(), "code exchange rejected");
                return Err(Error::ExchangeFailed {
                    status: status.as_u16(),
                    body,
                });
            }

            let body: serde_json::Value = response
                .json()
                .await
                .map_err(|e| Error::InvalidResponse(format!("exchange response: {e}")))?;

            parse_exchange_body(body)
        })
    }

    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<RefreshResponse>> + Send + 'a>> {
        Box::pin(async move {
            let response = self
                .post_form(&[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                    ("client_id", &self.config.client_id),
                ])
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| String::from("<no body>"));

                // 401/403 means the refresh token is revoked or invalid —
                // terminal, the session cannot be recovered
                if status.as_u16() == 401 || status.as_u16() == 403 {
                    warn!(status = status.as_u16(), "refresh token rejected");
                    return Err(Error::RefreshRejected {
                        status: status.as_u16(),
                        body,
                    });
                }

                return Err(Error::RefreshFailed(format!(
                    "token endpoint returned {status}: {body}"
                )));
            }

            response
                .json::<RefreshResponse>()
                .await
                .map_err(|e| Error::InvalidResponse(format!("refresh response: {e}")))
        })
    }
}

/// Branch an exchange response body into tokens or the onboarding detour.
fn parse_exchange_body(body: serde_json::Value) -> Result<ExchangeOutcome> {
    if body
        .get("needs_onboarding")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
    {
        let onboarding: OnboardingBody = serde_json::from_value(body)
            .map_err(|e| Error::InvalidResponse(format!("onboarding response: {e}")))?;
        debug_assert!(onboarding.needs_onboarding);
        return Ok(ExchangeOutcome::NeedsOnboarding {
            pending_token: onboarding.pending_token,
            prefill: onboarding.prefill,
            return_to: onboarding.return_to,
        });
    }

    let tokens: TokenResponse = serde_json::from_value(body)
        .map_err(|e| Error::InvalidResponse(format!("token response: {e}")))?;
    Ok(ExchangeOutcome::Tokens(tokens))
}
