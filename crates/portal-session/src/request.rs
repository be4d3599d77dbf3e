//! Authenticated request path
//!
//! `ApiClient` attaches the bearer token to outgoing requests and owns the
//! single-retry policy: a 401 triggers one coordinated refresh and one
//! resend, never more. The transport is a trait seam so tests exercise the
//! retry logic without sockets.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::session::SessionContext;

/// An outgoing API request, independent of any transport.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: reqwest::Method,
    pub url: String,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: reqwest::Method::GET,
            url: url.into(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: reqwest::Method::POST,
            url: url.into(),
            body: Some(body),
        }
    }
}

/// Transport-level response. Status and body only; the client never
/// interprets payloads beyond the status code.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One delivery attempt. Immutable: the retry is a new value with the
/// budget spent, so a request can never be resent twice.
struct Attempt {
    request: ApiRequest,
    attempted: u8,
}

impl Attempt {
    fn first(request: ApiRequest) -> Self {
        Self {
            request,
            attempted: 0,
        }
    }

    fn retry(self) -> Self {
        Self {
            request: self.request,
            attempted: 1,
        }
    }
}

/// Seam between the client and the wire.
pub trait Transport: Send + Sync {
    fn execute<'a>(
        &'a self,
        request: &'a ApiRequest,
        bearer: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + 'a>>;
}

/// Production transport over `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn execute<'a>(
        &'a self,
        request: &'a ApiRequest,
        bearer: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + 'a>> {
        Box::pin(async move {
            let mut builder = self
                .client
                .request(request.method.clone(), &request.url)
                .bearer_auth(bearer);
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }
            let response = builder
                .send()
                .await
                .map_err(|e| Error::Transport(e.to_string()))?;
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|e| Error::Transport(e.to_string()))?;
            Ok(ApiResponse { status, body })
        })
    }
}

/// API client bound to one session. All authenticated traffic goes through
/// `send`, which owns token attachment and the 401 retry.
pub struct ApiClient {
    session: Arc<SessionContext>,
    transport: Arc<dyn Transport>,
}

impl ApiClient {
    pub fn new(session: Arc<SessionContext>, transport: Arc<dyn Transport>) -> Self {
        Self { session, transport }
    }

    /// Send an authenticated request.
    ///
    /// Without a stored credential this fails immediately. On a 401 the
    /// client obtains a fresh token through the refresh coordinator and
    /// resends exactly once; a second 401 surfaces as `Unauthorized`.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let token = self.session.access_token_for_request().await?;

        let attempt = Attempt::first(request);
        let response = self
            .transport
            .execute(&attempt.request, &token)
            .await?;
        if response.status != 401 {
            return Ok(response);
        }

        debug_assert_eq!(attempt.attempted, 0);
        metrics::counter!("session_retry_total").increment(1);
        debug!(url = %attempt.request.url, "401 received, refreshing and retrying once");

        let fresh = self.session.refreshed_token().await?;
        let attempt = attempt.retry();
        let response = self
            .transport
            .execute(&attempt.request, &fresh)
            .await?;
        if response.status == 401 {
            warn!(url = %attempt.request.url, "401 after refresh, giving up");
            return Err(Error::Unauthorized {
                status: response.status,
                body: response.body,
            });
        }
        Ok(response)
    }
}
