//! End-to-end concurrency tests over the public API: many callers hitting
//! 401s at once, refresh failure teardown, and logout racing an in-flight
//! refresh call.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use portal_auth::{ExchangeOutcome, OAuthConfig, RefreshResponse, TokenEndpoint};
use portal_session::{
    ApiClient, ApiRequest, ApiResponse, Credential, Error, SessionContext, SessionEndReason,
    SessionEvent, TokenStore, Transport,
};

const FRESH_TOKEN: &str = "at_fresh";

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn test_config() -> Arc<OAuthConfig> {
    Arc::new(OAuthConfig {
        authorize_endpoint: "https://id.example.com/oauth/authorize".into(),
        token_endpoint: "https://id.example.com/oauth/token".into(),
        client_id: "portal-web".into(),
        redirect_uri: "https://app.example.com/auth/callback".into(),
        scopes: "openid profile offline_access".into(),
        access_type: None,
        prompt: None,
        timeout_secs: 30,
    })
}

/// Token endpoint whose refresh call takes a while, so concurrent callers
/// pile up behind the leader.
struct SlowEndpoint {
    refresh_calls: AtomicUsize,
    delay: Duration,
    fail: bool,
}

impl SlowEndpoint {
    fn succeeding(delay: Duration) -> Self {
        Self {
            refresh_calls: AtomicUsize::new(0),
            delay,
            fail: false,
        }
    }

    fn failing(delay: Duration) -> Self {
        Self {
            refresh_calls: AtomicUsize::new(0),
            delay,
            fail: true,
        }
    }
}

impl TokenEndpoint for SlowEndpoint {
    fn exchange<'a>(
        &'a self,
        _code: &'a str,
        _verifier: &'a str,
    ) -> Pin<Box<dyn Future<Output = portal_auth::Result<ExchangeOutcome>> + Send + 'a>> {
        Box::pin(async { panic!("exchange not expected here") })
    }

    fn refresh<'a>(
        &'a self,
        _refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = portal_auth::Result<RefreshResponse>> + Send + 'a>> {
        Box::pin(async move {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                Err(portal_auth::Error::RefreshRejected {
                    status: 401,
                    body: "revoked".into(),
                })
            } else {
                Ok(RefreshResponse {
                    access_token: FRESH_TOKEN.into(),
                    refresh_token: Some("rt_rotated".into()),
                    expires_in: Some(3600),
                })
            }
        })
    }
}

/// Transport that 401s every bearer except the freshly refreshed one.
struct PickyTransport {
    calls: AtomicUsize,
}

impl PickyTransport {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

impl Transport for PickyTransport {
    fn execute<'a>(
        &'a self,
        _request: &'a ApiRequest,
        bearer: &'a str,
    ) -> Pin<Box<dyn Future<Output = portal_session::Result<ApiResponse>> + Send + 'a>> {
        let bearer = bearer.to_owned();
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if bearer == FRESH_TOKEN {
                Ok(ApiResponse {
                    status: 200,
                    body: "{\"ok\":true}".into(),
                })
            } else {
                Ok(ApiResponse {
                    status: 401,
                    body: "{\"error\":\"token_expired\"}".into(),
                })
            }
        })
    }
}

/// Transport that 401s unconditionally.
struct AlwaysUnauthorized {
    calls: AtomicUsize,
}

impl Transport for AlwaysUnauthorized {
    fn execute<'a>(
        &'a self,
        _request: &'a ApiRequest,
        _bearer: &'a str,
    ) -> Pin<Box<dyn Future<Output = portal_session::Result<ApiResponse>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ApiResponse {
                status: 401,
                body: "nope".into(),
            })
        })
    }
}

/// Session with a stored, unexpired credential whose access token the
/// transport will reject.
async fn seeded_session(
    dir: &tempfile::TempDir,
    endpoint: Arc<dyn TokenEndpoint>,
) -> (Arc<SessionContext>, Arc<TokenStore>) {
    let store = Arc::new(
        TokenStore::load(dir.path().join("session.json"))
            .await
            .unwrap(),
    );
    store
        .set(Credential {
            access: "at_stale".into(),
            refresh: "rt_stored".into(),
            expires: now_millis() + 3_600_000,
            subject: Some("user-7".into()),
        })
        .await
        .unwrap();
    let session = Arc::new(SessionContext::new(test_config(), endpoint, store.clone()).unwrap());
    (session, store)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn five_concurrent_401s_trigger_exactly_one_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = Arc::new(SlowEndpoint::succeeding(Duration::from_millis(100)));
    let (session, store) = seeded_session(&dir, endpoint.clone()).await;
    let transport = Arc::new(PickyTransport::new());
    let client = Arc::new(ApiClient::new(session, transport.clone()));

    let mut tasks = Vec::new();
    for i in 0..5 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            client
                .send(ApiRequest::get(format!("https://api.example.com/r/{i}")))
                .await
        }));
    }
    for task in tasks {
        let response = task.await.unwrap().unwrap();
        assert_eq!(response.status, 200);
    }

    assert_eq!(
        endpoint.refresh_calls.load(Ordering::SeqCst),
        1,
        "single-flight: one refresh call for five concurrent 401s"
    );
    // 5 first attempts plus 5 retries with the fresh token
    assert_eq!(transport.calls.load(Ordering::SeqCst), 10);

    let credential = store.get().await.unwrap();
    assert_eq!(credential.access.expose(), FRESH_TOKEN);
    assert_eq!(credential.refresh.expose(), "rt_rotated");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rejected_refresh_fails_all_callers_and_notifies_once() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = Arc::new(SlowEndpoint::failing(Duration::from_millis(100)));
    let (session, store) = seeded_session(&dir, endpoint.clone()).await;
    let mut events = session.subscribe();

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let session = session.clone();
        tasks.push(tokio::spawn(async move { session.refreshed_token().await }));
    }
    for task in tasks {
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::RefreshFailed(_)), "got: {err:?}");
    }

    assert_eq!(endpoint.refresh_calls.load(Ordering::SeqCst), 1);
    assert!(store.get().await.is_none(), "store cleared after rejection");
    assert!(!session.authenticated().await);

    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::Ended(SessionEndReason::RefreshFailed)
    );
    assert!(
        events.try_recv().is_err(),
        "exactly one session-ended event for five callers"
    );
}

#[tokio::test]
async fn second_401_after_refresh_surfaces_unauthorized() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = Arc::new(SlowEndpoint::succeeding(Duration::from_millis(10)));
    let (session, _store) = seeded_session(&dir, endpoint.clone()).await;
    let transport = Arc::new(AlwaysUnauthorized {
        calls: AtomicUsize::new(0),
    });
    let client = ApiClient::new(session, transport.clone());

    let err = client
        .send(ApiRequest::get("https://api.example.com/me"))
        .await
        .unwrap_err();
    assert!(
        matches!(err, Error::Unauthorized { status: 401, .. }),
        "got: {err:?}"
    );
    assert_eq!(
        transport.calls.load(Ordering::SeqCst),
        2,
        "one attempt, one retry, never a third"
    );
    assert_eq!(endpoint.refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn send_without_credential_fails_before_the_wire() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        TokenStore::load(dir.path().join("session.json"))
            .await
            .unwrap(),
    );
    let endpoint: Arc<dyn TokenEndpoint> =
        Arc::new(SlowEndpoint::succeeding(Duration::from_millis(10)));
    let session = Arc::new(SessionContext::new(test_config(), endpoint, store).unwrap());
    let transport = Arc::new(PickyTransport::new());
    let client = ApiClient::new(session, transport.clone());

    let err = client
        .send(ApiRequest::get("https://api.example.com/me"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotAuthenticated));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn logout_during_in_flight_refresh_discards_the_result() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = Arc::new(SlowEndpoint::succeeding(Duration::from_millis(200)));
    let (session, store) = seeded_session(&dir, endpoint.clone()).await;
    let mut events = session.subscribe();

    let refresher = {
        let session = session.clone();
        tokio::spawn(async move { session.refreshed_token().await })
    };
    // Let the leader reach its network call, then pull the rug
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.logout().await;

    let err = refresher.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::SessionEnded), "got: {err:?}");

    // The late success must not resurrect the session
    assert!(store.get().await.is_none());
    assert!(!session.authenticated().await);
    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::Ended(SessionEndReason::UserLogout)
    );
    assert!(events.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_logouts_notify_once() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint: Arc<dyn TokenEndpoint> =
        Arc::new(SlowEndpoint::succeeding(Duration::from_millis(10)));
    let (session, _store) = seeded_session(&dir, endpoint).await;
    let mut events = session.subscribe();

    let mut tasks = Vec::new();
    for _ in 0..3 {
        let session = session.clone();
        tasks.push(tokio::spawn(async move { session.logout().await }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::Ended(SessionEndReason::UserLogout)
    );
    assert!(events.try_recv().is_err(), "one event for three logouts");
}
