#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tenure::auth::codec::encode_unsigned;
use tenure::auth::{
    JwtCodec, MemorySessionStore, RefreshCredential, Session, SessionStore, TokenCodec,
};
use tenure::config::SessionConfig;
use tenure::error::SessionError;
use tenure::session::{RefreshCoordinator, SessionController};
use tenure::util::clock::ManualClock;

pub const REFRESH_PATH: &str = "/api/auth/refresh";
pub const LOGOUT_PATH: &str = "/api/auth/logout";

/// Memory store that counts how often the session was cleared.
#[derive(Default)]
pub struct CountingStore {
    inner: MemorySessionStore,
    session_clears: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_clears(&self) -> usize {
        self.session_clears.load(Ordering::SeqCst)
    }

    pub fn seed(&self, session: &Session, credential: &str) {
        self.inner.save_session(session).expect("seed session");
        self.inner
            .save_credential(&RefreshCredential::new(credential))
            .expect("seed credential");
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.load_session().expect("load session")
    }

    pub fn credential(&self) -> Option<String> {
        self.inner
            .load_credential()
            .expect("load credential")
            .map(|c| c.expose().to_string())
    }
}

impl SessionStore for CountingStore {
    fn load_session(&self) -> Result<Option<Session>, SessionError> {
        self.inner.load_session()
    }

    fn save_session(&self, session: &Session) -> Result<(), SessionError> {
        self.inner.save_session(session)
    }

    fn clear_session(&self) -> Result<(), SessionError> {
        self.session_clears.fetch_add(1, Ordering::SeqCst);
        self.inner.clear_session()
    }

    fn load_credential(&self) -> Result<Option<RefreshCredential>, SessionError> {
        self.inner.load_credential()
    }

    fn save_credential(&self, credential: &RefreshCredential) -> Result<(), SessionError> {
        self.inner.save_credential(credential)
    }

    fn clear_credential(&self) -> Result<(), SessionError> {
        self.inner.clear_credential()
    }
}

/// A fixed instant with whole seconds, so claims survive epoch-second encoding.
pub fn fixed_now() -> DateTime<Utc> {
    DateTime::from_timestamp(Utc::now().timestamp(), 0).expect("valid timestamp")
}

pub fn jwt(subject: &str, expires_at: DateTime<Utc>) -> String {
    encode_unsigned(&json!({ "sub": subject, "exp": expires_at.timestamp() }))
}

pub fn session_expiring_in(now: DateTime<Utc>, secs: i64) -> Session {
    let token = jwt("learner-1", now + Duration::seconds(secs));
    let claims = JwtCodec.decode(&token).expect("fixture token decodes");
    Session::new(token, claims)
}

pub struct Harness {
    pub server: MockServer,
    pub store: Arc<CountingStore>,
    pub clock: Arc<ManualClock>,
    pub now: DateTime<Utc>,
    pub controller: SessionController,
}

impl Harness {
    pub async fn start() -> Self {
        Self::with_config(|config| config).await
    }

    pub async fn with_config(adjust: impl FnOnce(SessionConfig) -> SessionConfig) -> Self {
        let server = MockServer::start().await;
        let store = Arc::new(CountingStore::new());
        let now = fixed_now();
        let clock = Arc::new(ManualClock::new(now));
        let config = adjust(SessionConfig::default().with_api_base(&server.uri()));
        let controller = SessionController::builder(config)
            .store(store.clone())
            .clock(clock.clone())
            .build();
        Self {
            server,
            store,
            clock,
            now,
            controller,
        }
    }

    pub fn refresher(&self) -> Arc<RefreshCoordinator> {
        self.controller.refresher()
    }

    /// Log in with a token expiring `secs` from the harness clock.
    pub fn login_expiring_in(&self, secs: i64) -> String {
        let token = jwt("learner-1", self.now + Duration::seconds(secs));
        assert!(self
            .controller
            .login(&token, "refresh-1", serde_json::Map::new()));
        token
    }

    pub fn url(&self, path: &str) -> reqwest::Url {
        format!("{}{path}", self.server.uri())
            .parse()
            .expect("valid url")
    }

    pub async fn mount_refresh_success(&self, access_token: &str, delay_ms: u64, expected: u64) {
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "accessToken": access_token }))
                    .set_delay(StdDuration::from_millis(delay_ms)),
            )
            .expect(expected)
            .mount(&self.server)
            .await;
    }

    pub async fn mount_refresh_failure(&self, status: u16, delay_ms: u64, expected: u64) {
        Mock::given(method("POST"))
            .and(path(REFRESH_PATH))
            .respond_with(
                ResponseTemplate::new(status)
                    .set_body_string("refresh rejected")
                    .set_delay(StdDuration::from_millis(delay_ms)),
            )
            .expect(expected)
            .mount(&self.server)
            .await;
    }

    pub async fn mount_logout(&self, status: u16, expected: u64) {
        Mock::given(method("POST"))
            .and(path(LOGOUT_PATH))
            .respond_with(ResponseTemplate::new(status))
            .expect(expected)
            .mount(&self.server)
            .await;
    }

    /// Wait until the mock server has seen `count` requests to `path`.
    pub async fn until_received(&self, path: &str, count: usize) {
        for _ in 0..200 {
            let seen = self
                .server
                .received_requests()
                .await
                .unwrap_or_default()
                .iter()
                .filter(|request| request.url.path() == path)
                .count();
            if seen >= count {
                return;
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
        panic!("expected {count} requests to {path}");
    }

    /// Wait until a refresh call is outstanding.
    pub async fn until_refreshing(&self) {
        let refresher = self.refresher();
        for _ in 0..200 {
            if refresher.is_refreshing() {
                return;
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
        panic!("refresh never started");
    }
}
