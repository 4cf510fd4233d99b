//! Public session surface: login, logout, initialize, current state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::auth::{
    FileSessionStore, HttpIdentityClient, IdentityClient, JwtCodec, RefreshCredential, Session,
    SessionStore, SessionStoreConfig, TokenCodec,
};
use crate::config::SessionConfig;
use crate::util::clock::{Clock, SystemClock};

use super::authenticator::RequestAuthenticator;
use super::logout::{LogoutCoordinator, RemoteLogout};
use super::refresh::RefreshCoordinator;
use super::state::{SessionCell, SessionState};

/// Owns canonical session state and wires the coordinators together.
///
/// Cloning is cheap; clones share the same session.
///
/// # Example
/// ```no_run
/// use tenure::config::SessionConfig;
/// use tenure::session::SessionController;
///
/// # async fn example() {
/// let controller = SessionController::new(SessionConfig::from_env());
/// controller.initialize().await;
/// if controller.current_session().is_authenticated() {
///     let request = reqwest::Request::new(
///         reqwest::Method::GET,
///         "https://learn.example.com/api/courses".parse().unwrap(),
///     );
///     let request = controller.authenticator().authorize(request).await;
///     # let _ = request;
/// }
/// # }
/// ```
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    cell: Arc<SessionCell>,
    codec: Arc<dyn TokenCodec>,
    clock: Arc<dyn Clock>,
    refresh: Arc<RefreshCoordinator>,
    logout: Arc<LogoutCoordinator>,
    authenticator: RequestAuthenticator,
    initialize_started: AtomicBool,
}

/// Builder for [`SessionController`]; unset collaborators use the defaults
/// derived from the config.
pub struct SessionControllerBuilder {
    config: SessionConfig,
    codec: Option<Arc<dyn TokenCodec>>,
    store: Option<Arc<dyn SessionStore>>,
    client: Option<Arc<dyn IdentityClient>>,
    clock: Option<Arc<dyn Clock>>,
}

impl SessionControllerBuilder {
    pub fn codec(mut self, codec: Arc<dyn TokenCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn client(mut self, client: Arc<dyn IdentityClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> SessionController {
        let config = self.config;
        let codec = self.codec.unwrap_or_else(|| Arc::new(JwtCodec));
        let store = self.store.unwrap_or_else(|| {
            let base_dir = config
                .store_dir
                .clone()
                .unwrap_or_else(SessionStoreConfig::default_dir);
            Arc::new(FileSessionStore::new(SessionStoreConfig::new(base_dir)))
        });
        let client = self
            .client
            .unwrap_or_else(|| Arc::new(HttpIdentityClient::from_config(&config)));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let cell = Arc::new(SessionCell::new(store));
        let logout = Arc::new(LogoutCoordinator::new(
            Arc::clone(&client),
            Arc::clone(&clock),
            config.logout_cooldown(),
            config.request_timeout(),
        ));
        let refresh = Arc::new(RefreshCoordinator::new(
            Arc::clone(&cell),
            Arc::clone(&codec),
            client,
            Arc::clone(&logout),
            config.renewal_threshold(),
            config.refresh_cooldown(),
            config.request_timeout(),
        ));
        let authenticator = RequestAuthenticator::new(
            Arc::clone(&cell),
            Arc::clone(&refresh),
            Arc::clone(&clock),
            config.identity_paths(),
        );

        let inner = Arc::new(ControllerInner {
            cell,
            codec,
            clock,
            refresh,
            logout,
            authenticator,
            initialize_started: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        inner.logout.register(Arc::new(move |generation| {
            let Some(inner) = weak.upgrade() else {
                return false;
            };
            let Some(credential) = inner.cell.clear_if(generation) else {
                return false;
            };
            info!(generation, "session ended after failed refresh");
            let logout = Arc::clone(&inner.logout);
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        logout.invalidate_remote(credential).await;
                    });
                }
                Err(_) => warn!(generation, "no runtime for remote logout; skipping it"),
            }
            true
        }));

        SessionController { inner }
    }
}

impl SessionController {
    /// Controller with the default JWT codec, file store, and HTTP client.
    pub fn new(config: SessionConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: SessionConfig) -> SessionControllerBuilder {
        SessionControllerBuilder {
            config,
            codec: None,
            store: None,
            client: None,
            clock: None,
        }
    }

    /// Start a session from a freshly issued token pair.
    ///
    /// Returns `false`, leaving state untouched, when the token does not decode
    /// or cannot be persisted.
    pub fn login(
        &self,
        access_token: &str,
        refresh_credential: impl Into<RefreshCredential>,
        extra_claims: serde_json::Map<String, serde_json::Value>,
    ) -> bool {
        let mut claims = match self.inner.codec.decode(access_token) {
            Ok(claims) => claims,
            Err(err) => {
                warn!(error = %err, "login rejected: access token does not decode");
                return false;
            }
        };
        claims.merge_extra(extra_claims);
        let session = Session::new(access_token, claims);
        let subject_id = session.subject_id.clone();

        match self.inner.cell.establish(session, &refresh_credential.into()) {
            Ok(generation) => {
                info!(generation, %subject_id, "logged in");
                true
            }
            Err(err) => {
                warn!(error = %err, %subject_id, "login failed: session could not be persisted");
                false
            }
        }
    }

    /// End the session. Local state is always cleared first; the remote
    /// invalidation that follows is best-effort.
    pub async fn logout(&self) -> RemoteLogout {
        let credential = self.inner.cell.clear();
        info!(generation = self.inner.cell.generation(), "logged out");
        self.inner.logout.invalidate_remote(credential).await
    }

    /// Settle the startup state from storage. Later calls wait for the first.
    ///
    /// The work runs on its own task, so dropping the returned future does not
    /// leave the controller stuck uninitialized.
    pub async fn initialize(&self) {
        if !self.inner.initialize_started.swap(true, Ordering::SeqCst) {
            let controller = self.clone();
            tokio::spawn(async move { controller.restore().await });
        }
        self.wait_initialized().await;
    }

    async fn restore(&self) {
        let cell = &self.inner.cell;
        let persisted = match cell.load_persisted() {
            Ok(Some(session)) => session,
            Ok(None) => {
                debug!("no persisted session");
                cell.settle_unauthenticated();
                return;
            }
            Err(err) => {
                warn!(error = %err, "persisted session is unreadable; clearing it");
                self.logout().await;
                return;
            }
        };
        if let Err(err) = self.inner.codec.decode(&persisted.access_token) {
            warn!(error = %err, "persisted access token is corrupt; clearing session");
            self.logout().await;
            return;
        }

        let generation = cell.generation();
        let now = self.inner.clock.now();
        if !persisted.needs_renewal(now, self.inner.refresh.renewal_threshold()) {
            if cell.adopt(generation, persisted) {
                info!("restored persisted session");
            }
            return;
        }

        debug!(expires_at = %persisted.expires_at(), "persisted session near expiry; refreshing");
        self.inner.refresh.ensure_fresh_from(&persisted, now).await;

        // Success or a failure cascade has already settled the state. Anything
        // else (cooldown, superseded result) falls back on the stored session.
        if !cell.current().is_initialized() {
            if persisted.is_expired(self.inner.clock.now()) {
                self.logout().await;
            } else if cell.adopt(generation, persisted) {
                info!("restored persisted session without refreshing");
            } else {
                cell.settle_unauthenticated();
            }
        }
    }

    /// Resolve once `initialize()` has settled the state.
    pub async fn wait_initialized(&self) {
        let mut rx = self.inner.cell.subscribe();
        let _ = rx.wait_for(SessionState::is_initialized).await;
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.cell.current().is_initialized()
    }

    /// Canonical state right now.
    pub fn current_session(&self) -> SessionState {
        self.inner.cell.current()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.cell.subscribe()
    }

    pub fn authenticator(&self) -> RequestAuthenticator {
        self.inner.authenticator.clone()
    }

    pub fn refresher(&self) -> Arc<RefreshCoordinator> {
        Arc::clone(&self.inner.refresh)
    }

    pub fn logout_coordinator(&self) -> Arc<LogoutCoordinator> {
        Arc::clone(&self.inner.logout)
    }
}
