//! Remote invalidation and the logout indirection slot.

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::Duration;
use strum::Display;
use tracing::{debug, info, warn};

use crate::auth::{IdentityClient, RefreshCredential};
use crate::error::SessionError;
use crate::util::clock::Clock;
use crate::util::timeout::with_timeout;

use super::state::{lock, CooldownMarker};

/// Forced-logout callback registered by the controller.
///
/// Receives the session generation the caller observed and returns whether
/// that session was ended. It must clear local state before returning and
/// must not wait on the network.
pub type LogoutHandler = Arc<dyn Fn(u64) -> bool + Send + Sync>;

/// What happened to a remote invalidation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RemoteLogout {
    Invalidated,
    /// Nothing to invalidate; the credential was already gone.
    NoCredential,
    /// Another attempt happened inside the cooldown window.
    CoolingDown,
    /// The endpoint answered 429. Not retried.
    RateLimited,
    Failed,
}

/// Best-effort remote logout with a cooldown, plus the handler slot the
/// refresh path uses to force a logout without a reference to the controller.
pub struct LogoutCoordinator {
    client: Arc<dyn IdentityClient>,
    clock: Arc<dyn Clock>,
    cooldown: Duration,
    request_timeout: StdDuration,
    marker: Mutex<CooldownMarker>,
    handler: Mutex<Option<LogoutHandler>>,
}

impl LogoutCoordinator {
    pub(crate) fn new(
        client: Arc<dyn IdentityClient>,
        clock: Arc<dyn Clock>,
        cooldown: Duration,
        request_timeout: StdDuration,
    ) -> Self {
        Self {
            client,
            clock,
            cooldown,
            request_timeout,
            marker: Mutex::new(CooldownMarker::default()),
            handler: Mutex::new(None),
        }
    }

    /// Install the handler invoked by [`request_logout`](Self::request_logout).
    pub fn register(&self, handler: LogoutHandler) {
        *lock(&self.handler) = Some(handler);
    }

    pub fn unregister(&self) {
        *lock(&self.handler) = None;
    }

    pub fn has_handler(&self) -> bool {
        lock(&self.handler).is_some()
    }

    /// End the session of `generation` through the registered handler.
    ///
    /// Returns `false` when no handler is registered or the session has
    /// already moved on.
    pub fn request_logout(&self, generation: u64) -> bool {
        let handler = lock(&self.handler).clone();
        match handler {
            Some(handler) => handler(generation),
            None => {
                warn!(generation, "forced logout requested but no handler is registered");
                false
            }
        }
    }

    /// Invalidate `credential` remotely unless a previous attempt falls inside
    /// the cooldown window. Failures are logged and swallowed.
    pub async fn invalidate_remote(&self, credential: Option<RefreshCredential>) -> RemoteLogout {
        let Some(credential) = credential.filter(|c| !c.is_empty()) else {
            debug!("no refresh credential to invalidate");
            return RemoteLogout::NoCredential;
        };

        let now = self.clock.now();
        {
            let mut marker = lock(&self.marker);
            if let Some(elapsed) = marker.elapsed(now) {
                if elapsed <= self.cooldown {
                    debug!(
                        elapsed_ms = elapsed.num_milliseconds(),
                        "skipping remote logout inside cooldown window"
                    );
                    return RemoteLogout::CoolingDown;
                }
            }
            marker.record(now);
        }

        match with_timeout(self.request_timeout, self.client.revoke(&credential)).await {
            Ok(()) => {
                info!("refresh credential invalidated remotely");
                RemoteLogout::Invalidated
            }
            Err(SessionError::RateLimited { retry_after_ms }) => {
                warn!(?retry_after_ms, "remote logout rate limited; not retrying");
                RemoteLogout::RateLimited
            }
            Err(err) => {
                warn!(error = %err, category = %err.category(), "remote logout failed");
                RemoteLogout::Failed
            }
        }
    }
}
