//! Single-flight, cooldown-guarded access token renewal.

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::auth::{IdentityClient, RefreshCredential, Session, TokenCodec};
use crate::error::SessionError;
use crate::util::timeout::with_timeout;

use super::logout::LogoutCoordinator;
use super::state::{lock, CooldownMarker, SessionCell};

type RefreshFuture = Shared<BoxFuture<'static, Option<String>>>;

/// The one outstanding renewal, joined by every concurrent caller.
struct InFlightRefresh {
    future: RefreshFuture,
    started_at: DateTime<Utc>,
}

#[derive(Default)]
struct FlightSlot {
    in_flight: Option<InFlightRefresh>,
    marker: CooldownMarker,
}

/// Coordinates access token renewal.
///
/// At most one refresh call is outstanding at a time; callers arriving while
/// it runs await the same result. A new attempt inside the cooldown window of
/// the previous one resolves to `None` without touching the network. A failed
/// refresh forces a logout through the [`LogoutCoordinator`] handler slot. The
/// local session is gone before waiters resolve; remote invalidation runs in
/// the background.
pub struct RefreshCoordinator {
    cell: Arc<SessionCell>,
    codec: Arc<dyn TokenCodec>,
    client: Arc<dyn IdentityClient>,
    logout: Arc<LogoutCoordinator>,
    renewal_threshold: Duration,
    cooldown: Duration,
    request_timeout: StdDuration,
    slot: Mutex<FlightSlot>,
}

impl RefreshCoordinator {
    pub(crate) fn new(
        cell: Arc<SessionCell>,
        codec: Arc<dyn TokenCodec>,
        client: Arc<dyn IdentityClient>,
        logout: Arc<LogoutCoordinator>,
        renewal_threshold: Duration,
        cooldown: Duration,
        request_timeout: StdDuration,
    ) -> Self {
        Self {
            cell,
            codec,
            client,
            logout,
            renewal_threshold,
            cooldown,
            request_timeout,
            slot: Mutex::new(FlightSlot::default()),
        }
    }

    pub fn renewal_threshold(&self) -> Duration {
        self.renewal_threshold
    }

    /// Whether a renewal call is outstanding.
    pub fn is_refreshing(&self) -> bool {
        lock(&self.slot).in_flight.is_some()
    }

    /// When the outstanding renewal started, if there is one.
    pub fn in_flight_since(&self) -> Option<DateTime<Utc>> {
        lock(&self.slot).in_flight.as_ref().map(|f| f.started_at)
    }

    /// Return a token valid beyond the renewal threshold, renewing if needed.
    ///
    /// Resolves to `None` when there is no session, when renewal is cooling
    /// down, or when renewal failed (in which case the session is gone).
    pub async fn ensure_fresh(self: &Arc<Self>, now: DateTime<Utc>) -> Option<String> {
        let session = self.cell.current().session().cloned()?;
        self.ensure_fresh_from(&session, now).await
    }

    /// [`ensure_fresh`](Self::ensure_fresh) starting from an explicit session,
    /// used before any state has been published.
    pub async fn ensure_fresh_from(
        self: &Arc<Self>,
        session: &Session,
        now: DateTime<Utc>,
    ) -> Option<String> {
        if !session.needs_renewal(now, self.renewal_threshold) {
            return Some(session.access_token.clone());
        }
        let flight = self.join_or_start(session, now)?;
        flight.await
    }

    fn join_or_start(self: &Arc<Self>, session: &Session, now: DateTime<Utc>) -> Option<RefreshFuture> {
        let mut slot = lock(&self.slot);
        if let Some(in_flight) = &slot.in_flight {
            debug!(started_at = %in_flight.started_at, "joining in-flight refresh");
            return Some(in_flight.future.clone());
        }
        if let Some(elapsed) = slot.marker.elapsed(now) {
            if elapsed < self.cooldown {
                debug!(
                    elapsed_ms = elapsed.num_milliseconds(),
                    "refresh denied inside cooldown window"
                );
                return None;
            }
        }
        slot.marker.record(now);

        let generation = self.cell.generation();
        debug!(generation, subject_id = %session.subject_id, "starting refresh");
        let this = Arc::clone(self);
        let previous = session.clone();
        // Spawned so the renewal settles even if every waiter is dropped.
        let handle = tokio::spawn(async move { this.run(generation, previous).await });
        let future = async move {
            handle.await.unwrap_or_else(|err| {
                warn!(error = %err, "refresh task did not complete");
                None
            })
        }
        .boxed()
        .shared();
        slot.in_flight = Some(InFlightRefresh {
            future: future.clone(),
            started_at: now,
        });
        Some(future)
    }

    async fn run(self: Arc<Self>, generation: u64, previous: Session) -> Option<String> {
        let _flight = FlightGuard(&self.slot);
        match self.exchange(&previous).await {
            Ok((session, rotated)) => {
                let token = session.access_token.clone();
                let subject_id = session.subject_id.clone();
                let expires_at = session.expires_at();
                if self.cell.apply_refresh(generation, session, rotated.as_ref()) {
                    info!(generation, %subject_id, %expires_at, "session refreshed");
                    Some(token)
                } else {
                    self.cell.current().access_token()
                }
            }
            Err(err) => {
                warn!(
                    generation,
                    error = %err,
                    category = %err.category(),
                    retryable = err.is_retryable(),
                    "refresh failed"
                );
                if !self.logout.request_logout(generation) {
                    debug!(generation, "session changed during failed refresh; not logging out");
                }
                None
            }
        }
    }

    async fn exchange(
        &self,
        previous: &Session,
    ) -> Result<(Session, Option<RefreshCredential>), SessionError> {
        let credential = self
            .cell
            .credential()?
            .filter(|c| !c.is_empty())
            .ok_or(SessionError::MissingCredential)?;
        let grant = with_timeout(self.request_timeout, self.client.refresh(&credential)).await?;

        let mut claims = self.codec.decode(&grant.access_token)?;
        let mut extra = previous.claims.extra.clone();
        extra.extend(std::mem::take(&mut claims.extra));
        extra.extend(grant.claims);
        claims.extra = extra;

        Ok((Session::new(grant.access_token, claims), grant.refresh_credential))
    }
}

/// Empties the in-flight slot when the renewal task finishes, panics included.
struct FlightGuard<'a>(&'a Mutex<FlightSlot>);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        lock(self.0).in_flight = None;
    }
}
