//! Bearer header attachment for outgoing requests.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Duration;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Url;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::util::clock::Clock;

use super::refresh::RefreshCoordinator;
use super::state::SessionCell;

/// Attaches the current access token to outgoing requests, renewing it first
/// when it is close to expiry.
///
/// Requests to the identity endpoints themselves are passed through untouched,
/// otherwise a refresh call would try to authorize itself.
#[derive(Clone)]
pub struct RequestAuthenticator {
    cell: Arc<SessionCell>,
    refresh: Arc<RefreshCoordinator>,
    clock: Arc<dyn Clock>,
    renewal_threshold: Duration,
    exempt_paths: BTreeSet<String>,
}

impl RequestAuthenticator {
    pub(crate) fn new(
        cell: Arc<SessionCell>,
        refresh: Arc<RefreshCoordinator>,
        clock: Arc<dyn Clock>,
        exempt_paths: impl IntoIterator<Item = String>,
    ) -> Self {
        let renewal_threshold = refresh.renewal_threshold();
        Self {
            cell,
            refresh,
            clock,
            renewal_threshold,
            exempt_paths: exempt_paths
                .into_iter()
                .map(|p| normalize_path(&p))
                .collect(),
        }
    }

    /// Add another URL path that must never carry the bearer token.
    pub fn with_exempt_path(mut self, path: impl AsRef<str>) -> Self {
        self.exempt_paths.insert(normalize_path(path.as_ref()));
        self
    }

    pub fn is_exempt(&self, url: &Url) -> bool {
        self.exempt_paths.contains(&normalize_path(url.path()))
    }

    /// Return `request` with an `Authorization: Bearer` header, or unchanged
    /// when it is exempt or there is no session.
    pub async fn authorize(&self, mut request: reqwest::Request) -> reqwest::Request {
        if self.is_exempt(request.url()) {
            return request;
        }
        let Some(session) = self.cell.current().session().cloned() else {
            return request;
        };

        let now = self.clock.now();
        let token = if session.needs_renewal(now, self.renewal_threshold) {
            // A cooldown denial leaves the old session in place; the server
            // decides whether it is still acceptable.
            self.refresh
                .ensure_fresh(now)
                .await
                .or_else(|| self.cell.current().access_token())
        } else {
            Some(session.access_token.clone())
        };

        let Some(token) = token else {
            debug!(url = %request.url(), "session ended before request could be authorized");
            return request;
        };
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                request.headers_mut().insert(AUTHORIZATION, value);
            }
            Err(err) => warn!(error = %err, "access token is not a valid header value"),
        }
        request
    }

    /// Authorize `request` and send it.
    pub async fn execute(
        &self,
        client: &reqwest::Client,
        request: reqwest::Request,
    ) -> Result<reqwest::Response, SessionError> {
        let request = self.authorize(request).await;
        client
            .execute(request)
            .await
            .map_err(|e| SessionError::Network(e.to_string()))
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
