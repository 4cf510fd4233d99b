use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Decoded payload of an access token.
///
/// `expires_at` and `subject_id` are the claims the session manager relies on;
/// everything else the token (or the login response) carried lands in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
    pub subject_id: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Claims {
    /// Merge additional claims, overwriting keys already present in `extra`.
    pub fn merge_extra(&mut self, extra: serde_json::Map<String, serde_json::Value>) {
        self.extra.extend(extra);
    }
}

/// An authenticated session: the bearer token plus what was decoded from it.
///
/// # Example
/// ```
/// use chrono::{Duration, Utc};
/// use tenure::auth::{Claims, Session};
///
/// let session = Session::new(
///     "header.payload.signature",
///     Claims {
///         expires_at: Utc::now() + Duration::hours(1),
///         subject_id: "learner-42".to_string(),
///         extra: Default::default(),
///     },
/// );
/// assert!(!session.needs_renewal(Utc::now(), Duration::seconds(300)));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub subject_id: String,
    pub claims: Claims,
}

impl Session {
    pub fn new(access_token: impl Into<String>, claims: Claims) -> Self {
        Self {
            access_token: access_token.into(),
            subject_id: claims.subject_id.clone(),
            claims,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.claims.expires_at
    }

    /// Time left before expiry; negative once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.claims.expires_at - now
    }

    /// True unless more than `threshold` remains before expiry.
    pub fn needs_renewal(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.remaining(now) <= threshold
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.claims.expires_at
    }
}

/// Long-lived secret exchanged for a new access token.
///
/// Never handed to request code; `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefreshCredential(String);

impl RefreshCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for RefreshCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshCredential(..)")
    }
}

impl From<&str> for RefreshCredential {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RefreshCredential {
    fn from(value: String) -> Self {
        Self(value)
    }
}
