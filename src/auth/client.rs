use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::error::SessionError;

use super::token::RefreshCredential;

/// Result of a successful refresh exchange.
#[derive(Debug, Clone)]
pub struct RefreshGrant {
    pub access_token: String,
    /// Present when the identity provider rotates refresh credentials.
    pub refresh_credential: Option<RefreshCredential>,
    /// Claims returned alongside the token, merged over the decoded ones.
    pub claims: serde_json::Map<String, serde_json::Value>,
}

/// Identity-provider endpoints the session manager calls.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Exchange a refresh credential for a new access token.
    async fn refresh(&self, credential: &RefreshCredential) -> Result<RefreshGrant, SessionError>;

    /// Invalidate a refresh credential remotely.
    async fn revoke(&self, credential: &RefreshCredential) -> Result<(), SessionError>;
}

/// JSON-over-HTTP identity client.
///
/// # Example
/// ```no_run
/// use tenure::auth::HttpIdentityClient;
///
/// let client = HttpIdentityClient::new("https://api.example.com/auth/refresh", "https://api.example.com/auth/logout");
/// ```
#[derive(Debug, Clone)]
pub struct HttpIdentityClient {
    client: reqwest::Client,
    refresh_url: String,
    logout_url: String,
    timeout: Duration,
}

impl HttpIdentityClient {
    pub fn new(refresh_url: impl Into<String>, logout_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            refresh_url: refresh_url.into(),
            logout_url: logout_url.into(),
            timeout: Duration::from_secs(crate::config::DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.refresh_url.clone(), config.logout_url.clone())
            .with_timeout(config.request_timeout())
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn post(
        &self,
        url: &str,
        credential: &RefreshCredential,
    ) -> Result<reqwest::Response, SessionError> {
        self.client
            .post(url)
            .timeout(self.timeout)
            .json(&CredentialRequest {
                refresh_token: credential.expose(),
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SessionError::Timeout(self.timeout.as_millis() as u64)
                } else {
                    SessionError::Network(e.to_string())
                }
            })
    }
}

#[async_trait]
impl IdentityClient for HttpIdentityClient {
    async fn refresh(&self, credential: &RefreshCredential) -> Result<RefreshGrant, SessionError> {
        let resp = self.post(&self.refresh_url, credential).await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SessionError::from_status(status.as_u16(), &body));
        }
        let payload: RefreshResponse = resp
            .json()
            .await
            .map_err(|e| SessionError::InvalidResponse(format!("refresh response: {e}")))?;
        if payload.access_token.trim().is_empty() {
            return Err(SessionError::InvalidResponse(
                "refresh response carried an empty access token".to_string(),
            ));
        }
        Ok(RefreshGrant {
            access_token: payload.access_token,
            refresh_credential: payload
                .refresh_token
                .filter(|value| !value.trim().is_empty())
                .map(RefreshCredential::new),
            claims: payload.claims.unwrap_or_default(),
        })
    }

    async fn revoke(&self, credential: &RefreshCredential) -> Result<(), SessionError> {
        let resp = self.post(&self.logout_url, credential).await?;
        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|secs| secs * 1000);
            return Err(SessionError::RateLimited { retry_after_ms });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SessionError::from_status(status.as_u16(), &body));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CredentialRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    claims: Option<serde_json::Map<String, serde_json::Value>>,
}
