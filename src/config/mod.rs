//! Session manager configuration (layered: code > env > config file > defaults).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use bon::Builder;
use chrono::Duration;
use reqwest::Url;
use serde::Deserialize;

use crate::error::SessionError;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_LOGIN_PATH: &str = "/api/auth/login";
pub const DEFAULT_REFRESH_PATH: &str = "/api/auth/refresh";
pub const DEFAULT_LOGOUT_PATH: &str = "/api/auth/logout";
pub const DEFAULT_RENEWAL_THRESHOLD_SECS: u64 = 300;
pub const DEFAULT_REFRESH_COOLDOWN_SECS: u64 = 10;
pub const DEFAULT_LOGOUT_COOLDOWN_SECS: u64 = 10;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Tunables and endpoints for the session manager.
///
/// # Example
/// ```
/// use tenure::config::SessionConfig;
///
/// let config = SessionConfig::builder()
///     .refresh_url("https://api.example.com/auth/refresh".to_string())
///     .logout_url("https://api.example.com/auth/logout".to_string())
///     .refresh_cooldown_secs(30)
///     .build();
/// assert_eq!(config.renewal_threshold_secs, 300);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Builder, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    #[builder(default = default_url(DEFAULT_LOGIN_PATH))]
    pub login_url: String,
    #[builder(default = default_url(DEFAULT_REFRESH_PATH))]
    pub refresh_url: String,
    #[builder(default = default_url(DEFAULT_LOGOUT_PATH))]
    pub logout_url: String,
    /// Directory for the file-backed store; `None` means `~/.tenure`.
    pub store_dir: Option<PathBuf>,
    #[builder(default = DEFAULT_RENEWAL_THRESHOLD_SECS)]
    pub renewal_threshold_secs: u64,
    #[builder(default = DEFAULT_REFRESH_COOLDOWN_SECS)]
    pub refresh_cooldown_secs: u64,
    #[builder(default = DEFAULT_LOGOUT_COOLDOWN_SECS)]
    pub logout_cooldown_secs: u64,
    #[builder(default = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub request_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SessionConfig {
    /// Point every endpoint at `base_url` using the default paths.
    pub fn with_api_base(mut self, base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        self.login_url = format!("{base}{DEFAULT_LOGIN_PATH}");
        self.refresh_url = format!("{base}{DEFAULT_REFRESH_PATH}");
        self.logout_url = format!("{base}{DEFAULT_LOGOUT_PATH}");
        self
    }

    /// Load from a TOML file. Missing keys fall back to defaults.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            SessionError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `TENURE_*` environment variables (and `.env`).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();

        if let Ok(base) = std::env::var("TENURE_API_BASE_URL") {
            config = config.with_api_base(&base);
        }
        let url_mappings: [(&str, &mut String); 3] = [
            ("TENURE_LOGIN_URL", &mut config.login_url),
            ("TENURE_REFRESH_URL", &mut config.refresh_url),
            ("TENURE_LOGOUT_URL", &mut config.logout_url),
        ];
        for (env_var, slot) in url_mappings {
            if let Ok(url) = std::env::var(env_var) {
                *slot = url;
            }
        }
        if let Some(dir) = std::env::var_os("TENURE_STORE_DIR") {
            config.store_dir = Some(PathBuf::from(dir));
        }

        let secs_mappings: [(&str, &mut u64); 4] = [
            (
                "TENURE_RENEWAL_THRESHOLD_SECS",
                &mut config.renewal_threshold_secs,
            ),
            (
                "TENURE_REFRESH_COOLDOWN_SECS",
                &mut config.refresh_cooldown_secs,
            ),
            (
                "TENURE_LOGOUT_COOLDOWN_SECS",
                &mut config.logout_cooldown_secs,
            ),
            (
                "TENURE_REQUEST_TIMEOUT_SECS",
                &mut config.request_timeout_secs,
            ),
        ];
        for (env_var, slot) in secs_mappings {
            let Ok(raw) = std::env::var(env_var) else {
                continue;
            };
            match raw.trim().parse::<u64>() {
                Ok(value) => *slot = value,
                Err(e) => tracing::warn!(env_var, value = %raw, error = %e, "ignoring invalid setting"),
            }
        }

        config
    }

    /// Check that every endpoint is an absolute http(s) URL.
    pub fn validate(&self) -> Result<(), SessionError> {
        for (name, url) in [
            ("login_url", &self.login_url),
            ("refresh_url", &self.refresh_url),
            ("logout_url", &self.logout_url),
        ] {
            let parsed = Url::parse(url)
                .map_err(|e| SessionError::Configuration(format!("{name} {url:?}: {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(SessionError::Configuration(format!(
                    "{name} must be http(s), got {url:?}"
                )));
            }
        }
        if self.request_timeout_secs == 0 {
            return Err(SessionError::Configuration(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn renewal_threshold(&self) -> Duration {
        Duration::seconds(self.renewal_threshold_secs as i64)
    }

    pub fn refresh_cooldown(&self) -> Duration {
        Duration::seconds(self.refresh_cooldown_secs as i64)
    }

    pub fn logout_cooldown(&self) -> Duration {
        Duration::seconds(self.logout_cooldown_secs as i64)
    }

    pub fn request_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.request_timeout_secs)
    }

    /// URL paths of the identity endpoints; requests to these skip authorization.
    pub fn identity_paths(&self) -> Vec<String> {
        [&self.login_url, &self.refresh_url, &self.logout_url]
            .into_iter()
            .filter_map(|url| Url::parse(url).ok())
            .map(|url| url.path().to_string())
            .collect()
    }
}

fn default_url(path: &str) -> String {
    format!("{DEFAULT_API_BASE_URL}{path}")
}
