//! Error types for tenure.

use strum::Display;
use thiserror::Error;

/// Failure raised by a session collaborator (codec, store, identity client).
///
/// The public session operations never return these; they are absorbed into
/// state transitions and only surface through logs and collaborator traits.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("No refresh credential stored")]
    MissingCredential,

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Rejected (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Broad error category, used to tell transient failures from definitive ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    Credential,
    RateLimit,
    Network,
    Timeout,
    Server,
    Storage,
    Configuration,
    Unknown,
}

impl SessionError {
    /// Build an error from a non-success HTTP status and its body.
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            429 => Self::RateLimited {
                retry_after_ms: None,
            },
            _ => Self::Rejected {
                status,
                message: body.to_string(),
            },
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Decode(_) | Self::MissingCredential => ErrorCategory::Credential,
            Self::RateLimited { .. } => ErrorCategory::RateLimit,
            Self::Network(_) => ErrorCategory::Network,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Rejected { status, .. } => match status {
                400 | 401 | 403 => ErrorCategory::Credential,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Unknown,
            },
            Self::Io(_) | Self::Serialization(_) => ErrorCategory::Storage,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::InvalidResponse(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether this error is potentially transient.
    ///
    /// Refresh failures cascade into logout either way; this only feeds logs.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::RateLimit
                | ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::Server
        )
    }
}

impl From<std::io::Error> for SessionError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::de::Error> for SessionError {
    fn from(error: toml::de::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_credential_statuses_are_not_retryable() {
        for status in [400, 401, 403] {
            let err = SessionError::from_status(status, "invalid_grant");
            assert_eq!(err.category(), ErrorCategory::Credential);
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn server_and_transport_failures_are_retryable() {
        assert!(SessionError::from_status(503, "down").is_retryable());
        assert!(SessionError::Network("reset".into()).is_retryable());
        assert!(SessionError::Timeout(30_000).is_retryable());
    }

    #[test]
    fn too_many_requests_maps_to_rate_limited() {
        let err = SessionError::from_status(429, "");
        assert!(matches!(err, SessionError::RateLimited { .. }));
        assert_eq!(err.category().to_string(), "rate_limit");
    }

    #[test]
    fn missing_credential_is_a_credential_failure() {
        assert_eq!(
            SessionError::MissingCredential.category(),
            ErrorCategory::Credential
        );
    }
}
