use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::DateTime;

use crate::error::SessionError;

use super::token::Claims;

/// Extracts claims from an access token without verifying it.
pub trait TokenCodec: Send + Sync {
    fn decode(&self, access_token: &str) -> Result<Claims, SessionError>;
}

/// Unverified JWT claims reader.
///
/// Reads `exp` (epoch seconds) and `sub` from the payload segment; every other
/// payload key is kept in [`Claims::extra`]. Signatures are never checked, the
/// identity provider stays the authority on validity.
///
/// # Example
/// ```
/// use base64::engine::general_purpose::URL_SAFE_NO_PAD;
/// use base64::Engine;
/// use tenure::auth::{JwtCodec, TokenCodec};
///
/// let payload = URL_SAFE_NO_PAD.encode(r#"{"sub":"learner-42","exp":4102444800}"#);
/// let token = format!("e30.{payload}.sig");
/// let claims = JwtCodec.decode(&token)?;
/// assert_eq!(claims.subject_id, "learner-42");
/// # Ok::<(), tenure::error::SessionError>(())
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JwtCodec;

impl TokenCodec for JwtCodec {
    fn decode(&self, access_token: &str) -> Result<Claims, SessionError> {
        let mut segments = access_token.trim().split('.');
        let payload = match (segments.next(), segments.next(), segments.next()) {
            (Some(_), Some(payload), Some(_)) if segments.next().is_none() => payload,
            _ => {
                return Err(SessionError::Decode(
                    "access token is not a three-segment JWT".to_string(),
                ))
            }
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| SessionError::Decode(format!("payload is not base64url: {e}")))?;
        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| SessionError::Decode(format!("payload is not JSON: {e}")))?;
        let serde_json::Value::Object(mut fields) = value else {
            return Err(SessionError::Decode(
                "payload is not a JSON object".to_string(),
            ));
        };

        let exp = fields
            .remove("exp")
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
            .ok_or_else(|| SessionError::Decode("missing numeric exp claim".to_string()))?;
        let expires_at = DateTime::from_timestamp(exp, 0)
            .ok_or_else(|| SessionError::Decode(format!("exp claim out of range: {exp}")))?;
        let subject_id = match fields.remove("sub") {
            Some(serde_json::Value::String(sub)) if !sub.is_empty() => sub,
            _ => return Err(SessionError::Decode("missing sub claim".to_string())),
        };

        Ok(Claims {
            expires_at,
            subject_id,
            extra: fields,
        })
    }
}

/// Build an unsigned JWT carrying `payload`. Handy for tests and fixtures.
pub fn encode_unsigned(payload: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.")
}
