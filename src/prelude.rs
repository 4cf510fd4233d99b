//! Convenience re-exports for common use.

pub use crate::auth::{Claims, RefreshCredential, Session, SessionStore, TokenCodec};
pub use crate::config::SessionConfig;
pub use crate::error::{Result, SessionError};
pub use crate::session::{RequestAuthenticator, SessionController, SessionState};
