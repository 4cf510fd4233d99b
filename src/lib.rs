//! Tenure: bearer session manager.
//!
//! Keeps an access token valid for the lifetime of an application: restores
//! a persisted session at startup, renews the token before it expires, and
//! makes sure that many callers noticing an expiring token at once share a
//! single refresh call. A failed refresh ends the session.
//!
//! # Quick Start
//!
//! ```no_run
//! use tenure::prelude::*;
//!
//! # async fn example() {
//! let controller = SessionController::new(SessionConfig::from_env());
//! controller.initialize().await;
//!
//! if !controller.current_session().is_authenticated() {
//!     let ok = controller.login("<access token>", "<refresh credential>", Default::default());
//!     assert!(ok);
//! }
//!
//! let client = reqwest::Client::new();
//! let request = client
//!     .get("http://localhost:8000/api/courses")
//!     .build()
//!     .expect("valid request");
//! let response = controller.authenticator().execute(&client, request).await;
//! # let _ = response;
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod prelude;
pub mod session;
pub mod util;
