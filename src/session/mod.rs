//! Session lifecycle: canonical state, refresh and logout coordination, and
//! request authorization.

pub mod authenticator;
pub mod controller;
pub mod logout;
pub mod refresh;
pub mod state;

pub use authenticator::RequestAuthenticator;
pub use controller::{SessionController, SessionControllerBuilder};
pub use logout::{LogoutCoordinator, LogoutHandler, RemoteLogout};
pub use refresh::RefreshCoordinator;
pub use state::{CooldownMarker, SessionState};
