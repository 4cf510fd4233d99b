//! Collaborators of the session manager: token decoding, storage, and the
//! identity-provider client.

pub mod client;
pub mod codec;
pub mod store;
pub mod token;

pub use client::{HttpIdentityClient, IdentityClient, RefreshGrant};
pub use codec::{JwtCodec, TokenCodec};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore, SessionStoreConfig};
pub use token::{Claims, RefreshCredential, Session};
