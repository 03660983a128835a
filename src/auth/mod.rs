//! Session and authorization core
//!
//! Handles:
//! - Permission resolution from roles and capability flags
//! - Session issuance, lookup, expiry and revocation
//! - OAuth state handshakes for the GitHub login redirect
//! - Identity lookup against the user directory
//! - Request guards (attach / require / authorize)

pub mod github;
pub mod identity;
pub mod middleware;
pub mod oauth_state;
pub mod permissions;
pub mod session;

pub use github::{GitHubClient, GitHubUser, IdentityProvider};
pub use identity::{IdentityMatch, UserDirectory, UserRecord};
pub use middleware::{
    CurrentUser, MaybeUser, attach_session, authorize, require_auth, require_permission,
};
pub use oauth_state::{HandshakePayload, OAuthStateStore};
pub use permissions::{
    CapabilityFlags, Permission, PermissionSet, Role, permissions_for_role, permissions_from_flags,
};
pub use session::{
    AuthProvider, DurableSessionStore, InMemorySessionStore, NewSession, Session, SessionKind,
    SessionStore, SessionUser,
};
