//! Client-side session synchronization for the campus learning front end.
//!
//! The [`SessionSynchronizer`] watches an identity provider, exchanges each
//! identity for a backend session token, reconciles the backend profile to a
//! role, and publishes `{identity, role, loading}` to the rest of the client.

pub mod adapters;
pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod events;

#[cfg(test)]
mod tests;

pub use adapters::{FirebaseIdentityProvider, HttpClient, ReqwestHttpClient, RestBackend};
pub use api::CampusApi;
pub use auth::{
    BackendLink, FileTokenStore, Identity, IdentityProvider, MemoryTokenStore, OAuthCredential,
    ProfileUpdate, ResolvedRole, Role, RoleSource, SessionBackend, SessionGuard, SessionHandle,
    SessionPhase, SessionState, SessionSynchronizer, SessionToken, SyncIssue, TokenStore,
};
pub use config::{IdentityConfig, ProfileEndpoint, SessionConfig};
pub use error::{CampusError, CampusResult, ErrorCategory, ErrorCode, ErrorSeverity};
pub use events::{EventStream, SessionEvent, Subscriber};
