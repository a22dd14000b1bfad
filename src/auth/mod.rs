pub mod epoch;
pub mod identity;
pub mod profile;
pub mod reconcile;
pub mod service;
pub mod storage;
pub mod token;

pub use identity::{Identity, IdentityFeed, IdentityProvider, IdentitySubscription, OAuthCredential, ProfileUpdate};
pub use profile::{NewProfile, SessionBackend, UserProfile};
pub use reconcile::{Reconciler, SyncReport};
pub use service::{SessionGuard, SessionHandle, SessionSynchronizer};
pub use storage::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use token::{
    BackendLink, ResolvedRole, Role, RoleSource, SessionPhase, SessionState, SessionToken,
    SyncIssue,
};
