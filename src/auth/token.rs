use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::auth::identity::Identity;
use crate::error::CampusError;

/// Backend-issued credential for continued API access.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    value: String,
    /// When this client received the token
    received_at: DateTime<Utc>,
}

impl SessionToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            received_at: Utc::now(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

// Keep token values out of logs
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("len", &self.value.len())
            .field("received_at", &self.received_at)
            .finish()
    }
}

/// Authorization tier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Student,
    Admin,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Student => "student",
            Role::Admin => "admin",
            Role::Other(name) => name,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        let value = value.trim();
        if value.eq_ignore_ascii_case("student") {
            Role::Student
        } else if value.eq_ignore_ascii_case("admin") {
            Role::Admin
        } else {
            Role::Other(value.to_string())
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Role::from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a role was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleSource {
    /// Read from an existing, complete profile
    Confirmed,
    /// Written by this client in a create request
    Created,
    /// Reconciliation failed and the default role was applied
    Defaulted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRole {
    pub role: Role,
    pub source: RoleSource,
}

impl ResolvedRole {
    pub fn confirmed(role: Role) -> Self {
        Self {
            role,
            source: RoleSource::Confirmed,
        }
    }

    pub fn created(role: Role) -> Self {
        Self {
            role,
            source: RoleSource::Created,
        }
    }

    pub fn defaulted(role: Role) -> Self {
        Self {
            role,
            source: RoleSource::Defaulted,
        }
    }

    pub fn is_defaulted(&self) -> bool {
        self.source == RoleSource::Defaulted
    }
}

/// State of the backend session behind the current identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BackendLink {
    Unlinked,
    Linked,
    /// The provider accepted the identity but the backend exchange failed
    Failed { reason: String },
}

/// Recoverable failure recorded during a session transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncIssue {
    /// Proof-of-identity request or token exchange failed
    BackendExchange { uid: String, error: CampusError },
    /// Profile lookup or create failed; the fallback role was applied
    Reconciliation {
        email: String,
        fallback: Role,
        error: CampusError,
    },
    /// Identity carries no email, so no profile could be reconciled
    MissingEmail { uid: String, fallback: Role },
    /// The session token slot could not be written or cleared
    TokenStorage { error: CampusError },
}

impl SyncIssue {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncIssue::BackendExchange { .. } => "backend_exchange",
            SyncIssue::Reconciliation { .. } => "reconciliation",
            SyncIssue::MissingEmail { .. } => "missing_email",
            SyncIssue::TokenStorage { .. } => "token_storage",
        }
    }
}

/// Observable session phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Init,
    Loading,
    SignedOut,
    SignedIn(Role),
    /// Signed in at the provider without a usable backend session
    PartiallySignedIn(Role),
}

/// Process-wide session state: single writer, many readers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub identity: Option<Identity>,
    pub role: Option<ResolvedRole>,
    pub loading: bool,
    pub backend: BackendLink,
    /// Issues recorded by the transition that produced this state
    pub issues: Vec<SyncIssue>,
    /// Session epoch this state was committed under
    pub generation: u64,
    /// Whether the identity observer has been started
    pub started: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            identity: None,
            role: None,
            loading: false,
            backend: BackendLink::Unlinked,
            issues: Vec::new(),
            generation: 0,
            started: false,
        }
    }
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        if self.loading {
            return SessionPhase::Loading;
        }
        match (&self.identity, &self.role) {
            (Some(_), Some(resolved)) => match self.backend {
                BackendLink::Failed { .. } => SessionPhase::PartiallySignedIn(resolved.role.clone()),
                _ => SessionPhase::SignedIn(resolved.role.clone()),
            },
            _ if self.started => SessionPhase::SignedOut,
            _ => SessionPhase::Init,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        self.identity.is_some()
    }

    pub fn role(&self) -> Option<&Role> {
        self.role.as_ref().map(|r| &r.role)
    }

    pub fn email(&self) -> Option<&str> {
        self.identity.as_ref().and_then(|i| i.email.as_deref())
    }

    /// `role` is present exactly when `identity` is
    pub fn is_consistent(&self) -> bool {
        self.identity.is_some() == self.role.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::errors;

    fn signed_in(backend: BackendLink) -> SessionState {
        SessionState {
            identity: Some(Identity::new("uid-1", Some("a@x.com".into()))),
            role: Some(ResolvedRole::confirmed(Role::Admin)),
            backend,
            started: true,
            ..SessionState::default()
        }
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!(Role::from("student"), Role::Student);
        assert_eq!(Role::from(" Admin "), Role::Admin);
        assert_eq!(Role::from("instructor"), Role::Other("instructor".into()));
        let instructor = Role::from(" Instructor ");
        assert_eq!(instructor, Role::Other("Instructor".into()));
        assert_eq!(String::from(instructor), "Instructor");

        let json = serde_json::to_string(&Role::Admin).unwrap();
        assert_eq!(json, "\"admin\"");
        let parsed: Role = serde_json::from_str("\"student\"").unwrap();
        assert_eq!(parsed, Role::Student);
    }

    #[test]
    fn test_phase_derivation() {
        assert_eq!(SessionState::default().phase(), SessionPhase::Init);

        let loading = SessionState {
            loading: true,
            started: true,
            ..SessionState::default()
        };
        assert_eq!(loading.phase(), SessionPhase::Loading);

        let signed_out = SessionState {
            started: true,
            ..SessionState::default()
        };
        assert_eq!(signed_out.phase(), SessionPhase::SignedOut);

        assert_eq!(
            signed_in(BackendLink::Linked).phase(),
            SessionPhase::SignedIn(Role::Admin)
        );
        assert_eq!(
            signed_in(BackendLink::Failed {
                reason: "503".into()
            })
            .phase(),
            SessionPhase::PartiallySignedIn(Role::Admin)
        );
    }

    #[test]
    fn test_token_debug_hides_value() {
        let token = SessionToken::new("secret-jwt");
        let rendered = format!("{:?}", token);
        assert!(!rendered.contains("secret-jwt"));
    }

    #[test]
    fn test_issue_kinds() {
        let issue = SyncIssue::Reconciliation {
            email: "a@x.com".into(),
            fallback: Role::Student,
            error: errors::profile_lookup_failed("a@x.com", "timeout"),
        };
        assert_eq!(issue.kind(), "reconciliation");
    }
}
