use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::auth::token::SessionToken;
use crate::error::CampusResult;

/// Backend user record. Every field may be missing on incomplete records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(
        rename = "photoURL",
        alias = "photo",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl UserProfile {
    /// A profile is complete once it carries a non-empty name
    pub fn is_complete(&self) -> bool {
        self.name.as_deref().map_or(false, |n| !n.trim().is_empty())
    }

    /// Stored role, if non-empty
    pub fn role_str(&self) -> Option<&str> {
        self.role.as_deref().filter(|r| !r.trim().is_empty())
    }
}

/// Body of a profile create request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProfile {
    /// Provider uid, carried so the backend can migrate away from email keys
    pub uid: String,
    pub name: String,
    pub email: String,
    pub photo_url: Option<String>,
    pub role: String,
}

/// Backend REST surface consumed by the synchronizer
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Exchange a provider proof-of-identity token for a session token
    async fn exchange_token(&self, id_token: &str) -> CampusResult<SessionToken>;

    /// Look up a profile by email; `None` when the backend has no record
    async fn fetch_profile(&self, email: &str) -> CampusResult<Option<UserProfile>>;

    /// Create (or overwrite) a profile
    async fn create_profile(&self, profile: &NewProfile) -> CampusResult<UserProfile>;
}
