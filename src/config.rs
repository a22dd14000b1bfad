use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::error::{errors, CampusResult};

// Default configuration values
const DEFAULT_API_BASE: &str = "http://localhost:5000";
const DEFAULT_IDENTITY_ENDPOINT: &str = "https://identitytoolkit.googleapis.com/v1";
const DEFAULT_TOKEN_SLOT: &str = "access-token";
const DEFAULT_ROLE: &str = "student";
const DEFAULT_PLACEHOLDER_NAME: &str = "New User";

/// Main configuration for the session synchronizer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Base URL of the campus REST backend
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Identity provider settings
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Name of the client-storage slot holding the session token
    #[serde(default = "default_token_slot")]
    pub token_slot: String,
    /// Optional JSON file backing the token slot (memory only when absent)
    #[serde(default = "default_token_store_path")]
    pub token_store_path: Option<PathBuf>,
    /// Role assigned when a profile has none, or reconciliation fails
    #[serde(default = "default_role")]
    pub default_role: String,
    /// Display name used when neither the identity nor the profile has one
    #[serde(default = "default_placeholder_name")]
    pub placeholder_name: String,
    /// Endpoint the reconciler writes new profiles to
    #[serde(default)]
    pub profile_endpoint: ProfileEndpoint,
}

/// Identity provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// API key sent with every identity request
    #[serde(default = "default_identity_api_key")]
    pub api_key: Option<String>,
    /// Base URL of the identity REST API
    #[serde(default = "default_identity_endpoint")]
    pub endpoint: String,
}

/// Backend endpoint used for profile creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileEndpoint {
    /// `POST /users`
    #[default]
    Users,
    /// `POST /api/users/save`
    Save,
}

impl ProfileEndpoint {
    pub fn path(&self) -> &'static str {
        match self {
            ProfileEndpoint::Users => "/users",
            ProfileEndpoint::Save => "/api/users/save",
        }
    }
}

// Default functions
fn default_api_base() -> String {
    std::env::var("CAMPUS_API_URL").unwrap_or_else(|_| DEFAULT_API_BASE.to_string())
}

fn default_identity_api_key() -> Option<String> {
    std::env::var("CAMPUS_IDENTITY_API_KEY").ok()
}

fn default_identity_endpoint() -> String {
    std::env::var("CAMPUS_IDENTITY_ENDPOINT")
        .unwrap_or_else(|_| DEFAULT_IDENTITY_ENDPOINT.to_string())
}

fn default_token_slot() -> String {
    DEFAULT_TOKEN_SLOT.to_string()
}

fn default_token_store_path() -> Option<PathBuf> {
    std::env::var("CAMPUS_TOKEN_STORE").ok().map(PathBuf::from)
}

fn default_role() -> String {
    DEFAULT_ROLE.to_string()
}

fn default_placeholder_name() -> String {
    DEFAULT_PLACEHOLDER_NAME.to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            api_key: default_identity_api_key(),
            endpoint: default_identity_endpoint(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            identity: IdentityConfig::default(),
            token_slot: default_token_slot(),
            token_store_path: default_token_store_path(),
            default_role: default_role(),
            placeholder_name: default_placeholder_name(),
            profile_endpoint: ProfileEndpoint::default(),
        }
    }
}

impl SessionConfig {
    /// Configuration pointing at a specific backend, without consulting the environment
    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            identity: IdentityConfig {
                api_key: None,
                endpoint: DEFAULT_IDENTITY_ENDPOINT.to_string(),
            },
            token_slot: default_token_slot(),
            token_store_path: None,
            default_role: default_role(),
            placeholder_name: default_placeholder_name(),
            profile_endpoint: ProfileEndpoint::default(),
        }
    }

    /// Build the configuration from environment variables
    pub fn from_env() -> CampusResult<Self> {
        let config = Self::default();
        config.validate()?;
        info!(api_base = %config.api_base, "Loaded session configuration from environment");
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub async fn load(path: &Path) -> CampusResult<Self> {
        let raw = fs::read_to_string(path).await?;
        let config: SessionConfig = serde_json::from_str(&raw)
            .map_err(|e| errors::config_invalid(path.display().to_string(), e.to_string()))?;
        config.validate()?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Check the values that every component relies on
    pub fn validate(&self) -> CampusResult<()> {
        if !(self.api_base.starts_with("http://") || self.api_base.starts_with("https://")) {
            return Err(errors::config_invalid(
                "api_base",
                format!("'{}' is not an http(s) URL", self.api_base),
            ));
        }
        if self.token_slot.trim().is_empty() {
            return Err(errors::config_invalid("token_slot", "must not be empty"));
        }
        if self.default_role.trim().is_empty() {
            return Err(errors::config_invalid("default_role", "must not be empty"));
        }
        Ok(())
    }

    /// API key for the identity provider, required by the REST adapter
    pub fn identity_api_key(&self) -> CampusResult<&str> {
        self.identity
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| errors::config_missing("CAMPUS_IDENTITY_API_KEY"))
    }

    /// Join a path onto the backend base URL
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), path)
    }
}
