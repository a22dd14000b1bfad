//! Shared setup for the integration tests

use std::path::PathBuf;
use std::sync::Arc;

use mockito::{Matcher, Mock, ServerGuard};
use serde_json::json;

use campus_session::{
    FileTokenStore, FirebaseIdentityProvider, IdentityProvider, RestBackend, SessionBackend,
    SessionConfig, SessionSynchronizer, TokenStore,
};

pub const API_KEY: &str = "test-key";

/// Configuration pointing both the backend and the identity provider at `server`
pub fn config_for(server: &ServerGuard) -> SessionConfig {
    let mut config = SessionConfig::with_api_base(server.url());
    config.identity.api_key = Some(API_KEY.to_string());
    config.identity.endpoint = format!("{}/identity", server.url());
    config
}

/// Mock an Identity Toolkit `accounts:*` method
pub fn identity_method(server: &mut ServerGuard, method: &str) -> Mock {
    server
        .mock("POST", format!("/identity/accounts:{}", method).as_str())
        .match_query(Matcher::UrlEncoded("key".into(), API_KEY.into()))
}

/// Account payload as returned by the password and sign-up methods
pub fn account(uid: &str, email: &str, display_name: &str, id_token: &str) -> String {
    json!({
        "localId": uid,
        "email": email,
        "displayName": display_name,
        "idToken": id_token,
        "refreshToken": "refresh",
        "expiresIn": "3600"
    })
    .to_string()
}

/// Unique temp file for a token store
pub fn token_path() -> PathBuf {
    std::env::temp_dir()
        .join("campus-session-it")
        .join(format!("{}.json", uuid::Uuid::new_v4()))
}

/// Synchronizer over the real adapters
pub struct TestEnvironment {
    pub config: SessionConfig,
    pub provider: Arc<FirebaseIdentityProvider>,
    pub tokens: Arc<FileTokenStore>,
    pub sync: SessionSynchronizer,
}

impl TestEnvironment {
    pub fn new(server: &ServerGuard) -> Self {
        let config = config_for(server);
        let provider = Arc::new(FirebaseIdentityProvider::new(&config).unwrap());
        let backend = Arc::new(RestBackend::new(config.clone()));
        let tokens = Arc::new(FileTokenStore::new(token_path()));
        let sync = SessionSynchronizer::new(
            Arc::clone(&provider) as Arc<dyn IdentityProvider>,
            backend as Arc<dyn SessionBackend>,
            Arc::clone(&tokens) as Arc<dyn TokenStore>,
            &config,
        );
        Self {
            config,
            provider,
            tokens,
            sync,
        }
    }

    /// Remove the token file
    pub async fn cleanup(&self) {
        let _ = tokio::fs::remove_file(self.tokens.path()).await;
    }
}
