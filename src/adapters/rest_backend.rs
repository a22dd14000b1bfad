use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::adapters::http_client::{json_headers, HttpClient, ReqwestHttpClient};
use crate::auth::profile::{NewProfile, SessionBackend, UserProfile};
use crate::auth::token::SessionToken;
use crate::config::{ProfileEndpoint, SessionConfig};
use crate::error::{errors, CampusResult};

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    token: Option<String>,
}

/// Build `{base}{path}/{segment}` with the segment percent-encoded
pub(crate) fn url_with_segment(base: &str, segments: &[&str]) -> CampusResult<String> {
    let mut url = Url::parse(base).map_err(|e| errors::config_invalid("api_base", e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| errors::config_invalid("api_base", format!("'{}' cannot carry a path", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url.to_string())
}

/// Session backend over the campus REST API
pub struct RestBackend {
    http_client: Arc<dyn HttpClient>,
    config: SessionConfig,
}

impl RestBackend {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_http_client(config, Arc::new(ReqwestHttpClient::new()))
    }

    /// Create a backend with a custom HTTP client
    pub fn with_http_client(config: SessionConfig, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            config,
        }
    }

    fn create_body(&self, profile: &NewProfile) -> serde_json::Value {
        match self.config.profile_endpoint {
            ProfileEndpoint::Users => json!({
                "uid": profile.uid,
                "name": profile.name,
                "email": profile.email,
                "photoURL": profile.photo_url,
                "role": profile.role,
            }),
            // the save endpoint names the photo field differently
            ProfileEndpoint::Save => json!({
                "uid": profile.uid,
                "name": profile.name,
                "email": profile.email,
                "photo": profile.photo_url,
                "role": profile.role,
            }),
        }
    }
}

#[async_trait]
impl SessionBackend for RestBackend {
    #[instrument(skip(self, id_token))]
    async fn exchange_token(&self, id_token: &str) -> CampusResult<SessionToken> {
        let url = self.config.api_url("/auth");
        let body = json!({ "idToken": id_token }).to_string();

        let response = self
            .http_client
            .post(&url, json_headers(None), body)
            .await
            .map_err(|e| errors::backend_exchange_failed(format!("{:#}", e)))?;

        if !response.is_success() {
            return Err(errors::backend_exchange_failed(format!(
                "POST {} returned {}: {}",
                url,
                response.status(),
                response.body()
            )));
        }

        let parsed: ExchangeResponse = response
            .json()
            .map_err(|e| errors::backend_exchange_failed(format!("{:#}", e)))?;
        match parsed.token.filter(|t| !t.is_empty()) {
            Some(token) => Ok(SessionToken::new(token)),
            None => Err(errors::backend_exchange_failed("response carried no token")),
        }
    }

    #[instrument(skip(self))]
    async fn fetch_profile(&self, email: &str) -> CampusResult<Option<UserProfile>> {
        let url = url_with_segment(&self.config.api_url("/users"), &[email])?;

        let response = self
            .http_client
            .get(&url, json_headers(None))
            .await
            .map_err(|e| errors::profile_lookup_failed(email, format!("{:#}", e)))?;

        if response.is_not_found() {
            debug!("No profile on record");
            return Ok(None);
        }
        if !response.is_success() {
            return Err(errors::profile_lookup_failed(
                email,
                format!("HTTP {}: {}", response.status(), response.body()),
            ));
        }

        let body = response.body().trim();
        if body.is_empty() || body == "null" {
            return Ok(None);
        }
        serde_json::from_str::<UserProfile>(body)
            .map(Some)
            .map_err(|e| errors::profile_lookup_failed(email, e))
    }

    #[instrument(skip(self, profile), fields(email = %profile.email))]
    async fn create_profile(&self, profile: &NewProfile) -> CampusResult<UserProfile> {
        let url = self.config.api_url(self.config.profile_endpoint.path());
        let body = self.create_body(profile).to_string();

        let response = self
            .http_client
            .post(&url, json_headers(None), body)
            .await
            .map_err(|e| errors::profile_create_failed(&profile.email, format!("{:#}", e)))?;

        if !response.is_success() {
            return Err(errors::profile_create_failed(
                &profile.email,
                format!("HTTP {}: {}", response.status(), response.body()),
            ));
        }

        // Some deployments answer with an insert acknowledgement instead of the record
        let created = response
            .json::<UserProfile>()
            .ok()
            .filter(|p| p.email.is_some())
            .unwrap_or_else(|| UserProfile {
                name: Some(profile.name.clone()),
                email: Some(profile.email.clone()),
                photo_url: profile.photo_url.clone(),
                role: Some(profile.role.clone()),
            });
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::http_client::mock::MockHttpClient;
    use crate::adapters::http_client::HttpMethod;
    use crate::error::ErrorCode;

    fn setup(endpoint: ProfileEndpoint) -> (RestBackend, MockHttpClient) {
        let mock = MockHttpClient::new();
        let mut config = SessionConfig::with_api_base("http://campus.test");
        config.profile_endpoint = endpoint;
        (
            RestBackend::with_http_client(config, Arc::new(mock.clone())),
            mock,
        )
    }

    #[test]
    fn test_email_segment_is_encoded() {
        let url = url_with_segment("http://campus.test/users", &["a b@x.com"]).unwrap();
        assert_eq!(url, "http://campus.test/users/a%20b@x.com");
    }

    #[tokio::test]
    async fn test_exchange_token() {
        let (backend, mock) = setup(ProfileEndpoint::Users);
        mock.mock_json(
            HttpMethod::POST,
            "http://campus.test/auth",
            200,
            &json!({"token": "jwt-abc"}),
        );

        let token = backend.exchange_token("firebase-id-token").await.unwrap();
        assert_eq!(token.as_str(), "jwt-abc");
        assert_eq!(mock.get_requests()[0].json()["idToken"], "firebase-id-token");
    }

    #[tokio::test]
    async fn test_exchange_without_token_fails() {
        let (backend, mock) = setup(ProfileEndpoint::Users);
        mock.mock_json(HttpMethod::POST, "http://campus.test/auth", 200, &json!({}));

        let err = backend.exchange_token("id").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::BackendExchangeFailed);
    }

    #[tokio::test]
    async fn test_fetch_profile_not_found_and_null() {
        let (backend, mock) = setup(ProfileEndpoint::Users);
        mock.mock_response(HttpMethod::GET, "http://campus.test/users/a@x.com", 404, "");
        mock.mock_response(HttpMethod::GET, "http://campus.test/users/b@x.com", 200, "null");

        assert_eq!(backend.fetch_profile("a@x.com").await.unwrap(), None);
        assert_eq!(backend.fetch_profile("b@x.com").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fetch_profile_server_error() {
        let (backend, mock) = setup(ProfileEndpoint::Users);
        mock.mock_response(HttpMethod::GET, "http://campus.test/users/a@x.com", 500, "boom");

        let err = backend.fetch_profile("a@x.com").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ProfileLookupFailed);
    }

    #[tokio::test]
    async fn test_create_profile_body_per_endpoint() {
        let profile = NewProfile {
            uid: "uid-1".into(),
            name: "Ann".into(),
            email: "a@x.com".into(),
            photo_url: Some("http://p/a.png".into()),
            role: "student".into(),
        };

        let (backend, mock) = setup(ProfileEndpoint::Users);
        mock.mock_json(HttpMethod::POST, "http://campus.test/users", 201, &json!({"acknowledged": true}));
        let created = backend.create_profile(&profile).await.unwrap();
        assert_eq!(created.role.as_deref(), Some("student"));
        let sent = mock.get_requests()[0].json();
        assert_eq!(sent["photoURL"], "http://p/a.png");
        assert_eq!(sent["uid"], "uid-1");

        let (backend, mock) = setup(ProfileEndpoint::Save);
        mock.mock_json(
            HttpMethod::POST,
            "http://campus.test/api/users/save",
            200,
            &json!({"name": "Ann", "email": "a@x.com", "role": "student"}),
        );
        backend.create_profile(&profile).await.unwrap();
        let sent = mock.get_requests()[0].json();
        assert_eq!(sent["photo"], "http://p/a.png");
    }
}
