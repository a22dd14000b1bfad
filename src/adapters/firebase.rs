use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::adapters::http_client::{json_headers, HttpClient, ReqwestHttpClient};
use crate::auth::identity::{
    Identity, IdentityFeed, IdentityProvider, IdentitySubscription, OAuthCredential, ProfileUpdate,
};
use crate::config::SessionConfig;
use crate::error::{errors, CampusError, CampusResult};

/// Continue URI sent with `signInWithIdp`
const IDP_REQUEST_URI: &str = "http://localhost";

/// Form-encoded `postBody` carrying an OAuth credential to `signInWithIdp`
fn idp_post_body(credential: &OAuthCredential) -> CampusResult<String> {
    let mut url =
        Url::parse(IDP_REQUEST_URI).map_err(|e| errors::invalid_input("requestUri", &e.to_string()))?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("providerId", &credential.provider_id);
        if let Some(id_token) = &credential.id_token {
            pairs.append_pair("id_token", id_token);
        }
        if let Some(access_token) = &credential.access_token {
            pairs.append_pair("access_token", access_token);
        }
    }
    Ok(url.query().unwrap_or_default().to_string())
}

/// Account fields returned by the Identity Toolkit endpoints
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: Option<String>,
    email: Option<String>,
    display_name: Option<String>,
    photo_url: Option<String>,
    id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<AccountResponse>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Signed-in user held by the adapter
#[derive(Debug, Clone)]
struct ProviderSession {
    uid: String,
    id_token: String,
}

/// Identity provider backed by the Firebase Identity Toolkit REST API
pub struct FirebaseIdentityProvider {
    http_client: Arc<dyn HttpClient>,
    endpoint: String,
    api_key: String,
    session: RwLock<Option<ProviderSession>>,
    feed: IdentityFeed,
}

impl FirebaseIdentityProvider {
    pub fn new(config: &SessionConfig) -> CampusResult<Self> {
        Self::with_http_client(config, Arc::new(ReqwestHttpClient::new()))
    }

    /// Create a provider with a custom HTTP client
    pub fn with_http_client(
        config: &SessionConfig,
        http_client: Arc<dyn HttpClient>,
    ) -> CampusResult<Self> {
        let api_key = config.identity_api_key()?.to_string();
        Ok(Self {
            http_client,
            endpoint: config.identity.endpoint.trim_end_matches('/').to_string(),
            api_key,
            session: RwLock::new(None),
            feed: IdentityFeed::new(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/accounts:{}?key={}", self.endpoint, method, self.api_key)
    }

    /// POST to an `accounts:*` method, mapping provider errors
    async fn call(&self, operation: &str, method: &str, body: Value) -> CampusResult<Value> {
        let url = self.method_url(method);
        let response = self
            .http_client
            .post(&url, json_headers(None), body.to_string())
            .await
            .map_err(|e| errors::provider_unavailable(operation, format!("{:#}", e)))?;

        if response.is_success() {
            return response
                .json::<Value>()
                .map_err(|e| errors::provider_unavailable(operation, format!("{:#}", e)));
        }

        let reason = response
            .json::<ErrorEnvelope>()
            .map(|envelope| envelope.error.message)
            .unwrap_or_else(|_| response.body().to_string());
        if response.is_server_error() {
            Err(errors::provider_unavailable(operation, reason))
        } else {
            debug!(operation, reason = %reason, "Identity provider rejected request");
            Err(errors::provider_rejected(operation, reason))
        }
    }

    fn parse_account(operation: &str, value: Value) -> CampusResult<AccountResponse> {
        serde_json::from_value(value)
            .map_err(|e| errors::provider_unavailable(operation, e))
    }

    fn to_identity(operation: &str, account: &AccountResponse) -> CampusResult<Identity> {
        let uid = account
            .local_id
            .clone()
            .ok_or_else(|| errors::provider_unavailable(operation, "response carried no localId"))?;
        Ok(Identity {
            uid,
            email: account.email.clone(),
            display_name: account.display_name.clone().filter(|n| !n.is_empty()),
            photo_url: account.photo_url.clone().filter(|p| !p.is_empty()),
        })
    }

    /// Store the signed-in user and notify observers
    async fn establish(
        &self,
        operation: &str,
        account: AccountResponse,
    ) -> CampusResult<Identity> {
        let identity = Self::to_identity(operation, &account)?;
        let id_token = account
            .id_token
            .ok_or_else(|| errors::provider_unavailable(operation, "response carried no idToken"))?;

        *self.session.write().await = Some(ProviderSession {
            uid: identity.uid.clone(),
            id_token,
        });
        info!(operation, uid = %identity.uid, "Identity signed in at provider");
        self.feed.publish(Some(identity.clone())).await;
        Ok(identity)
    }

    async fn current_token(&self, identity: &Identity) -> CampusResult<String> {
        match self.session.read().await.as_ref() {
            Some(session) if session.uid == identity.uid => Ok(session.id_token.clone()),
            _ => Err(errors::provider_rejected(
                "proof_of_identity",
                format!("{} is not the signed-in identity", identity.uid),
            )),
        }
    }
}

#[async_trait]
impl IdentityProvider for FirebaseIdentityProvider {
    fn name(&self) -> &str {
        "firebase"
    }

    #[instrument(skip(self, password))]
    async fn sign_up(&self, email: &str, password: &str) -> CampusResult<Identity> {
        let body = json!({ "email": email, "password": password, "returnSecureToken": true });
        let value = self.call("sign_up", "signUp", body).await?;
        let account = Self::parse_account("sign_up", value)?;
        self.establish("sign_up", account).await
    }

    #[instrument(skip(self, password))]
    async fn sign_in(&self, email: &str, password: &str) -> CampusResult<Identity> {
        let body = json!({ "email": email, "password": password, "returnSecureToken": true });
        let value = self.call("sign_in", "signInWithPassword", body).await?;
        let mut account = Self::parse_account("sign_in", value)?;

        // the password endpoint omits the photo; look the account up for it
        if let Some(id_token) = account.id_token.clone() {
            match self
                .call("sign_in", "lookup", json!({ "idToken": id_token }))
                .await
                .and_then(|v| {
                    serde_json::from_value::<LookupResponse>(v).map_err(CampusError::from)
                }) {
                Ok(lookup) => {
                    if let Some(user) = lookup.users.into_iter().next() {
                        account.display_name = user.display_name.or(account.display_name);
                        account.photo_url = user.photo_url.or(account.photo_url);
                    }
                }
                Err(e) => warn!(error = %e, "Account lookup failed, continuing without photo"),
            }
        }

        self.establish("sign_in", account).await
    }

    #[instrument(skip(self, credential), fields(provider_id = %credential.provider_id))]
    async fn sign_in_with_oauth(&self, credential: &OAuthCredential) -> CampusResult<Identity> {
        if credential.id_token.is_none() && credential.access_token.is_none() {
            return Err(errors::invalid_input(
                "credential",
                "an id token or access token is required",
            ));
        }

        let body = json!({
            "postBody": idp_post_body(credential)?,
            "requestUri": IDP_REQUEST_URI,
            "returnIdpCredential": true,
            "returnSecureToken": true,
        });
        let value = self.call("sign_in_with_oauth", "signInWithIdp", body).await?;
        let account = Self::parse_account("sign_in_with_oauth", value)?;
        self.establish("sign_in_with_oauth", account).await
    }

    async fn sign_out(&self) -> CampusResult<()> {
        let previous = self.session.write().await.take();
        if let Some(session) = previous {
            info!(uid = %session.uid, "Identity signed out at provider");
        }
        self.feed.publish(None).await;
        Ok(())
    }

    #[instrument(skip(self, identity, update), fields(uid = %identity.uid))]
    async fn update_profile(
        &self,
        identity: &Identity,
        update: &ProfileUpdate,
    ) -> CampusResult<Identity> {
        let id_token = self.current_token(identity).await?;
        let mut body = json!({ "idToken": id_token, "returnSecureToken": false });
        if let Some(name) = &update.display_name {
            body["displayName"] = json!(name);
        }
        if let Some(photo) = &update.photo_url {
            body["photoUrl"] = json!(photo);
        }

        let value = self.call("update_profile", "update", body).await?;
        let account = Self::parse_account("update_profile", value)?;

        let mut updated = identity.clone();
        updated.display_name = account
            .display_name
            .or_else(|| update.display_name.clone())
            .or(updated.display_name);
        updated.photo_url = account
            .photo_url
            .or_else(|| update.photo_url.clone())
            .or(updated.photo_url);

        // profile edits do not count as an identity change
        self.feed.replace_current(updated.clone()).await;
        Ok(updated)
    }

    async fn proof_of_identity(&self, identity: &Identity) -> CampusResult<String> {
        self.current_token(identity).await
    }

    async fn current_identity(&self) -> Option<Identity> {
        self.feed.current().await
    }

    async fn observe(&self) -> IdentitySubscription {
        self.feed.subscribe().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::http_client::mock::MockHttpClient;
    use crate::adapters::http_client::HttpMethod;
    use crate::error::ErrorCode;

    const ENDPOINT: &str = "http://identity.test/v1";

    fn setup() -> (FirebaseIdentityProvider, MockHttpClient) {
        let mock = MockHttpClient::new();
        let mut config = SessionConfig::with_api_base("http://campus.test");
        config.identity.api_key = Some("key".into());
        config.identity.endpoint = ENDPOINT.into();
        let provider =
            FirebaseIdentityProvider::with_http_client(&config, Arc::new(mock.clone())).unwrap();
        (provider, mock)
    }

    fn url(method: &str) -> String {
        format!("{}/accounts:{}?key=key", ENDPOINT, method)
    }

    #[test]
    fn test_requires_api_key() {
        let config = SessionConfig::with_api_base("http://campus.test");
        let err = FirebaseIdentityProvider::with_http_client(
            &config,
            Arc::new(MockHttpClient::new()),
        )
        .err()
        .unwrap();
        assert_eq!(err.code, ErrorCode::ConfigMissing);
    }

    #[tokio::test]
    async fn test_sign_up_publishes_identity() {
        let (provider, mock) = setup();
        mock.mock_json(
            HttpMethod::POST,
            url("signUp"),
            200,
            &json!({"localId": "uid-ann", "email": "a@x.com", "idToken": "id-1"}),
        );

        let mut sub = provider.observe().await;
        assert_eq!(sub.next().await, Some(None));

        let identity = provider.sign_up("a@x.com", "pw123456").await.unwrap();
        assert_eq!(identity.uid, "uid-ann");
        assert_eq!(sub.next().await, Some(Some(identity.clone())));
        assert_eq!(provider.proof_of_identity(&identity).await.unwrap(), "id-1");
    }

    #[tokio::test]
    async fn test_sign_in_error_mapping() {
        let (provider, mock) = setup();
        mock.mock_json(
            HttpMethod::POST,
            url("signInWithPassword"),
            400,
            &json!({"error": {"code": 400, "message": "INVALID_PASSWORD"}}),
        );

        let err = provider.sign_in("a@x.com", "wrong").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ProviderRejected);
        assert!(err.message.contains("INVALID_PASSWORD"));

        mock.mock_response(HttpMethod::POST, url("signInWithPassword"), 503, "unavailable");
        let err = provider.sign_in("a@x.com", "pw").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ProviderUnavailable);
        assert!(provider.current_identity().await.is_none());
    }

    #[tokio::test]
    async fn test_sign_in_fills_photo_from_lookup() {
        let (provider, mock) = setup();
        mock.mock_json(
            HttpMethod::POST,
            url("signInWithPassword"),
            200,
            &json!({"localId": "uid-ann", "email": "a@x.com", "displayName": "Ann", "idToken": "id-2"}),
        );
        mock.mock_json(
            HttpMethod::POST,
            url("lookup"),
            200,
            &json!({"users": [{"localId": "uid-ann", "photoUrl": "http://p/a.png"}]}),
        );

        let identity = provider.sign_in("a@x.com", "pw").await.unwrap();
        assert_eq!(identity.display_name.as_deref(), Some("Ann"));
        assert_eq!(identity.photo_url.as_deref(), Some("http://p/a.png"));
    }

    #[tokio::test]
    async fn test_update_profile_and_sign_out() {
        let (provider, mock) = setup();
        mock.mock_json(
            HttpMethod::POST,
            url("signUp"),
            200,
            &json!({"localId": "uid-ann", "email": "a@x.com", "idToken": "id-1"}),
        );
        mock.mock_json(
            HttpMethod::POST,
            url("update"),
            200,
            &json!({"localId": "uid-ann", "email": "a@x.com", "displayName": "Ann"}),
        );

        let identity = provider.sign_up("a@x.com", "pw123456").await.unwrap();
        let update = ProfileUpdate {
            display_name: Some("Ann".into()),
            photo_url: None,
        };
        let updated = provider.update_profile(&identity, &update).await.unwrap();
        assert_eq!(updated.display_name.as_deref(), Some("Ann"));
        assert_eq!(provider.current_identity().await, Some(updated.clone()));

        let body = mock.get_requests().last().unwrap().json();
        assert_eq!(body["idToken"], "id-1");
        assert_eq!(body["displayName"], "Ann");

        provider.sign_out().await.unwrap();
        assert!(provider.current_identity().await.is_none());
        let err = provider.proof_of_identity(&updated).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ProviderRejected);
    }

    #[test]
    fn test_idp_post_body_escapes_credential() {
        let credential = OAuthCredential {
            provider_id: "oidc.campus sso".into(),
            id_token: Some("a+b&c=d".into()),
            access_token: Some("tok/1".into()),
        };
        assert_eq!(
            idp_post_body(&credential).unwrap(),
            "providerId=oidc.campus+sso&id_token=a%2Bb%26c%3Dd&access_token=tok%2F1"
        );
        assert_eq!(
            idp_post_body(&OAuthCredential::google_id_token("google-token")).unwrap(),
            "providerId=google.com&id_token=google-token"
        );
    }

    #[tokio::test]
    async fn test_oauth_sign_in_requires_a_token() {
        let (provider, mock) = setup();
        let credential = OAuthCredential {
            provider_id: "google.com".into(),
            id_token: None,
            access_token: None,
        };
        let err = provider.sign_in_with_oauth(&credential).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert!(mock.get_requests().is_empty());
    }
}
