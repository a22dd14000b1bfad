//! Identity Toolkit adapter against a mock server

use mockito::Matcher;
use serde_json::json;

use campus_session::{
    ErrorCode, FirebaseIdentityProvider, IdentityProvider, OAuthCredential, ProfileUpdate,
};

use crate::test_harness::{account, config_for, identity_method};

#[tokio::test]
async fn test_sign_in_merges_lookup_photo_and_notifies() {
    let mut server = mockito::Server::new_async().await;
    identity_method(&mut server, "signInWithPassword")
        .match_body(Matcher::PartialJson(json!({
            "email": "a@x.com",
            "password": "pw",
            "returnSecureToken": true
        })))
        .with_status(200)
        .with_body(account("uid-ann", "a@x.com", "Ann", "fb-token"))
        .create_async()
        .await;
    identity_method(&mut server, "lookup")
        .match_body(Matcher::Json(json!({ "idToken": "fb-token" })))
        .with_status(200)
        .with_body(r#"{"users":[{"localId":"uid-ann","photoUrl":"https://cdn.test/ann.png"}]}"#)
        .create_async()
        .await;

    let provider = FirebaseIdentityProvider::new(&config_for(&server)).unwrap();
    let mut observer = provider.observe().await;
    assert_eq!(observer.next().await, Some(None));

    let identity = provider.sign_in("a@x.com", "pw").await.unwrap();
    assert_eq!(identity.uid, "uid-ann");
    assert_eq!(identity.display_name.as_deref(), Some("Ann"));
    assert_eq!(identity.photo_url.as_deref(), Some("https://cdn.test/ann.png"));

    assert_eq!(observer.next().await, Some(Some(identity.clone())));
    assert_eq!(provider.proof_of_identity(&identity).await.unwrap(), "fb-token");
}

#[tokio::test]
async fn test_invalid_credentials_are_rejected() {
    let mut server = mockito::Server::new_async().await;
    identity_method(&mut server, "signInWithPassword")
        .with_status(400)
        .with_body(r#"{"error":{"code":400,"message":"INVALID_LOGIN_CREDENTIALS"}}"#)
        .create_async()
        .await;

    let provider = FirebaseIdentityProvider::new(&config_for(&server)).unwrap();
    let err = provider.sign_in("a@x.com", "wrong").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ProviderRejected);
    assert!(err.to_string().contains("INVALID_LOGIN_CREDENTIALS"));
    assert!(provider.current_identity().await.is_none());
}

#[tokio::test]
async fn test_outage_is_unavailable() {
    let mut server = mockito::Server::new_async().await;
    identity_method(&mut server, "signUp")
        .with_status(503)
        .with_body("upstream down")
        .create_async()
        .await;

    let provider = FirebaseIdentityProvider::new(&config_for(&server)).unwrap();
    let err = provider.sign_up("a@x.com", "pw").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ProviderUnavailable);
}

#[tokio::test]
async fn test_oauth_sign_in_posts_id_token() {
    let mut server = mockito::Server::new_async().await;
    let mock = identity_method(&mut server, "signInWithIdp")
        .match_body(Matcher::PartialJson(json!({
            "postBody": "providerId=google.com&id_token=google-token"
        })))
        .with_status(200)
        .with_body(account("uid-carol", "c@x.com", "Carol", "fb-carol"))
        .create_async()
        .await;

    let provider = FirebaseIdentityProvider::new(&config_for(&server)).unwrap();
    let identity = provider
        .sign_in_with_oauth(&OAuthCredential::google_id_token("google-token"))
        .await
        .unwrap();
    assert_eq!(identity.email.as_deref(), Some("c@x.com"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_profile_update_does_not_notify() {
    let mut server = mockito::Server::new_async().await;
    identity_method(&mut server, "signUp")
        .with_status(200)
        .with_body(account("uid-ann", "a@x.com", "", "fb-token"))
        .create_async()
        .await;
    identity_method(&mut server, "update")
        .match_body(Matcher::PartialJson(json!({
            "idToken": "fb-token",
            "displayName": "Ann"
        })))
        .with_status(200)
        .with_body(r#"{"localId":"uid-ann","displayName":"Ann"}"#)
        .create_async()
        .await;

    let provider = FirebaseIdentityProvider::new(&config_for(&server)).unwrap();
    let created = provider.sign_up("a@x.com", "pw").await.unwrap();
    assert!(created.display_name.is_none());

    let mut observer = provider.observe().await;
    assert_eq!(observer.next().await, Some(Some(created.clone())));

    let update = ProfileUpdate {
        display_name: Some("Ann".into()),
        photo_url: None,
    };
    let updated = provider.update_profile(&created, &update).await.unwrap();
    assert_eq!(updated.display_name.as_deref(), Some("Ann"));
    assert_eq!(provider.current_identity().await, Some(updated));

    provider.sign_out().await.unwrap();
    // the next notification is the sign-out, not the profile edit
    assert_eq!(observer.next().await, Some(None));
}
