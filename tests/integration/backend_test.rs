//! REST backend against a mock campus server

use mockito::Matcher;
use serde_json::json;

use campus_session::auth::{NewProfile, UserProfile};
use campus_session::{ErrorCode, ProfileEndpoint, RestBackend, SessionBackend};

use crate::test_harness::config_for;

fn new_profile() -> NewProfile {
    NewProfile {
        uid: "uid-ann".into(),
        name: "Ann".into(),
        email: "a@x.com".into(),
        photo_url: Some("https://cdn.test/ann.png".into()),
        role: "student".into(),
    }
}

#[tokio::test]
async fn test_exchange_posts_id_token() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/auth")
        .match_body(Matcher::Json(json!({ "idToken": "fb-token" })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"token":"jwt-1"}"#)
        .create_async()
        .await;

    let backend = RestBackend::new(config_for(&server));
    let token = backend.exchange_token("fb-token").await.unwrap();
    assert_eq!(token.as_str(), "jwt-1");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_exchange_rejection_is_reported() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/auth")
        .with_status(401)
        .with_body("bad token")
        .create_async()
        .await;

    let backend = RestBackend::new(config_for(&server));
    let err = backend.exchange_token("fb-token").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::BackendExchangeFailed);
}

#[tokio::test]
async fn test_fetch_profile_found_and_missing() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/users/a@x.com")
        .with_status(200)
        .with_body(r#"{"name":"Ann","email":"a@x.com","photoURL":"p.png","role":"admin"}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/users/nobody@x.com")
        .with_status(404)
        .create_async()
        .await;
    server
        .mock("GET", "/users/null@x.com")
        .with_status(200)
        .with_body("null")
        .create_async()
        .await;

    let backend = RestBackend::new(config_for(&server));

    let profile = backend.fetch_profile("a@x.com").await.unwrap().unwrap();
    assert_eq!(
        profile,
        UserProfile {
            name: Some("Ann".into()),
            email: Some("a@x.com".into()),
            photo_url: Some("p.png".into()),
            role: Some("admin".into()),
        }
    );
    assert!(backend.fetch_profile("nobody@x.com").await.unwrap().is_none());
    assert!(backend.fetch_profile("null@x.com").await.unwrap().is_none());
}

#[tokio::test]
async fn test_fetch_profile_server_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/users/a@x.com")
        .with_status(503)
        .create_async()
        .await;

    let backend = RestBackend::new(config_for(&server));
    let err = backend.fetch_profile("a@x.com").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ProfileLookupFailed);
}

#[tokio::test]
async fn test_create_profile_on_users_endpoint() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/users")
        .match_body(Matcher::PartialJson(json!({
            "uid": "uid-ann",
            "email": "a@x.com",
            "photoURL": "https://cdn.test/ann.png",
            "role": "student"
        })))
        .with_status(200)
        .with_body(r#"{"acknowledged":true,"insertedId":"665f"}"#)
        .create_async()
        .await;

    let backend = RestBackend::new(config_for(&server));
    let created = backend.create_profile(&new_profile()).await.unwrap();
    assert_eq!(created.name.as_deref(), Some("Ann"));
    assert_eq!(created.role.as_deref(), Some("student"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_create_profile_on_save_endpoint() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/users/save")
        .match_body(Matcher::PartialJson(json!({
            "photo": "https://cdn.test/ann.png"
        })))
        .with_status(201)
        .with_body(r#"{"name":"Ann","email":"a@x.com","photo":"https://cdn.test/ann.png","role":"student"}"#)
        .create_async()
        .await;

    let mut config = config_for(&server);
    config.profile_endpoint = ProfileEndpoint::Save;
    let backend = RestBackend::new(config);

    let created = backend.create_profile(&new_profile()).await.unwrap();
    assert_eq!(created.photo_url.as_deref(), Some("https://cdn.test/ann.png"));
    mock.assert_async().await;
}
