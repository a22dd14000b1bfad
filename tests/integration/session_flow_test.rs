//! End-to-end session flows over the real adapters

use mockito::Matcher;
use serde_json::json;

use campus_session::{CampusApi, Role, RoleSource, SessionPhase, TokenStore};

use crate::test_harness::{account, identity_method, TestEnvironment};

#[tokio::test]
async fn test_first_sign_in_creates_profile_and_authorizes_api() {
    let mut server = mockito::Server::new_async().await;
    identity_method(&mut server, "signInWithPassword")
        .with_status(200)
        .with_body(account("uid-ann", "a@x.com", "Ann", "fb-token"))
        .create_async()
        .await;
    identity_method(&mut server, "lookup")
        .with_status(200)
        .with_body(r#"{"users":[]}"#)
        .create_async()
        .await;
    let exchange = server
        .mock("POST", "/auth")
        .match_body(Matcher::Json(json!({ "idToken": "fb-token" })))
        .with_status(200)
        .with_body(r#"{"token":"jwt-1"}"#)
        .expect(1)
        .create_async()
        .await;
    let lookup = server
        .mock("GET", "/users/a@x.com")
        .with_status(404)
        .expect(1)
        .create_async()
        .await;
    let create = server
        .mock("POST", "/users")
        .match_body(Matcher::PartialJson(json!({
            "uid": "uid-ann",
            "name": "Ann",
            "email": "a@x.com",
            "role": "student"
        })))
        .with_status(200)
        .with_body(r#"{"acknowledged":true}"#)
        .expect(1)
        .create_async()
        .await;
    let courses = server
        .mock("GET", "/api/courses")
        .match_header("authorization", "Bearer jwt-1")
        .with_status(200)
        .with_body("[]")
        .create_async()
        .await;

    let env = TestEnvironment::new(&server);
    env.sync.authenticate("a@x.com", "pw").await.unwrap();

    let state = env.sync.state().await;
    assert_eq!(state.phase(), SessionPhase::SignedIn(Role::Student));
    assert_eq!(state.role.as_ref().map(|r| r.source), Some(RoleSource::Created));

    let token = env.tokens.get(&env.config.token_slot).await.unwrap().unwrap();
    assert_eq!(token.as_str(), "jwt-1");

    let api = CampusApi::new(env.config.clone(), env.sync.handle());
    assert!(api.list_courses().await.unwrap().is_empty());

    exchange.assert_async().await;
    lookup.assert_async().await;
    create.assert_async().await;
    courses.assert_async().await;

    env.sync.sign_out().await.unwrap();
    assert!(env.sync.state().await.identity.is_none());
    assert!(env.tokens.get(&env.config.token_slot).await.unwrap().is_none());
    env.cleanup().await;
}

#[tokio::test]
async fn test_backend_outage_keeps_provider_session() {
    let mut server = mockito::Server::new_async().await;
    identity_method(&mut server, "signInWithPassword")
        .with_status(200)
        .with_body(account("uid-boss", "b@x.com", "Boss", "fb-boss"))
        .create_async()
        .await;
    identity_method(&mut server, "lookup")
        .with_status(200)
        .with_body(r#"{"users":[]}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/auth")
        .with_status(500)
        .with_body("database unavailable")
        .create_async()
        .await;
    server
        .mock("GET", "/users/b@x.com")
        .with_status(200)
        .with_body(r#"{"name":"Boss","email":"b@x.com","role":"admin"}"#)
        .create_async()
        .await;

    let env = TestEnvironment::new(&server);
    env.sync.authenticate("b@x.com", "pw").await.unwrap();

    let state = env.sync.state().await;
    assert_eq!(state.phase(), SessionPhase::PartiallySignedIn(Role::Admin));
    assert!(env.tokens.get(&env.config.token_slot).await.unwrap().is_none());
    env.cleanup().await;
}
