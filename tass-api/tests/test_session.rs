//! Integration tests for the session lifecycle.
//!
//! Tests the credential exchange, lazy and single-flight authentication,
//! proactive re-authentication near expiry, authentication failures and the
//! tenant guard, all against an in-process mock server.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tass_api::{Endpoint, RequestOptions};
use tass_core::error::{AuthFailure, TassError};

use common::{setup, spawn_server, test_config, test_session, MockState, TENANT};

// ---- Credential exchange ----

#[tokio::test]
async fn authenticate_installs_bearer_token() {
    let (state, _addr, session) = setup().await;
    assert!(!session.is_authenticated().await);

    session.authenticate().await.unwrap();

    assert!(session.is_authenticated().await);
    assert!(session.is_valid_tenant().await);
    let headers = session.default_headers().await;
    assert_eq!(headers["authorization"], "Bearer token-1");

    let companies = session.allowed_companies().await;
    assert_eq!(companies.len(), 1);
    assert_eq!(companies[0].cmpy_code, TENANT);
    assert_eq!(companies[0].extra["cmpy_name"], "SCH College");

    let auth = state.requests_to("/users");
    assert_eq!(auth.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&auth[0].body).unwrap();
    assert_eq!(body["clientKey"], "key");
    assert_eq!(body["clientSecret"], "secret");
    assert!(auth[0].header("authorization").is_none());
}

#[tokio::test]
async fn requests_authenticate_lazily_once() {
    let (state, _addr, session) = setup().await;
    let students = Endpoint::new(session.clone(), "students");

    students.get(&[], RequestOptions::new()).await.unwrap();
    students.get(&[], RequestOptions::new()).await.unwrap();

    assert_eq!(state.auth_calls.load(Ordering::SeqCst), 1);
    let sent = state.requests_to("/students");
    assert_eq!(sent.len(), 2);
    for request in &sent {
        assert_eq!(request.header("authorization").as_deref(), Some("Bearer token-1"));
        assert_eq!(request.header("accept").as_deref(), Some("application/json"));
        assert!(request
            .header("user-agent")
            .unwrap()
            .starts_with("com.github.redtrinity.tassapi/"));
    }
}

#[tokio::test]
async fn token_inside_expiry_offset_is_refreshed_per_call() {
    let (state, _addr, session) = setup().await;
    // Expires in 30s, inside the default 60s safety offset.
    *state.token_ttl_secs.lock().unwrap() = 30;

    session.authenticate().await.unwrap();
    assert!(!session.is_authenticated().await);

    let students = Endpoint::new(session.clone(), "students");
    students.get(&[], RequestOptions::new()).await.unwrap();
    assert_eq!(state.auth_calls.load(Ordering::SeqCst), 2);

    let sent = state.requests_to("/students");
    assert_eq!(sent[0].header("authorization").as_deref(), Some("Bearer token-2"));
}

#[tokio::test]
async fn concurrent_callers_share_one_exchange() {
    let (state, _addr, session) = setup().await;

    let calls = (0..5).map(|_| {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.ensure_authenticated().await })
    });
    for handle in calls.collect::<Vec<_>>() {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(state.auth_calls.load(Ordering::SeqCst), 1);
}

// ---- Authentication failures ----

#[tokio::test]
async fn non_json_auth_response_is_an_authentication_error() {
    let state = MockState::new();
    let addr = spawn_server(state.clone()).await;
    let mut config = test_config(addr);
    config.key = "not-json".into();
    let session = test_session(config);

    let err = session.authenticate().await.unwrap_err();
    match err {
        TassError::Authentication { status, url, kind } => {
            assert_eq!(status, 200);
            assert!(url.ends_with("/tassapi/api/v1/users"), "{url}");
            assert_eq!(kind, AuthFailure::NotJson);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!session.is_authenticated().await);
}

#[tokio::test]
async fn incomplete_token_response_is_rejected() {
    let state = MockState::new();
    let addr = spawn_server(state.clone()).await;
    let mut config = test_config(addr);
    config.key = "incomplete".into();
    let session = test_session(config);

    let err = session.authenticate().await.unwrap_err();
    assert!(matches!(
        err,
        TassError::Authentication { kind: AuthFailure::InvalidStructure(_), .. }
    ));
    assert!(session.default_headers().await.get("authorization").is_none());
}

#[tokio::test]
async fn interrupted_auth_body_is_a_transport_error() {
    let state = MockState::new();
    let addr = spawn_server(state.clone()).await;
    let mut config = test_config(addr);
    config.key = "broken-body".into();
    let session = test_session(config);

    let err = session.authenticate().await.unwrap_err();
    assert!(matches!(err, TassError::Http(_)), "unexpected error: {err:?}");
    assert!(!err.is_authentication());
    assert!(!session.is_authenticated().await);
}

#[tokio::test]
async fn rejected_credentials_carry_status() {
    let state = MockState::new();
    let addr = spawn_server(state.clone()).await;
    let mut config = test_config(addr);
    config.secret = "wrong".into();
    let session = test_session(config);

    let students = Endpoint::new(session, "students");
    let err = students.get(&[], RequestOptions::new()).await.unwrap_err();
    assert!(err.is_authentication());
    assert_eq!(err.status(), Some(401));
    assert!(state.requests_to("/students").is_empty());
}

// ---- Tenant guard ----

#[tokio::test]
async fn tenant_outside_allowed_companies_is_refused() {
    let (state, _addr, session) = setup().await;
    *state.allowed.lock().unwrap() = vec!["OTHER".to_string(), "SCHOOL".to_string()];

    let students = Endpoint::new(session.clone(), "students");
    let err = students.get(&[], RequestOptions::new()).await.unwrap_err();

    assert!(matches!(err, TassError::TenantNotAllowed(ref code) if code == TENANT));
    assert!(session.is_authenticated().await);
    assert!(!session.is_valid_tenant().await);
    assert!(state.requests_to("/students").is_empty());
}
