//! Shared test utilities for integration tests.
//!
//! An in-process axum server standing in for a TASS API. Every request it
//! receives is recorded so tests can inspect exactly what the client sent.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{TimeDelta, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::net::TcpListener;

use tass_api::{HttpTransport, RetryConfig, Session};
use tass_core::config::ServerConfig;

pub const PREFIX: &str = "/tassapi/api/v1";
pub const TENANT: &str = "SCH";
pub const FILE_CONTENT: &[u8] = b"student report\n";

/// One request as the server saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        reqwest::Url::parse(&format!("http://x/?{query}"))
            .ok()?
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}

/// Mutable server behavior and the request log.
#[derive(Default)]
pub struct MockState {
    pub requests: Mutex<Vec<Recorded>>,
    pub auth_calls: AtomicUsize,
    pub flaky_hits: AtomicUsize,
    /// Number of records served by the `students` collection.
    pub total_records: AtomicUsize,
    /// Tenant codes returned in `allowed_companies`.
    pub allowed: Mutex<Vec<String>>,
    /// Seconds until the issued token expires.
    pub token_ttl_secs: Mutex<i64>,
    /// Absolute target of the `redirect/cross` route.
    pub cross_target: Mutex<Option<String>>,
}

impl MockState {
    pub fn new() -> Arc<Self> {
        let state = Self::default();
        state.total_records.store(237, Ordering::SeqCst);
        *state.allowed.lock().unwrap() = vec![TENANT.to_string()];
        *state.token_ttl_secs.lock().unwrap() = 3600;
        Arc::new(state)
    }

    /// Recorded requests whose path ends with `suffix`.
    pub fn requests_to(&self, suffix: &str) -> Vec<Recorded> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path.ends_with(suffix))
            .cloned()
            .collect()
    }
}

/// Start a mock server on an ephemeral port.
pub async fn spawn_server(state: Arc<MockState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("failed to bind");
    let addr = listener.local_addr().expect("no local addr");
    let app = Router::new().fallback(handle).with_state(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock server failed");
    });
    addr
}

pub fn base_url(addr: SocketAddr) -> String {
    format!("http://{addr}{PREFIX}")
}

pub fn test_config(addr: SocketAddr) -> ServerConfig {
    ServerConfig::new(base_url(addr), "key", "secret", TENANT)
}

/// A session whose retries back off in milliseconds.
pub fn test_session(config: ServerConfig) -> Arc<Session> {
    let retry = RetryConfig {
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        ..RetryConfig::from_server(&config)
    };
    let transport = HttpTransport::new(&config)
        .expect("failed to build transport")
        .with_retry_config(retry);
    Arc::new(Session::with_transport(config, Arc::new(transport)).expect("failed to build session"))
}

/// Start a server and a session pointed at it.
pub async fn setup() -> (Arc<MockState>, SocketAddr, Arc<Session>) {
    let state = MockState::new();
    let addr = spawn_server(state.clone()).await;
    let session = test_session(test_config(addr));
    (state, addr, session)
}

pub fn sha256_digest_header(content: &[u8]) -> String {
    format!("sha-256={}", BASE64.encode(Sha256::digest(content)))
}

async fn handle(State(state): State<Arc<MockState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = to_bytes(body, usize::MAX).await.unwrap_or_default();
    let recorded = Recorded {
        method: parts.method.clone(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts.headers.clone(),
        body: body.clone(),
    };
    state.requests.lock().unwrap().push(recorded.clone());

    let Some(route) = recorded.path.strip_prefix(PREFIX) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let tenant_prefix = format!("/{TENANT}");
    let resource = route.strip_prefix(&tenant_prefix).unwrap_or(route);

    match (recorded.method.as_str(), route, resource) {
        ("POST", "/users", _) => authenticate(&state, &body),
        ("GET", _, "/students") => students(&state, &recorded),
        ("GET", _, "/missing") => (
            StatusCode::NOT_FOUND,
            Json(json!({"title": "Not Found", "detail": "no such record"})),
        )
            .into_response(),
        ("GET", _, "/redirect/same") => redirect(&format!("{PREFIX}/{TENANT}/echo")),
        ("GET", _, "/redirect/cross") => {
            let target = state.cross_target.lock().unwrap().clone().unwrap_or_default();
            redirect(&target)
        }
        ("GET", _, "/flaky") => {
            if state.flaky_hits.fetch_add(1, Ordering::SeqCst) < 2 {
                StatusCode::TOO_MANY_REQUESTS.into_response()
            } else {
                Json(json!({"ok": true})).into_response()
            }
        }
        ("GET", _, "/throttled") => StatusCode::TOO_MANY_REQUESTS.into_response(),
        ("GET", _, "/files/report.txt") => file_response(FILE_CONTENT, &sha256_digest_header(FILE_CONTENT)),
        ("GET", _, "/files/tampered.txt") => {
            file_response(FILE_CONTENT, &sha256_digest_header(b"something else"))
        }
        ("GET", _, "/files/none") => Json(json!({"message": "no file"})).into_response(),
        (_, _, _) => Json(json!({"ok": true})).into_response(),
    }
}

fn authenticate(state: &MockState, body: &[u8]) -> Response {
    state.auth_calls.fetch_add(1, Ordering::SeqCst);
    let credentials: serde_json::Value = serde_json::from_slice(body).unwrap_or_default();
    match credentials["clientKey"].as_str() {
        Some("key") if credentials["clientSecret"] == "secret" => {}
        Some("not-json") => return (StatusCode::OK, "<html>maintenance</html>").into_response(),
        Some("incomplete") => return Json(json!({"token": "abc"})).into_response(),
        Some("broken-body") => return broken_body(),
        _ => return (StatusCode::UNAUTHORIZED, Json(json!({"message": "bad credentials"}))).into_response(),
    }

    let ttl = *state.token_ttl_secs.lock().unwrap();
    let expiry = (Utc::now() + TimeDelta::seconds(ttl)).to_rfc3339();
    let companies: Vec<serde_json::Value> = state
        .allowed
        .lock()
        .unwrap()
        .iter()
        .map(|code| json!({"cmpy_code": code, "cmpy_name": format!("{code} College")}))
        .collect();
    let n = state.auth_calls.load(Ordering::SeqCst);
    Json(json!({
        "token": format!("token-{n}"),
        "token_expiry_date": expiry,
        "allowed_companies": companies,
    }))
    .into_response()
}

fn students(state: &MockState, request: &Recorded) -> Response {
    let total = state.total_records.load(Ordering::SeqCst);
    let top: usize = request.query_param("$top").and_then(|v| v.parse().ok()).unwrap_or(total);
    let skip: usize = request.query_param("$skip").and_then(|v| v.parse().ok()).unwrap_or(0);
    let records: Vec<serde_json::Value> = (skip..total.min(skip.saturating_add(top)))
        .map(|id| json!({"stud_code": id, "doe": "2024-01-15T08:30:00.123"}))
        .collect();
    Json(records).into_response()
}

/// A 200 response whose body fails after the first chunk.
fn broken_body() -> Response {
    let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
        Ok(Bytes::from_static(b"{\"token\": \"tok")),
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection dropped")),
    ];
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from_stream(tokio_stream::iter(chunks)))
        .unwrap_or_default()
}

fn redirect(location: &str) -> Response {
    Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, location)
        .body(Body::empty())
        .unwrap_or_default()
}

fn file_response(content: &'static [u8], digest: &str) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain")
        .header(header::CONTENT_DISPOSITION, "attachment; filename=\"report.txt\"")
        .header("Digest", digest)
        .body(Body::from(content))
        .unwrap_or_default()
}
