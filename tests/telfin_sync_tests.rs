mod common;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use callcontrol::telfin::TelfinTokenManager;
use serde_json::json;
use std::sync::{
    Arc,
    atomic::{AtomicU16, AtomicUsize, Ordering},
};
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct Upstream {
    tokens_issued: Arc<AtomicUsize>,
    history_calls: Arc<AtomicUsize>,
    /// Non-zero: the token endpoint fails with this status.
    token_status: Arc<AtomicU16>,
    /// Non-zero: call history always fails with this status.
    history_status: Arc<AtomicU16>,
}

async fn issue_token(State(up): State<Upstream>) -> axum::response::Response {
    let failing = up.token_status.load(Ordering::SeqCst);
    if failing != 0 {
        let status = StatusCode::from_u16(failing).unwrap();
        return (status, Json(json!({ "error": "invalid_client" }))).into_response();
    }
    let n = up.tokens_issued.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({
        "access_token": format!("tok-{n}"),
        "token_type": "bearer",
        "expires_in": 3600,
    }))
    .into_response()
}

async fn user_info() -> impl IntoResponse {
    Json(json!({ "client_id": 15123, "login": "acme" }))
}

/// Rejects the first token it sees so the client has to refresh, unless a
/// fixed failure status is set.
async fn call_history(
    State(up): State<Upstream>,
    Path(client_id): Path<String>,
    headers: HeaderMap,
) -> axum::response::Response {
    up.history_calls.fetch_add(1, Ordering::SeqCst);
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if client_id != "15123" {
        return StatusCode::NOT_FOUND.into_response();
    }
    let failing = up.history_status.load(Ordering::SeqCst);
    if failing != 0 {
        return (StatusCode::from_u16(failing).unwrap(), "nope").into_response();
    }
    if auth == "Bearer tok-1" {
        return (StatusCode::UNAUTHORIZED, "token expired").into_response();
    }
    Json(json!({
        "call_history": [
            {
                "call_uuid": "c-1",
                "direction": "in",
                "from_number": "+79000000001",
                "to_number": "101",
                "start_time_gmt": "2026-10-16 09:00:00",
                "duration": 42,
                "record_uuid": "r-1",
                "hangup_cause": "NORMAL_CLEARING"
            },
            { "call_uuid": "c-2", "flow": "out", "duration": 5 }
        ]
    }))
    .into_response()
}

async fn spawn_upstream() -> (String, Upstream) {
    let up = Upstream::default();
    let app = Router::new()
        .route("/oauth/token", post(issue_token))
        .route("/api/ver1.0/user/", get(user_info))
        .route("/api/ver1.0/client/{id}/call_history/", get(call_history))
        .with_state(up.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/"), up)
}

/// App pointed at `base` with an organization holding an OAuth connection.
async fn connected_org(tag: &str, base: &str) -> (common::TestApp, String) {
    let base = base.to_string();
    let t = common::spawn_app(tag, move |cfg| {
        cfg.telfin.api_base = base.parse().unwrap();
    })
    .await;
    let (org, _) = t.admin(&format!("{tag}@example.com"), tag).await;
    connect(&t, &org).await;
    (t, org)
}

async fn connect(t: &common::TestApp, org: &str) {
    let (status, body) = t
        .request(
            "PUT",
            "/api/telfin/connection",
            Some(json!({
                "organization_id": org,
                "auth_mode": "oauth",
                "client_id": "app-id",
                "client_secret": "app-secret",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

#[tokio::test]
async fn sync_refreshes_rejected_token_and_stores_calls() {
    let (base, upstream) = spawn_upstream().await;
    let t = common::spawn_app("telfin-sync", |cfg| {
        cfg.telfin.api_base = base.parse().unwrap();
    })
    .await;
    let (org, admin) = t.admin("owner@example.com", "Acme").await;

    let (status, body) = t
        .request(
            "PUT",
            "/api/telfin/connection",
            Some(json!({
                "organization_id": org,
                "actor_id": admin,
                "auth_mode": "oauth",
                "client_id": "app-id",
                "client_secret": "app-secret",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body.to_string().find("app-secret").is_none());

    let (status, body) = t
        .request("POST", "/api/telfin/sync", Some(json!({ "organization_id": org })))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["sync"]["fetched"], 2);
    assert_eq!(upstream.tokens_issued.load(Ordering::SeqCst), 2);
    assert_eq!(upstream.history_calls.load(Ordering::SeqCst), 2);

    // The discovered client id is remembered.
    let (_, body) = t
        .request("GET", &format!("/api/telfin/connection?organization_id={org}"), None)
        .await;
    assert_eq!(body["connection"]["telfin_client_id"], "15123");

    let (_, body) = t
        .request("GET", &format!("/api/telfin/calls?organization_id={org}"), None)
        .await;
    let calls = body["calls"].as_array().unwrap();
    assert_eq!(calls.len(), 2);
    let first = calls.iter().find(|c| c["call_uuid"] == "c-1").unwrap();
    assert_eq!(first["duration_seconds"], 42);
    assert_eq!(first["record_uuid"], "r-1");

    // Re-syncing the same window updates rows in place and reuses the token.
    let (status, _) = t
        .request("POST", "/api/telfin/sync", Some(json!({ "organization_id": org })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(upstream.tokens_issued.load(Ordering::SeqCst), 2);
    let (_, body) = t
        .request("GET", &format!("/api/telfin/calls?organization_id={org}"), None)
        .await;
    assert_eq!(body["calls"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn sync_without_connection_is_not_configured() {
    let t = common::spawn_app("telfin-none", |_| {}).await;
    let (org, _) = t.admin("owner@example.com", "Acme").await;
    let (status, body) = t
        .request("POST", "/api/telfin/sync", Some(json!({ "organization_id": org })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "TELFIN-API-001");
}

#[tokio::test]
async fn oauth_connection_requires_client_id() {
    let t = common::spawn_app("telfin-invalid", |_| {}).await;
    let (org, _) = t.admin("owner@example.com", "Acme").await;
    let (status, _) = t
        .request(
            "PUT",
            "/api/telfin/connection",
            Some(json!({ "organization_id": org, "auth_mode": "oauth", "client_secret": "s" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn failed_token_request_leaves_no_token() {
    let (base, upstream) = spawn_upstream().await;
    let base: url::Url = base.parse().unwrap();

    for failing in [401, 500] {
        upstream.token_status.store(failing, Ordering::SeqCst);
        let mut tokens = TelfinTokenManager::new(
            reqwest::Client::new(),
            &base,
            "app-id",
            "app-secret",
            Duration::from_secs(60),
        )
        .unwrap();
        let err = tokens.ensure_valid_token().await.unwrap_err();
        assert!(err.to_string().starts_with("[TELFIN-API-002]"), "{err}");
        assert!(!tokens.has_valid_token());
        assert!(tokens.access_token().is_none());
    }

    upstream.token_status.store(0, Ordering::SeqCst);
    let mut tokens = TelfinTokenManager::new(
        reqwest::Client::new(),
        &base,
        "app-id",
        "app-secret",
        Duration::from_secs(60),
    )
    .unwrap();
    let token = tokens.ensure_valid_token().await.unwrap();
    assert_eq!(token, "tok-1");
    assert!(tokens.has_valid_token());
}

#[tokio::test]
async fn sync_reports_auth_failure_from_token_endpoint() {
    let (base, upstream) = spawn_upstream().await;
    let (t, org) = connected_org("telfin-token-down", &base).await;
    upstream.token_status.store(401, Ordering::SeqCst);

    let (status, body) = t
        .request("POST", "/api/telfin/sync", Some(json!({ "organization_id": org })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "{body}");
    assert_eq!(body["code"], "TELFIN-API-002");
    assert_eq!(upstream.history_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn persistent_rejection_stops_after_max_attempts() {
    let (base, upstream) = spawn_upstream().await;
    let (t, org) = connected_org("telfin-always-401", &base).await;
    upstream.history_status.store(401, Ordering::SeqCst);

    let (status, body) = t
        .request("POST", "/api/telfin/sync", Some(json!({ "organization_id": org })))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY, "{body}");
    assert_eq!(body["code"], "TELFIN-API-003");
    let max_attempts = t.state.cfg.telfin.max_auth_attempts as usize;
    assert_eq!(upstream.history_calls.load(Ordering::SeqCst), max_attempts);
    // tok-1 serves user info and the first attempt; every retry fetches a new one.
    assert_eq!(upstream.tokens_issued.load(Ordering::SeqCst), max_attempts);
}

#[tokio::test]
async fn server_error_is_not_retried() {
    let (base, upstream) = spawn_upstream().await;
    let (t, org) = connected_org("telfin-500", &base).await;
    upstream.history_status.store(500, Ordering::SeqCst);

    let (status, body) = t
        .request("POST", "/api/telfin/sync", Some(json!({ "organization_id": org })))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY, "{body}");
    assert_eq!(body["code"], "TELFIN-API-003");
    assert_eq!(upstream.history_calls.load(Ordering::SeqCst), 1);
    assert_eq!(upstream.tokens_issued.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn same_call_synced_by_two_organizations_stays_separate() {
    let (base, _upstream) = spawn_upstream().await;
    let (t, first) = connected_org("telfin-shared", &base).await;
    let (second, _) = t.admin("second@example.com", "Beta").await;
    connect(&t, &second).await;

    for org in [&first, &second] {
        let (status, body) = t
            .request("POST", "/api/telfin/sync", Some(json!({ "organization_id": org })))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }

    for org in [&first, &second] {
        let (_, body) = t
            .request("GET", &format!("/api/telfin/calls?organization_id={org}"), None)
            .await;
        let calls = body["calls"].as_array().unwrap();
        assert_eq!(calls.len(), 2, "{org}");
        assert!(calls.iter().all(|c| c["organization_id"] == org.as_str()));
    }
}
