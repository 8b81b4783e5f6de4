mod common;

use axum::http::{Request, StatusCode};
use serde_json::json;

#[tokio::test]
async fn api_routes_require_the_service_key() {
    let t = common::spawn_app("auth", |_| {}).await;

    let (status, body) = t
        .send(Request::builder().method("GET").uri("/api/users?organization_id=x"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = t
        .send(
            Request::builder()
                .method("GET")
                .uri("/api/users?organization_id=x")
                .header("x-api-key", "wrong"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = t
        .send(
            Request::builder()
                .method("GET")
                .uri("/api/users?organization_id=x")
                .header("authorization", format!("Bearer {}", common::API_KEY)),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["users"], json!([]));
}

#[tokio::test]
async fn health_is_public() {
    let t = common::spawn_app("health", |_| {}).await;
    let (status, body) = t
        .send(Request::builder().method("GET").uri("/health"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["telegram_configured"], false);
}

#[tokio::test]
async fn webhook_checks_secret_token() {
    let t = common::spawn_app("webhook-secret", |cfg| {
        cfg.telegram.webhook_secret = Some("hook".to_string());
    })
    .await;
    let update = json!({ "update_id": 1 });

    let (status, _) = t
        .send(
            Request::builder().method("POST").uri("/telegram/webhook"),
            Some(update.clone()),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = t
        .send(
            Request::builder()
                .method("POST")
                .uri("/telegram/webhook")
                .header("x-telegram-bot-api-secret-token", "hook"),
            Some(update),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn oversized_upload_returns_413() {
    let t = common::spawn_app("body-limit", |cfg| {
        cfg.basic.max_upload_bytes = 1024;
    })
    .await;
    let (org, user) = t.admin("owner@example.com", "Acme").await;

    let payload = json!({
        "organization_id": org,
        "user_id": user,
        "file_name": "call.mp3",
        "data_base64": "A".repeat(256 * 1024),
    });
    let (status, body) = t.request("POST", "/api/calls/upload", Some(payload)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["code"], "PAYLOAD_TOO_LARGE");
}

#[tokio::test]
async fn upload_rejects_audio_over_limit_inside_body_limit() {
    let t = common::spawn_app("audio-limit", |cfg| {
        cfg.basic.max_upload_bytes = 1024;
    })
    .await;
    let (org, user) = t.admin("owner@example.com", "Acme").await;

    // 1500 decoded bytes: under the body limit, over the audio limit.
    let payload = json!({
        "organization_id": org,
        "user_id": user,
        "file_name": "call.mp3",
        "data_base64": "A".repeat(2000),
    });
    let (status, body) = t.request("POST", "/api/calls/upload", Some(payload)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE, "{body}");
}

#[tokio::test]
async fn unset_service_key_refuses_everything() {
    let t = common::spawn_app("no-key", |cfg| {
        cfg.basic.api_key = callcontrol::config::Config::default().basic.api_key;
    })
    .await;
    for header in [("x-api-key", ""), ("authorization", "Bearer change-me")] {
        let (status, body) = t
            .send(
                Request::builder()
                    .method("GET")
                    .uri("/api/users?organization_id=x")
                    .header(header.0, header.1),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{header:?}");
        assert_eq!(body["code"], "UNAUTHORIZED");
    }
}
