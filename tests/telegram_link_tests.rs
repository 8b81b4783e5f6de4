mod common;

use axum::http::StatusCode;
use callcontrol::db::models::{TelegramSession, new_id};
use chrono::{Duration, Utc};
use serde_json::json;

#[tokio::test]
async fn session_code_links_a_chat_exactly_once() {
    let t = common::spawn_app("tg-once", |_| {}).await;
    let (org, owner) = t.admin("owner@example.com", "Acme").await;

    let (status, started) = t
        .request("POST", "/api/telegram/sessions", Some(json!({ "user_id": owner })))
        .await;
    assert_eq!(status, StatusCode::OK, "{started}");
    let code = started["session_code"].as_str().unwrap().to_string();
    assert_eq!(code.len(), 8);

    let (_, status_body) = t
        .request("GET", &format!("/api/telegram/sessions/{code}"), None)
        .await;
    assert_eq!(status_body["status"], "pending");

    // Codes are matched case-insensitively.
    let confirm = json!({
        "session_code": code.to_lowercase(),
        "chat_id": 4242,
        "telegram_username": "owner",
    });
    let (status, body) = t
        .request("POST", "/api/telegram/confirm", Some(confirm.clone()))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["link"]["chat_id"], 4242);
    assert_eq!(body["link"]["organization_id"], org.as_str());

    let (status, body) = t.request("POST", "/api/telegram/confirm", Some(confirm)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "SESSION_USED");

    let (_, status_body) = t
        .request("GET", &format!("/api/telegram/sessions/{code}"), None)
        .await;
    assert_eq!(status_body["status"], "connected");
    assert_eq!(status_body["chat_id"], 4242);
}

#[tokio::test]
async fn chat_cannot_be_claimed_by_a_second_user() {
    let t = common::spawn_app("tg-conflict", |_| {}).await;
    let (org, owner) = t.admin("owner@example.com", "Acme").await;
    let operator = t.member("op@example.com", &org).await;

    let (status, _) = t
        .request(
            "POST",
            "/api/telegram/link",
            Some(json!({ "user_id": owner, "chat_id": 77 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, started) = t
        .request("POST", "/api/telegram/sessions", Some(json!({ "user_id": operator })))
        .await;
    let code = started["session_code"].as_str().unwrap().to_string();
    let (status, body) = t
        .request(
            "POST",
            "/api/telegram/confirm",
            Some(json!({ "session_code": code, "chat_id": 77 })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CHAT_ALREADY_LINKED");

    // The failed confirm left the code usable.
    let (_, status_body) = t
        .request("GET", &format!("/api/telegram/sessions/{code}"), None)
        .await;
    assert_eq!(status_body["status"], "pending");

    // After unlinking, the chat is free again.
    let (status, body) = t
        .request("DELETE", &format!("/api/telegram/link/{owner}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deactivated"], 1);
    let (status, _) = t
        .request(
            "POST",
            "/api/telegram/confirm",
            Some(json!({ "session_code": code, "chat_id": 77 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn expired_and_unknown_codes() {
    let t = common::spawn_app("tg-expired", |_| {}).await;
    let (org, owner) = t.admin("owner@example.com", "Acme").await;

    let now = Utc::now();
    let stale = TelegramSession {
        id: new_id(),
        user_id: owner.clone(),
        organization_id: Some(org),
        session_code: "ZZZZ2222".to_string(),
        expires_at: now - Duration::minutes(1),
        used: false,
        used_at: None,
        created_at: now - Duration::minutes(11),
    };
    t.state.storage.insert_session(&stale).await.unwrap();

    let (_, body) = t
        .request("GET", "/api/telegram/sessions/ZZZZ2222", None)
        .await;
    assert_eq!(body["status"], "expired");

    let (status, body) = t
        .request(
            "POST",
            "/api/telegram/confirm",
            Some(json!({ "session_code": "ZZZZ2222", "chat_id": 5 })),
        )
        .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["code"], "SESSION_EXPIRED");

    let (_, body) = t
        .request("GET", "/api/telegram/sessions/NOPE0000", None)
        .await;
    assert_eq!(body["status"], "not_found");

    let (status, body) = t
        .request(
            "POST",
            "/api/telegram/confirm",
            Some(json!({ "session_code": "NOPE0000", "chat_id": 5 })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn explicit_send_requires_a_bot() {
    let t = common::spawn_app("tg-nobot", |_| {}).await;
    let (status, body) = t
        .request(
            "POST",
            "/api/telegram/notifications",
            Some(json!({ "chat_id": 1, "title": "Hi", "message": "there" })),
        )
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "TELEGRAM_NOT_CONFIGURED");
}

fn update(chat_id: i64, text: &str) -> serde_json::Value {
    json!({
        "update_id": 10,
        "message": {
            "message_id": 1,
            "date": 1_760_000_000,
            "chat": { "id": chat_id, "type": "private", "username": "boss" },
            "from": { "id": chat_id, "is_bot": false, "first_name": "Boss", "username": "boss" },
            "text": text,
        }
    })
}

#[tokio::test]
async fn start_command_in_chat_confirms_the_code() {
    let t = common::spawn_app("tg-webhook", |_| {}).await;
    let (_, owner) = t.admin("owner@example.com", "Acme").await;
    let (_, started) = t
        .request("POST", "/api/telegram/sessions", Some(json!({ "user_id": owner })))
        .await;
    let code = started["session_code"].as_str().unwrap().to_string();

    let (status, body) = t
        .send(
            axum::http::Request::builder().method("POST").uri("/telegram/webhook"),
            Some(update(99, &format!("/start {code}"))),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["handled"], true);
    assert_eq!(body["link_changed"], true);

    // Replies that leave the link alone publish nothing.
    let mut feed = t.state.events.subscribe();
    for text in ["/status", "hello"] {
        let (_, body) = t
            .send(
                axum::http::Request::builder().method("POST").uri("/telegram/webhook"),
                Some(update(99, text)),
            )
            .await;
        assert_eq!(body["handled"], true);
        assert_eq!(body["link_changed"], false);
    }
    assert!(feed.try_recv().is_err());

    let (_, status_body) = t
        .request("GET", &format!("/api/telegram/sessions/{code}"), None)
        .await;
    assert_eq!(status_body["status"], "connected");
    assert_eq!(status_body["chat_id"], 99);
    assert_eq!(status_body["telegram_username"], "boss");

    let (_, body) = t
        .send(
            axum::http::Request::builder().method("POST").uri("/telegram/webhook"),
            Some(update(99, "/stop")),
        )
        .await;
    assert_eq!(body["link_changed"], true);
    let event = feed.try_recv().expect("unlink publishes a change");
    assert_eq!(event.table, "telegram_links");
    let link = t.state.storage.active_link_for_user(&owner).await.unwrap();
    assert!(link.is_none());
}

#[tokio::test]
async fn new_session_replaces_the_pending_one() {
    let t = common::spawn_app("tg-replace", |_| {}).await;
    let (_, owner) = t.admin("owner@example.com", "Acme").await;

    let (_, first) = t
        .request("POST", "/api/telegram/sessions", Some(json!({ "user_id": owner })))
        .await;
    let (_, second) = t
        .request("POST", "/api/telegram/sessions", Some(json!({ "user_id": owner })))
        .await;
    let first = first["session_code"].as_str().unwrap();
    let second = second["session_code"].as_str().unwrap();

    let (_, body) = t
        .request("GET", &format!("/api/telegram/sessions/{first}"), None)
        .await;
    assert_eq!(body["status"], "not_found");
    let (_, body) = t
        .request("GET", &format!("/api/telegram/sessions/{second}"), None)
        .await;
    assert_eq!(body["status"], "pending");
}
