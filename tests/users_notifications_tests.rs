mod common;

use axum::http::StatusCode;
use serde_json::json;

#[tokio::test]
async fn role_changes_respect_hierarchy() {
    let t = common::spawn_app("roles", |_| {}).await;
    let (org, admin) = t.admin("owner@example.com", "Acme").await;
    let operator = t.member("op@example.com", &org).await;

    let (status, body) = t
        .request(
            "PATCH",
            &format!("/api/users/{operator}/role"),
            Some(json!({ "actor_id": admin, "role": "manager" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["user"]["role"], "manager");

    // Nobody below superadmin can hand out their own rank.
    let (status, _) = t
        .request(
            "PATCH",
            &format!("/api/users/{operator}/role"),
            Some(json!({ "actor_id": admin, "role": "admin" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = t
        .request(
            "PATCH",
            &format!("/api/users/{admin}/role"),
            Some(json!({ "actor_id": operator, "role": "viewer" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = t
        .request(
            "DELETE",
            &format!("/api/users/{operator}?actor_id={admin}"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["user"]["is_active"], false);

    let (status, _) = t
        .request(
            "POST",
            "/api/users/profile",
            Some(json!({ "email": "OWNER@example.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn org_notifications_reach_every_active_member() {
    let t = common::spawn_app("notifications", |_| {}).await;
    let (org, admin) = t.admin("owner@example.com", "Acme").await;
    let operator = t.member("op@example.com", &org).await;

    let (status, body) = t
        .request(
            "POST",
            "/api/notifications",
            Some(json!({
                "organization_id": org,
                "type": "system",
                "title": "Maintenance",
                "message": "Tonight at 22:00",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["created"], 2);

    let (_, body) = t
        .request(
            "GET",
            &format!("/api/notifications?user_id={operator}&unread_only=true"),
            None,
        )
        .await;
    assert_eq!(body["unread_count"], 1);
    let id = body["notifications"][0]["id"].as_str().unwrap().to_string();

    // Another user's id cannot mark it read.
    let (status, _) = t
        .request(
            "POST",
            &format!("/api/notifications/{id}/read"),
            Some(json!({ "user_id": admin })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = t
        .request(
            "POST",
            &format!("/api/notifications/{id}/read"),
            Some(json!({ "user_id": operator })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = t
        .request(
            "POST",
            "/api/notifications/read-all",
            Some(json!({ "user_id": admin })),
        )
        .await;
    assert_eq!(body["updated"], 1);

    let (_, body) = t
        .request("GET", &format!("/api/audit-logs?organization_id={org}"), None)
        .await;
    assert!(!body["audit_logs"].as_array().unwrap().is_empty());
}
