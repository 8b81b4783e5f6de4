mod common;

use axum::http::StatusCode;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::{Value, json};

async fn uploaded_call(t: &common::TestApp, org: &str, user: &str) -> Value {
    let (status, body) = t
        .request(
            "POST",
            "/api/calls/upload",
            Some(json!({
                "organization_id": org,
                "user_id": user,
                "customer_phone": "+7 900 000-00-01",
                "customer_name": "Ivan",
                "file_name": "first.MP3",
                "data_base64": STANDARD.encode(b"ID3 fake audio"),
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["call"].clone()
}

#[tokio::test]
async fn upload_then_analysis_then_export() {
    let t = common::spawn_app("export", |_| {}).await;
    let (org, user) = t.admin("owner@example.com", "Acme").await;

    let call = uploaded_call(&t, &org, &user).await;
    let id = call["id"].as_str().unwrap().to_string();
    assert_eq!(call["processing_status"], "pending");
    assert_eq!(call["source"], "upload");
    let path = call["audio_url"].as_str().unwrap();
    assert!(path.ends_with(".mp3"));
    assert!(std::path::Path::new(path).exists());

    let (status, body) = t
        .request(
            "PATCH",
            &format!("/api/calls/{id}/analysis"),
            Some(json!({
                "processing_status": "completed",
                "transcription": "hello, price is fine",
                "general_score": 82.5,
                "duration_seconds": 61,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["call"]["general_score"], 82.5);

    let (status, body) = t
        .request(
            "POST",
            "/api/exports",
            Some(json!({ "organization_id": org, "user_id": user, "format": "csv" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["record_count"], 1);
    assert_eq!(body["content_type"], "text/csv");
    let content = body["content"].as_str().unwrap();
    let mut lines = content.lines();
    assert!(lines.next().unwrap().starts_with("id,created_at,manager_name"));
    let row = lines.next().unwrap();
    assert!(row.starts_with(&id));
    assert!(row.contains("Ivan"));
    assert!(row.contains("\"hello, price is fine\""));
    let file_name = body["file_name"].as_str().unwrap();
    assert!(file_name.starts_with("calls_export_") && file_name.ends_with(".csv"));

    // The export is kept and the requester is told about it.
    let export_id = body["export_id"].as_str().unwrap();
    let (status, _) = t
        .request(
            "GET",
            &format!("/api/exports/{export_id}?organization_id={org}"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = t
        .request("GET", &format!("/api/notifications?user_id={user}"), None)
        .await;
    let kinds: Vec<&str> = body["notifications"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|n| n["type"].as_str())
        .collect();
    assert!(kinds.contains(&"export_ready"), "{kinds:?}");
    assert!(kinds.contains(&"new_call"), "{kinds:?}");

    let (status, body) = t
        .request(
            "POST",
            "/api/exports",
            Some(json!({ "organization_id": org, "format": "txt" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let text = body["content"].as_str().unwrap();
    assert!(text.starts_with(&format!("Call {id}")));
    assert!(text.contains("transcription: hello, price is fine"));
}

#[tokio::test]
async fn export_rejects_unknown_format_and_empty_org_exports_header_only() {
    let t = common::spawn_app("export-edge", |_| {}).await;
    let (org, _) = t.admin("owner@example.com", "Acme").await;

    let (status, body) = t
        .request(
            "POST",
            "/api/exports",
            Some(json!({ "organization_id": org, "format": "pdf" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = t
        .request(
            "POST",
            "/api/exports",
            Some(json!({ "organization_id": org, "format": "csv" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["record_count"], 0);
    assert_eq!(body["content"].as_str().unwrap().lines().count(), 1);
}

#[tokio::test]
async fn analysis_scores_are_bounded() {
    let t = common::spawn_app("analysis", |_| {}).await;
    let (org, user) = t.admin("owner@example.com", "Acme").await;
    let call = uploaded_call(&t, &org, &user).await;
    let id = call["id"].as_str().unwrap();

    let (status, _) = t
        .request(
            "PATCH",
            &format!("/api/calls/{id}/analysis"),
            Some(json!({ "general_score": 140 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = t
        .request("GET", "/api/calls/does-not-exist", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn keyword_recount_counts_transcriptions() {
    let t = common::spawn_app("keywords", |_| {}).await;
    let (org, user) = t.admin("owner@example.com", "Acme").await;
    let call = uploaded_call(&t, &org, &user).await;
    let id = call["id"].as_str().unwrap();
    t.request(
        "PATCH",
        &format!("/api/calls/{id}/analysis"),
        Some(json!({ "transcription": "Discount? A discount, please. DISCOUNT!" })),
    )
    .await;

    let (status, body) = t
        .request(
            "POST",
            "/api/keyword-trackers",
            Some(json!({
                "organization_id": org,
                "name": "Discounts",
                "keywords": ["discount", " "],
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["tracker"]["keywords"], json!(["discount"]));

    let (status, body) = t
        .request(
            "POST",
            "/api/keyword-trackers/recount",
            Some(json!({ "organization_id": org })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["trackers"][0]["mention_count"], 3);
}
