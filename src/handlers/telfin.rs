use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ApiJson, OrgQuery, success};
use crate::db::models::TelfinConnectionView;
use crate::error::CallControlError;
use crate::server::AppState;
use crate::service::{ChangeAction, ChangeEvent};
use crate::telfin::service::TelfinConnectionInput;

#[derive(Debug, Deserialize)]
pub struct SaveConnectionRequest {
    pub organization_id: String,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(flatten)]
    pub connection: TelfinConnectionInput,
}

pub async fn save_connection(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SaveConnectionRequest>,
) -> Result<Json<Value>, CallControlError> {
    if state
        .storage
        .get_organization(&req.organization_id)
        .await?
        .is_none()
    {
        return Err(CallControlError::NotFound("organization"));
    }
    let saved = state
        .telfin
        .save_connection(&req.organization_id, req.connection)
        .await?;
    state
        .storage
        .record_audit(
            Some(&req.organization_id),
            req.actor_id.as_deref(),
            "save",
            "telfin_connection",
            Some(&saved.id),
            Some(json!({ "auth_mode": saved.auth_mode, "is_active": saved.is_active })),
        )
        .await?;
    state.events.publish(ChangeEvent::new(
        "telfin_connections",
        ChangeAction::Update,
        &saved.id,
        Some(&req.organization_id),
    ));
    success(json!({ "connection": TelfinConnectionView::from(&saved) }))
}

pub async fn get_connection(
    State(state): State<AppState>,
    Query(q): Query<OrgQuery>,
) -> Result<Json<Value>, CallControlError> {
    let conn = state
        .storage
        .get_telfin_connection(&q.organization_id)
        .await?
        .ok_or(CallControlError::NotFound("telfin connection"))?;
    success(json!({ "connection": TelfinConnectionView::from(&conn) }))
}

#[derive(Debug, Deserialize)]
pub struct OrgBody {
    pub organization_id: String,
}

pub async fn test_connection(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<OrgBody>,
) -> Result<Json<Value>, CallControlError> {
    let check = state.telfin.test_connection(&req.organization_id).await?;
    success(json!({ "connection": check }))
}

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub organization_id: String,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

/// Defaults to the last 24 hours.
pub async fn sync_calls(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SyncRequest>,
) -> Result<Json<Value>, CallControlError> {
    let end = req.end.unwrap_or_else(Utc::now);
    let start = req.start.unwrap_or(end - Duration::days(1));
    let report = state
        .telfin
        .sync_calls(&req.organization_id, start, end)
        .await?;
    state.events.publish(ChangeEvent::new(
        "telfin_calls",
        ChangeAction::Update,
        &req.organization_id,
        Some(&req.organization_id),
    ));
    success(json!({ "sync": report }))
}

pub async fn list_calls(
    State(state): State<AppState>,
    Query(q): Query<OrgQuery>,
) -> Result<Json<Value>, CallControlError> {
    let calls = state
        .storage
        .list_telfin_calls(&q.organization_id, q.limit(100, 1000))
        .await?;
    success(json!({ "calls": calls }))
}

pub async fn storage_url(
    State(state): State<AppState>,
    Path(record_uuid): Path<String>,
    Query(q): Query<OrgQuery>,
) -> Result<Json<Value>, CallControlError> {
    let url = state
        .telfin
        .storage_url(&q.organization_id, &record_uuid)
        .await?;
    success(json!({ "url": url.url, "raw": url.raw }))
}

pub async fn download_record(
    State(state): State<AppState>,
    Path(record_uuid): Path<String>,
    Query(q): Query<OrgQuery>,
) -> Result<Response, CallControlError> {
    let (content_type, bytes) = state
        .telfin
        .download_record(&q.organization_id, &record_uuid)
        .await?;
    let content_type = content_type
        .and_then(|ct| HeaderValue::from_str(&ct).ok())
        .unwrap_or(HeaderValue::from_static("audio/mpeg"));
    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}.mp3\"",
        record_uuid.replace(['"', '\\', '/'], "_")
    ))
    .unwrap_or(HeaderValue::from_static("attachment"));
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(bytes),
    )
        .into_response())
}
