use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{ApiJson, success};
use crate::db::CallFilter;
use crate::db::models::{ExportFormat, ExportRecord, NotificationType, new_id};
use crate::error::CallControlError;
use crate::server::AppState;
use crate::service::export;
use crate::service::notifier::{NewNotification, create_notifications};
use crate::service::{ChangeAction, ChangeEvent};

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub organization_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub format: String,
    #[serde(default)]
    pub date_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub manager_id: Option<String>,
}

pub async fn generate_export(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ExportRequest>,
) -> Result<Json<Value>, CallControlError> {
    let format: ExportFormat = req.format.parse()?;
    if let (Some(from), Some(to)) = (req.date_from, req.date_to)
        && from > to
    {
        return Err(CallControlError::validation("date_from must not be after date_to"));
    }
    let filter = CallFilter {
        date_from: req.date_from,
        date_to: req.date_to,
        manager_id: req.manager_id.clone(),
    };
    let rows = state
        .storage
        .calls_for_export(&req.organization_id, &filter)
        .await?;
    let generated = export::generate(&rows, format)?;

    let now = Utc::now();
    let record = ExportRecord {
        id: new_id(),
        organization_id: req.organization_id.clone(),
        user_id: req.user_id.clone(),
        format,
        file_name: generated.file_name(now),
        content: generated.content,
        record_count: generated.record_count as i64,
        created_at: now,
    };
    state.storage.insert_export(&record).await?;
    state
        .storage
        .record_audit(
            Some(&record.organization_id),
            record.user_id.as_deref(),
            "export",
            "calls",
            Some(&record.id),
            Some(json!({
                "format": format,
                "record_count": record.record_count,
                "manager_id": req.manager_id,
            })),
        )
        .await?;
    info!(export_id = %record.id, organization_id = %record.organization_id, record_count = record.record_count, "export generated");

    if let Some(user_id) = &record.user_id
        && let Err(e) = create_notifications(
            &state.storage,
            &state.notifier,
            NewNotification {
                user_id: Some(user_id.clone()),
                organization_id: Some(record.organization_id.clone()),
                kind: NotificationType::ExportReady,
                title: "Export ready".to_string(),
                message: format!("{} ({} calls)", record.file_name, record.record_count),
                data: Some(json!({ "export_id": record.id })),
                send_telegram: false,
            },
        )
        .await
    {
        warn!(export_id = %record.id, error = %e, "export_ready notification failed");
    }
    state.events.publish(ChangeEvent::new(
        "exports",
        ChangeAction::Insert,
        &record.id,
        Some(&record.organization_id),
    ));

    success(json!({
        "export_id": record.id,
        "file_name": record.file_name,
        "content_type": format.content_type(),
        "content": record.content,
        "record_count": record.record_count,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ExportScope {
    pub organization_id: String,
}

/// Re-download a stored export as a file.
pub async fn download_export(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<ExportScope>,
) -> Result<Response, CallControlError> {
    let record = match state.storage.get_export(&id).await? {
        Some(r) if r.organization_id == q.organization_id => r,
        _ => return Err(CallControlError::NotFound("export")),
    };
    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        record.file_name
    ))
    .unwrap_or(HeaderValue::from_static("attachment"));
    Ok((
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static(record.format.content_type()),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        record.content,
    )
        .into_response())
}
