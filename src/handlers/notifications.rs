use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ApiJson, success};
use crate::error::CallControlError;
use crate::server::AppState;
use crate::service::notifier::{NewNotification, create_notifications};
use crate::service::{ChangeAction, ChangeEvent};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub user_id: String,
    #[serde(default)]
    pub unread_only: bool,
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Value>, CallControlError> {
    let limit = q.limit.unwrap_or(50).clamp(1, 200);
    let notifications = state
        .storage
        .list_notifications(&q.user_id, q.unread_only, limit)
        .await?;
    let unread_count = state.storage.unread_count(&q.user_id).await?;
    success(json!({ "notifications": notifications, "unread_count": unread_count }))
}

pub async fn create_notification(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<NewNotification>,
) -> Result<Json<Value>, CallControlError> {
    let created = create_notifications(&state.storage, &state.notifier, req).await?;
    for n in &created {
        state.events.publish(ChangeEvent::new(
            "notifications",
            ChangeAction::Insert,
            &n.id,
            n.organization_id.as_deref(),
        ));
    }
    success(json!({ "created": created.len(), "notifications": created }))
}

#[derive(Debug, Deserialize)]
pub struct UserBody {
    pub user_id: String,
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UserBody>,
) -> Result<Json<Value>, CallControlError> {
    state
        .storage
        .mark_notification_read(&id, &req.user_id)
        .await?;
    state
        .events
        .publish(ChangeEvent::new("notifications", ChangeAction::Update, &id, None));
    success(json!({ "id": id }))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<UserBody>,
) -> Result<Json<Value>, CallControlError> {
    let updated = state
        .storage
        .mark_all_notifications_read(&req.user_id)
        .await?;
    success(json!({ "updated": updated }))
}
