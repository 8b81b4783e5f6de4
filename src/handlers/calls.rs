use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde_json::{Value, json};

use super::{ApiJson, OrgQuery, success};
use crate::db::CallAnalysisUpdate;
use crate::error::CallControlError;
use crate::server::AppState;
use crate::service::calls::{self, UploadRequest};
use crate::service::{ChangeAction, ChangeEvent};

pub async fn upload_audio(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<UploadRequest>,
) -> Result<Json<Value>, CallControlError> {
    let call = calls::upload_audio(&state.storage, &state.notifier, &state.cfg.basic, req).await?;
    state.events.publish(ChangeEvent::new(
        "calls",
        ChangeAction::Insert,
        &call.id,
        Some(&call.organization_id),
    ));
    success(json!({ "call": call }))
}

pub async fn list_calls(
    State(state): State<AppState>,
    Query(q): Query<OrgQuery>,
) -> Result<Json<Value>, CallControlError> {
    let calls = state
        .storage
        .list_calls(&q.organization_id, q.limit(50, 500), q.offset())
        .await?;
    success(json!({ "calls": calls }))
}

pub async fn get_call(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, CallControlError> {
    let call = state
        .storage
        .get_call(&id)
        .await?
        .ok_or(CallControlError::NotFound("call"))?;
    success(json!({ "call": call }))
}

pub async fn record_analysis(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(update): ApiJson<CallAnalysisUpdate>,
) -> Result<Json<Value>, CallControlError> {
    let call = calls::record_analysis(&state.storage, &state.notifier, &id, update).await?;
    state.events.publish(ChangeEvent::new(
        "calls",
        ChangeAction::Update,
        &call.id,
        Some(&call.organization_id),
    ));
    success(json!({ "call": call }))
}
