use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ApiJson, success};
use crate::error::CallControlError;
use crate::server::AppState;
use crate::service::keywords::{self, TrackerInput};
use crate::service::{ChangeAction, ChangeEvent};

#[derive(Debug, Deserialize)]
pub struct TrackerQuery {
    pub organization_id: String,
    #[serde(default)]
    pub include_inactive: bool,
}

pub async fn list_trackers(
    State(state): State<AppState>,
    Query(q): Query<TrackerQuery>,
) -> Result<Json<Value>, CallControlError> {
    let trackers = state
        .storage
        .list_trackers(&q.organization_id, q.include_inactive)
        .await?;
    success(json!({ "trackers": trackers }))
}

pub async fn create_tracker(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<TrackerInput>,
) -> Result<Json<Value>, CallControlError> {
    let tracker = keywords::create(&state.storage, input).await?;
    state.events.publish(ChangeEvent::new(
        "keyword_trackers",
        ChangeAction::Insert,
        &tracker.id,
        Some(&tracker.organization_id),
    ));
    success(json!({ "tracker": tracker }))
}

pub async fn update_tracker(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<TrackerInput>,
) -> Result<Json<Value>, CallControlError> {
    let tracker = keywords::update(&state.storage, &id, input).await?;
    state.events.publish(ChangeEvent::new(
        "keyword_trackers",
        ChangeAction::Update,
        &tracker.id,
        Some(&tracker.organization_id),
    ));
    success(json!({ "tracker": tracker }))
}

#[derive(Debug, Deserialize)]
pub struct OrgScope {
    pub organization_id: String,
}

/// Soft delete.
pub async fn delete_tracker(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<OrgScope>,
) -> Result<Json<Value>, CallControlError> {
    match state.storage.get_tracker(&id).await? {
        Some(t) if t.organization_id == q.organization_id => {}
        _ => return Err(CallControlError::NotFound("keyword tracker")),
    }
    state.storage.deactivate_tracker(&id).await?;
    state.events.publish(ChangeEvent::new(
        "keyword_trackers",
        ChangeAction::Delete,
        &id,
        Some(&q.organization_id),
    ));
    success(json!({ "id": id }))
}

pub async fn recount(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<OrgScope>,
) -> Result<Json<Value>, CallControlError> {
    let counts = keywords::recount(&state.storage, &req.organization_id).await?;
    state.events.publish(ChangeEvent::new(
        "keyword_trackers",
        ChangeAction::Update,
        &req.organization_id,
        Some(&req.organization_id),
    ));
    success(json!({ "trackers": counts }))
}
