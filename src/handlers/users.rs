use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ApiJson, OrgQuery, require_non_empty, success};
use crate::db::models::UserRole;
use crate::error::CallControlError;
use crate::server::AppState;
use crate::service::profiles::{self, CreateProfile};
use crate::service::{ChangeAction, ChangeEvent};

pub async fn create_profile(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateProfile>,
) -> Result<Json<Value>, CallControlError> {
    let (user, organization) = profiles::create_profile(&state.storage, req).await?;
    if let Some(org) = &organization {
        state.events.publish(ChangeEvent::new(
            "organizations",
            ChangeAction::Insert,
            &org.id,
            Some(&org.id),
        ));
    }
    state.events.publish(ChangeEvent::new(
        "users",
        ChangeAction::Insert,
        &user.id,
        user.organization_id.as_deref(),
    ));
    success(json!({ "user": user, "organization": organization }))
}

pub async fn list_users(
    State(state): State<AppState>,
    Query(q): Query<OrgQuery>,
) -> Result<Json<Value>, CallControlError> {
    let users = state.storage.list_users(&q.organization_id).await?;
    success(json!({ "users": users }))
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub actor_id: String,
    pub role: UserRole,
}

pub async fn change_role(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<ChangeRoleRequest>,
) -> Result<Json<Value>, CallControlError> {
    let user = profiles::change_role(&state.storage, &req.actor_id, &id, req.role).await?;
    state.events.publish(ChangeEvent::new(
        "users",
        ChangeAction::Update,
        &user.id,
        user.organization_id.as_deref(),
    ));
    success(json!({ "user": user }))
}

#[derive(Debug, Deserialize)]
pub struct ActorQuery {
    pub actor_id: String,
}

pub async fn deactivate_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<ActorQuery>,
) -> Result<Json<Value>, CallControlError> {
    let user = profiles::deactivate(&state.storage, &q.actor_id, &id).await?;
    state.events.publish(ChangeEvent::new(
        "users",
        ChangeAction::Delete,
        &user.id,
        user.organization_id.as_deref(),
    ));
    success(json!({ "user": user }))
}

pub async fn list_managers(
    State(state): State<AppState>,
    Query(q): Query<OrgQuery>,
) -> Result<Json<Value>, CallControlError> {
    let managers = state.storage.list_managers(&q.organization_id).await?;
    success(json!({ "managers": managers }))
}

#[derive(Debug, Deserialize)]
pub struct NewManager {
    pub organization_id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

pub async fn create_manager(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<NewManager>,
) -> Result<Json<Value>, CallControlError> {
    require_non_empty("name", &req.name)?;
    if state
        .storage
        .get_organization(&req.organization_id)
        .await?
        .is_none()
    {
        return Err(CallControlError::NotFound("organization"));
    }
    let manager = state
        .storage
        .insert_manager(
            &req.organization_id,
            req.name.trim(),
            req.email.as_deref(),
            req.phone.as_deref(),
        )
        .await?;
    state.events.publish(ChangeEvent::new(
        "managers",
        ChangeAction::Insert,
        &manager.id,
        Some(&manager.organization_id),
    ));
    success(json!({ "manager": manager }))
}
