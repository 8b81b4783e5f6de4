use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{OrgQuery, success};
use crate::db::models::ArticleStatus;
use crate::error::CallControlError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct ArticleQuery {
    pub organization_id: String,
    #[serde(default)]
    pub status: Option<ArticleStatus>,
}

pub async fn list_articles(
    State(state): State<AppState>,
    Query(q): Query<ArticleQuery>,
) -> Result<Json<Value>, CallControlError> {
    let articles = state
        .storage
        .list_articles(&q.organization_id, q.status)
        .await?;
    success(json!({ "articles": articles }))
}

pub async fn list_audit_logs(
    State(state): State<AppState>,
    Query(q): Query<OrgQuery>,
) -> Result<Json<Value>, CallControlError> {
    let logs = state
        .storage
        .list_audit_logs(&q.organization_id, q.limit(100, 1000))
        .await?;
    success(json!({ "audit_logs": logs }))
}
