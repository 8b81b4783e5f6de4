use axum::{Json, extract::State};
use serde_json::Value;

use super::success;
use crate::error::CallControlError;
use crate::server::AppState;

/// Liveness plus a database round trip.
pub async fn health(State(state): State<AppState>) -> Result<Json<Value>, CallControlError> {
    sqlx::query("SELECT 1").execute(state.storage.pool()).await?;
    success(serde_json::json!({
        "status": "ok",
        "telegram_configured": state.bot.is_configured(),
    }))
}
