use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{ApiJson, require_non_empty, success};
use crate::db::models::{NotificationType, TelegramSettings, User, UserRole};
use crate::error::CallControlError;
use crate::middleware::RequireTelegramSecret;
use crate::server::AppState;
use crate::service::notifier::format_message;
use crate::service::{ChangeAction, ChangeEvent};
use crate::telegram::types::TelegramUpdate;
use crate::telegram::webhook::process_update;

async fn active_user(state: &AppState, user_id: &str) -> Result<User, CallControlError> {
    match state.storage.get_user(user_id).await? {
        Some(user) if user.is_active => Ok(user),
        _ => Err(CallControlError::NotFound("user")),
    }
}

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub user_id: String,
}

pub async fn start_session(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<StartSessionRequest>,
) -> Result<Json<Value>, CallControlError> {
    let user = active_user(&state, &req.user_id).await?;
    let started = state
        .sessions
        .start(&user.id, user.organization_id.as_deref())
        .await?;
    success(json!({
        "session_code": started.session_code,
        "expires_at": started.expires_at,
        "deep_link": started.deep_link,
        "bot_username": state.cfg.telegram.bot_username,
    }))
}

#[derive(Debug, Deserialize)]
pub struct StartOrgSessionRequest {
    pub user_id: String,
    pub organization_id: String,
}

/// Same as [`start_session`] but pinned to an explicit organization the user belongs to.
pub async fn start_session_org(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<StartOrgSessionRequest>,
) -> Result<Json<Value>, CallControlError> {
    let user = active_user(&state, &req.user_id).await?;
    if user.role != UserRole::Superadmin
        && user.organization_id.as_deref() != Some(req.organization_id.as_str())
    {
        return Err(CallControlError::Forbidden(
            "user does not belong to this organization".to_string(),
        ));
    }
    if state
        .storage
        .get_organization(&req.organization_id)
        .await?
        .is_none()
    {
        return Err(CallControlError::NotFound("organization"));
    }
    let started = state
        .sessions
        .start(&user.id, Some(&req.organization_id))
        .await?;
    success(json!({
        "session_code": started.session_code,
        "expires_at": started.expires_at,
        "deep_link": started.deep_link,
        "organization_id": req.organization_id,
        "bot_username": state.cfg.telegram.bot_username,
    }))
}

pub async fn session_status(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<Value>, CallControlError> {
    let status = state.sessions.status(&code).await?;
    success(status)
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub session_code: String,
    pub chat_id: i64,
    #[serde(default)]
    pub telegram_username: Option<String>,
}

pub async fn confirm(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ConfirmRequest>,
) -> Result<Json<Value>, CallControlError> {
    require_non_empty("session_code", &req.session_code)?;
    let link = state
        .sessions
        .confirm(&req.session_code, req.chat_id, req.telegram_username.as_deref())
        .await?;
    state.events.publish(ChangeEvent::new(
        "telegram_links",
        ChangeAction::Insert,
        &link.id,
        link.organization_id.as_deref(),
    ));
    success(json!({ "link": link }))
}

#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    pub user_id: String,
    pub chat_id: i64,
    #[serde(default)]
    pub telegram_username: Option<String>,
}

pub async fn link(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LinkRequest>,
) -> Result<Json<Value>, CallControlError> {
    let user = active_user(&state, &req.user_id).await?;
    let link = state
        .storage
        .link_chat(
            &user.id,
            user.organization_id.as_deref(),
            req.chat_id,
            req.telegram_username.as_deref(),
        )
        .await?;
    info!(user_id = %user.id, chat_id = req.chat_id, "telegram chat linked directly");
    state.events.publish(ChangeEvent::new(
        "telegram_links",
        ChangeAction::Insert,
        &link.id,
        link.organization_id.as_deref(),
    ));
    success(json!({ "link": link }))
}

pub async fn unlink(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, CallControlError> {
    let user = state
        .storage
        .get_user(&user_id)
        .await?
        .ok_or(CallControlError::NotFound("user"))?;
    let deactivated = state.storage.deactivate_links_for_user(&user_id).await?;
    if deactivated > 0 {
        state.events.publish(ChangeEvent::new(
            "telegram_links",
            ChangeAction::Delete,
            &user_id,
            user.organization_id.as_deref(),
        ));
    }
    success(json!({ "deactivated": deactivated }))
}

#[derive(Debug, Deserialize)]
pub struct SettingsQuery {
    pub organization_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Effective settings: the user's row, else the organization's, else defaults.
pub async fn get_settings(
    State(state): State<AppState>,
    Query(q): Query<SettingsQuery>,
) -> Result<Json<Value>, CallControlError> {
    let settings = state
        .storage
        .effective_telegram_settings(&q.organization_id, q.user_id.as_deref())
        .await?;
    success(json!({ "settings": settings }))
}

#[derive(Debug, Deserialize)]
pub struct SettingsRequest {
    pub organization_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub notify_new_calls: bool,
    pub notify_low_scores: bool,
    #[serde(default)]
    pub notify_processing: bool,
    pub low_score_threshold: f64,
    #[serde(default = "enabled")]
    pub is_active: bool,
}

fn enabled() -> bool {
    true
}

pub async fn save_settings(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SettingsRequest>,
) -> Result<Json<Value>, CallControlError> {
    if !(0.0..=100.0).contains(&req.low_score_threshold) {
        return Err(CallControlError::validation(
            "low_score_threshold must be between 0 and 100",
        ));
    }
    let settings = TelegramSettings {
        id: String::new(),
        organization_id: req.organization_id,
        user_id: req.user_id.filter(|u| !u.is_empty()),
        notify_new_calls: req.notify_new_calls,
        notify_low_scores: req.notify_low_scores,
        notify_processing: req.notify_processing,
        low_score_threshold: req.low_score_threshold,
        is_active: req.is_active,
    };
    let saved = state.storage.save_telegram_settings(&settings).await?;
    state.events.publish(ChangeEvent::new(
        "telegram_settings",
        ChangeAction::Update,
        &saved.id,
        Some(&saved.organization_id),
    ));
    success(json!({ "settings": saved }))
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub chat_id: Option<i64>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub message: String,
    #[serde(default, rename = "type")]
    pub kind: Option<NotificationType>,
}

impl SendRequest {
    fn text(&self) -> Result<String, CallControlError> {
        require_non_empty("message", &self.message)?;
        Ok(match self.title.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(title) => format_message(title, &self.message),
            None => format_message(&self.message, ""),
        })
    }
}

fn ensure_bot(state: &AppState) -> Result<(), CallControlError> {
    if state.bot.is_configured() {
        Ok(())
    } else {
        Err(CallControlError::TelegramNotConfigured)
    }
}

/// Explicit send to a chat id, or to a user's linked chat.
pub async fn send_notification(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SendRequest>,
) -> Result<Json<Value>, CallControlError> {
    ensure_bot(&state)?;
    let text = req.text()?;
    let delivery = match (req.chat_id, req.user_id.as_deref()) {
        (Some(chat_id), _) => state.notifier.deliver_to_chat(chat_id, text).await?,
        (None, Some(user_id)) => {
            state
                .notifier
                .deliver_to_user(user_id, req.kind, text)
                .await?
        }
        (None, None) => {
            return Err(CallControlError::validation(
                "either chat_id or user_id is required",
            ));
        }
    };
    success(json!({ "delivery": delivery }))
}

/// Broadcast to every active link of an organization, honouring its settings.
pub async fn send_org_notification(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SendRequest>,
) -> Result<Json<Value>, CallControlError> {
    ensure_bot(&state)?;
    let text = req.text()?;
    let org = req
        .organization_id
        .as_deref()
        .ok_or_else(|| CallControlError::validation("organization_id is required"))?;
    let delivery = state
        .notifier
        .deliver_to_organization(org, req.kind, text)
        .await?;
    success(json!({ "delivery": delivery }))
}

/// The caller's own linked chat.
pub async fn send_personal_notification(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SendRequest>,
) -> Result<Json<Value>, CallControlError> {
    ensure_bot(&state)?;
    let text = req.text()?;
    let user_id = req
        .user_id
        .as_deref()
        .ok_or_else(|| CallControlError::validation("user_id is required"))?;
    let user = active_user(&state, user_id).await?;
    if state.storage.active_link_for_user(&user.id).await?.is_none() {
        return Err(CallControlError::NotFound("telegram link"));
    }
    let delivery = state
        .notifier
        .deliver_to_user(&user.id, req.kind, text)
        .await?;
    success(json!({ "delivery": delivery }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookAction {
    Set,
    Delete,
    Info,
    Me,
}

#[derive(Debug, Deserialize)]
pub struct WebhookSetupRequest {
    pub action: WebhookAction,
    #[serde(default)]
    pub url: Option<String>,
}

pub async fn webhook_setup(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<WebhookSetupRequest>,
) -> Result<Json<Value>, CallControlError> {
    ensure_bot(&state)?;
    let tg = state.cfg.telegram();
    let result = match req.action {
        WebhookAction::Set => {
            let url = match req.url.filter(|u| !u.trim().is_empty()) {
                Some(url) => url::Url::parse(url.trim())?,
                None => tg.webhook_url.clone().ok_or_else(|| {
                    CallControlError::validation("url is required when no webhook_url is configured")
                })?,
            };
            if url.scheme() != "https" {
                return Err(CallControlError::validation("webhook url must use https"));
            }
            let ok = state
                .bot
                .set_webhook(url.as_str(), tg.webhook_secret.as_deref())
                .await?;
            info!(url = %url, "telegram webhook registered");
            json!({ "ok": ok, "url": url })
        }
        WebhookAction::Delete => json!({ "ok": state.bot.delete_webhook().await? }),
        WebhookAction::Info => serde_json::to_value(state.bot.get_webhook_info().await?)?,
        WebhookAction::Me => serde_json::to_value(state.bot.get_me().await?)?,
    };
    success(json!({ "result": result }))
}

/// Inbound updates. Always acknowledged so Telegram does not redeliver.
pub async fn webhook(
    State(state): State<AppState>,
    _secret: RequireTelegramSecret,
    ApiJson(update): ApiJson<TelegramUpdate>,
) -> Json<Value> {
    let update_id = update.update_id;
    let chat_id = update
        .message
        .as_ref()
        .or(update.edited_message.as_ref())
        .map(|m| m.chat.id);
    match process_update(&state.bot, &state.sessions, &state.storage, update).await {
        Ok(outcome) => {
            let link_changed = outcome.as_ref().is_some_and(|o| o.link_changed);
            if let Some(chat_id) = chat_id
                && link_changed
            {
                state.events.publish(ChangeEvent::new(
                    "telegram_links",
                    ChangeAction::Update,
                    chat_id.to_string(),
                    None,
                ));
            }
            Json(json!({
                "ok": true,
                "handled": outcome.is_some(),
                "link_changed": link_changed,
            }))
        }
        Err(e) => {
            warn!(update_id, error = %e, "telegram update processing failed");
            Json(json!({ "ok": false }))
        }
    }
}
