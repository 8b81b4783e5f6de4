use axum::extract::{DefaultBodyLimit, FromRef};
use axum::routing::{delete, get, patch, post, put};
use axum::{Router, middleware};
use std::sync::Arc;

use crate::config::Config;
use crate::db::Storage;
use crate::error::CallControlError;
use crate::handlers::{
    calls, events, exports, health, notifications, records, telegram, telfin, trackers, users,
};
use crate::middleware::{ApiKey, RequireApiKey, WebhookSecret};
use crate::service::{EventBus, NotifierHandle, notifier};
use crate::telegram::{SessionService, TelegramBot};
use crate::telfin::TelfinService;

/// JSON envelope and base64 overhead on top of the raw audio limit.
fn body_limit(max_upload_bytes: usize) -> usize {
    max_upload_bytes
        .saturating_mul(4)
        .div_ceil(3)
        .saturating_add(64 * 1024)
}

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub storage: Storage,
    pub bot: TelegramBot,
    pub sessions: SessionService,
    pub telfin: TelfinService,
    pub notifier: NotifierHandle,
    pub events: EventBus,
    api_key: ApiKey,
    webhook_secret: WebhookSecret,
}

impl AppState {
    /// Wire services on top of an opened store and a shared HTTP client.
    /// Spawns the notifier actor.
    pub async fn build(
        cfg: Arc<Config>,
        storage: Storage,
        http: reqwest::Client,
    ) -> Result<Self, CallControlError> {
        let bot = TelegramBot::new(http.clone(), cfg.telegram());
        let sessions = SessionService::new(
            storage.clone(),
            cfg.telegram.session_ttl_secs,
            cfg.telegram.bot_username.clone(),
        );
        let telfin = TelfinService::new(http, cfg.telfin().clone(), storage.clone());
        let notifier = notifier::spawn(bot.clone(), storage.clone()).await?;
        let api_key = ApiKey(Arc::from(cfg.basic.api_key.as_str()));
        let webhook_secret = WebhookSecret(
            cfg.telegram
                .webhook_secret
                .as_deref()
                .filter(|s| !s.is_empty())
                .map(Arc::from),
        );
        Ok(Self {
            cfg,
            storage,
            bot,
            sessions,
            telfin,
            notifier,
            events: EventBus::default(),
            api_key,
            webhook_secret,
        })
    }
}

impl FromRef<AppState> for ApiKey {
    fn from_ref(state: &AppState) -> Self {
        state.api_key.clone()
    }
}

impl FromRef<AppState> for WebhookSecret {
    fn from_ref(state: &AppState) -> Self {
        state.webhook_secret.clone()
    }
}

pub fn callcontrol_router(state: AppState) -> Router {
    let limit = body_limit(state.cfg.basic.max_upload_bytes);

    let api = Router::new()
        // users
        .route("/users", get(users::list_users))
        .route("/users/profile", post(users::create_profile))
        .route("/users/{id}", delete(users::deactivate_user))
        .route("/users/{id}/role", patch(users::change_role))
        .route("/managers", get(users::list_managers).post(users::create_manager))
        // telegram
        .route("/telegram/sessions", post(telegram::start_session))
        .route("/telegram/sessions/org", post(telegram::start_session_org))
        .route("/telegram/sessions/{code}", get(telegram::session_status))
        .route("/telegram/confirm", post(telegram::confirm))
        .route("/telegram/link", post(telegram::link))
        .route("/telegram/link/{user_id}", delete(telegram::unlink))
        .route(
            "/telegram/settings",
            get(telegram::get_settings).put(telegram::save_settings),
        )
        .route("/telegram/notifications", post(telegram::send_notification))
        .route("/telegram/notifications/org", post(telegram::send_org_notification))
        .route(
            "/telegram/notifications/personal",
            post(telegram::send_personal_notification),
        )
        .route("/telegram/webhook-setup", post(telegram::webhook_setup))
        // telfin
        .route(
            "/telfin/connection",
            get(telfin::get_connection).put(telfin::save_connection),
        )
        .route("/telfin/test", post(telfin::test_connection))
        .route("/telfin/sync", post(telfin::sync_calls))
        .route("/telfin/calls", get(telfin::list_calls))
        .route(
            "/telfin/records/{record_uuid}/storage-url",
            get(telfin::storage_url),
        )
        .route("/telfin/records/{record_uuid}/download", get(telfin::download_record))
        // keyword trackers
        .route(
            "/keyword-trackers",
            get(trackers::list_trackers).post(trackers::create_tracker),
        )
        .route("/keyword-trackers/recount", post(trackers::recount))
        .route(
            "/keyword-trackers/{id}",
            put(trackers::update_tracker).delete(trackers::delete_tracker),
        )
        // exports
        .route("/exports", post(exports::generate_export))
        .route("/exports/{id}", get(exports::download_export))
        // calls
        .route("/calls", get(calls::list_calls))
        .route("/calls/upload", post(calls::upload_audio))
        .route("/calls/{id}", get(calls::get_call))
        .route("/calls/{id}/analysis", patch(calls::record_analysis))
        // in-app notifications
        .route(
            "/notifications",
            get(notifications::list_notifications).post(notifications::create_notification),
        )
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route("/notifications/{id}/read", post(notifications::mark_read))
        // read-only records
        .route("/knowledge-articles", get(records::list_articles))
        .route("/audit-logs", get(records::list_audit_logs))
        .route("/events", get(events::change_feed))
        .route_layer(middleware::from_extractor_with_state::<RequireApiKey, _>(
            state.clone(),
        ));

    Router::new()
        .route("/health", get(health::health))
        .route("/telegram/webhook", post(telegram::webhook))
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_limit_covers_base64_overhead() {
        let raw = 3 * 1024 * 1024;
        assert_eq!(body_limit(raw), 4 * 1024 * 1024 + 64 * 1024);
    }
}
