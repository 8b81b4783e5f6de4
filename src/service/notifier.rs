use futures::{StreamExt, stream};
use ractor::rpc::CallResult;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::db::Storage;
use crate::db::models::{Notification, NotificationType, new_id};
use crate::error::CallControlError;
use crate::telegram::TelegramBot;
use crate::telegram::bot_api::escape_html;

/// Concurrent sends per fan-out; the bot's rate limiter still applies.
const FANOUT_CONCURRENCY: usize = 8;
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of one Telegram dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl DeliveryReport {
    fn skipped(n: usize) -> Self {
        Self {
            skipped: n,
            ..Self::default()
        }
    }
}

/// `kind: None` bypasses the notification settings (manual sends).
#[derive(Debug)]
pub enum NotifierMessage {
    User {
        user_id: String,
        kind: Option<NotificationType>,
        text: String,
        reply: Option<RpcReplyPort<DeliveryReport>>,
    },
    Organization {
        organization_id: String,
        kind: Option<NotificationType>,
        text: String,
        reply: Option<RpcReplyPort<DeliveryReport>>,
    },
    Chat {
        chat_id: i64,
        text: String,
        reply: Option<RpcReplyPort<DeliveryReport>>,
    },
}

/// Handle for the Telegram notifier actor.
#[derive(Clone)]
pub struct NotifierHandle {
    actor: ActorRef<NotifierMessage>,
}

impl NotifierHandle {
    /// Fire-and-forget notification of one user's linked chat.
    pub fn notify_user(&self, user_id: &str, kind: Option<NotificationType>, text: String) {
        let _ = ractor::cast!(
            self.actor,
            NotifierMessage::User {
                user_id: user_id.to_string(),
                kind,
                text,
                reply: None
            }
        );
    }

    pub fn notify_organization(
        &self,
        organization_id: &str,
        kind: Option<NotificationType>,
        text: String,
    ) {
        let _ = ractor::cast!(
            self.actor,
            NotifierMessage::Organization {
                organization_id: organization_id.to_string(),
                kind,
                text,
                reply: None
            }
        );
    }

    pub async fn deliver_to_user(
        &self,
        user_id: &str,
        kind: Option<NotificationType>,
        text: String,
    ) -> Result<DeliveryReport, CallControlError> {
        let user_id = user_id.to_string();
        self.request(|reply| NotifierMessage::User {
            user_id,
            kind,
            text,
            reply: Some(reply),
        })
        .await
    }

    pub async fn deliver_to_organization(
        &self,
        organization_id: &str,
        kind: Option<NotificationType>,
        text: String,
    ) -> Result<DeliveryReport, CallControlError> {
        let organization_id = organization_id.to_string();
        self.request(|reply| NotifierMessage::Organization {
            organization_id,
            kind,
            text,
            reply: Some(reply),
        })
        .await
    }

    pub async fn deliver_to_chat(
        &self,
        chat_id: i64,
        text: String,
    ) -> Result<DeliveryReport, CallControlError> {
        self.request(|reply| NotifierMessage::Chat {
            chat_id,
            text,
            reply: Some(reply),
        })
        .await
    }

    async fn request(
        &self,
        build: impl FnOnce(RpcReplyPort<DeliveryReport>) -> NotifierMessage,
    ) -> Result<DeliveryReport, CallControlError> {
        match self.actor.call(build, Some(DELIVERY_TIMEOUT)).await {
            Ok(CallResult::Success(report)) => Ok(report),
            Ok(CallResult::Timeout) => Err(CallControlError::RactorError(
                "notifier delivery timed out".to_string(),
            )),
            Ok(CallResult::SenderError) => Err(CallControlError::RactorError(
                "notifier dropped the reply".to_string(),
            )),
            Err(e) => Err(CallControlError::RactorError(format!(
                "notifier RPC failed: {e}"
            ))),
        }
    }
}

pub struct NotifierArgs {
    pub bot: TelegramBot,
    pub storage: Storage,
}

struct NotifierState {
    bot: TelegramBot,
    storage: Storage,
}

/// Owns Telegram dispatch so request handlers never wait on the Bot API.
struct NotifierActor;

#[ractor::async_trait]
impl Actor for NotifierActor {
    type Msg = NotifierMessage;
    type State = NotifierState;
    type Arguments = NotifierArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        info!(
            telegram_configured = args.bot.is_configured(),
            "NotifierActor started"
        );
        Ok(NotifierState {
            bot: args.bot,
            storage: args.storage,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let bot = state.bot.clone();
        let storage = state.storage.clone();
        // Each dispatch runs on its own task; the mailbox keeps draining.
        tokio::spawn(async move {
            let (report, reply) = match message {
                NotifierMessage::User {
                    user_id,
                    kind,
                    text,
                    reply,
                } => (dispatch_user(&bot, &storage, &user_id, kind, &text).await, reply),
                NotifierMessage::Organization {
                    organization_id,
                    kind,
                    text,
                    reply,
                } => (
                    dispatch_organization(&bot, &storage, &organization_id, kind, &text).await,
                    reply,
                ),
                NotifierMessage::Chat {
                    chat_id,
                    text,
                    reply,
                } => (fan_out(&bot, vec![chat_id], &text).await, reply),
            };
            if let Some(reply) = reply {
                let _ = reply.send(report);
            }
        });
        Ok(())
    }
}

async fn dispatch_user(
    bot: &TelegramBot,
    storage: &Storage,
    user_id: &str,
    kind: Option<NotificationType>,
    text: &str,
) -> DeliveryReport {
    let link = match storage.active_link_for_user(user_id).await {
        Ok(Some(link)) => link,
        Ok(None) => {
            debug!(user_id, "no active telegram link; skipping");
            return DeliveryReport::skipped(1);
        }
        Err(e) => {
            warn!(user_id, error = %e, "telegram link lookup failed");
            return DeliveryReport {
                failed: 1,
                ..DeliveryReport::default()
            };
        }
    };
    if let (Some(kind), Some(org)) = (kind, link.organization_id.as_deref()) {
        match storage.effective_telegram_settings(org, Some(user_id)).await {
            Ok(settings) if !settings.allows(kind) => {
                debug!(user_id, ?kind, "notification disabled by settings");
                return DeliveryReport::skipped(1);
            }
            Ok(_) => {}
            Err(e) => warn!(user_id, error = %e, "settings lookup failed; sending anyway"),
        }
    }
    fan_out(bot, vec![link.chat_id], text).await
}

async fn dispatch_organization(
    bot: &TelegramBot,
    storage: &Storage,
    organization_id: &str,
    kind: Option<NotificationType>,
    text: &str,
) -> DeliveryReport {
    let links = match storage.active_links_for_org(organization_id).await {
        Ok(links) => links,
        Err(e) => {
            warn!(organization_id, error = %e, "telegram links lookup failed");
            return DeliveryReport {
                failed: 1,
                ..DeliveryReport::default()
            };
        }
    };
    if let Some(kind) = kind {
        match storage.effective_telegram_settings(organization_id, None).await {
            Ok(settings) if !settings.allows(kind) => {
                debug!(organization_id, ?kind, "organization notification disabled by settings");
                return DeliveryReport::skipped(links.len());
            }
            Ok(_) => {}
            Err(e) => warn!(organization_id, error = %e, "settings lookup failed; sending anyway"),
        }
    }
    let chats = links.into_iter().map(|l| l.chat_id).collect();
    fan_out(bot, chats, text).await
}

async fn fan_out(bot: &TelegramBot, chats: Vec<i64>, text: &str) -> DeliveryReport {
    if !bot.is_configured() {
        debug!(chats = chats.len(), "telegram bot not configured; skipping dispatch");
        return DeliveryReport::skipped(chats.len());
    }
    let results: Vec<bool> = stream::iter(chats)
        .map(|chat_id| async move {
            match bot.send_message(chat_id, text).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(chat_id, error = %e, "telegram notification failed");
                    false
                }
            }
        })
        .buffer_unordered(FANOUT_CONCURRENCY)
        .collect()
        .await;
    let sent = results.iter().filter(|ok| **ok).count();
    DeliveryReport {
        sent,
        failed: results.len() - sent,
        skipped: 0,
    }
}

/// Telegram rendering of a notification.
pub fn format_message(title: &str, message: &str) -> String {
    if message.trim().is_empty() {
        format!("<b>{}</b>", escape_html(title))
    } else {
        format!("<b>{}</b>\n{}", escape_html(title), escape_html(message))
    }
}

/// Spawn the notifier actor and return a handle.
pub async fn spawn(bot: TelegramBot, storage: Storage) -> Result<NotifierHandle, CallControlError> {
    let (actor, _jh) = Actor::spawn(None, NotifierActor, NotifierArgs { bot, storage })
        .await
        .map_err(|e| CallControlError::RactorError(format!("failed to spawn NotifierActor: {e}")))?;
    Ok(NotifierHandle { actor })
}

/// In-app notification request. Targets one user, or every active user of an organization.
#[derive(Debug, Clone, Deserialize)]
pub struct NewNotification {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub send_telegram: bool,
}

/// Insert one row per target user, then hand the Telegram copy to the notifier.
pub async fn create_notifications(
    storage: &Storage,
    notifier: &NotifierHandle,
    req: NewNotification,
) -> Result<Vec<Notification>, CallControlError> {
    if req.title.trim().is_empty() {
        return Err(CallControlError::validation("notification title is required"));
    }
    let (targets, organization_id) = match (&req.user_id, &req.organization_id) {
        (Some(user_id), org) => {
            let user = storage
                .get_user(user_id)
                .await?
                .ok_or(CallControlError::NotFound("user"))?;
            (vec![user.id], org.clone().or(user.organization_id))
        }
        (None, Some(org)) => (storage.active_user_ids(org).await?, Some(org.clone())),
        (None, None) => {
            return Err(CallControlError::validation(
                "either user_id or organization_id is required",
            ));
        }
    };

    let now = chrono::Utc::now();
    let rows: Vec<Notification> = targets
        .iter()
        .map(|user_id| Notification {
            id: new_id(),
            user_id: user_id.clone(),
            organization_id: organization_id.clone(),
            kind: req.kind,
            title: req.title.clone(),
            message: req.message.clone(),
            data: req.data.clone().map(sqlx::types::Json),
            is_read: false,
            created_at: now,
        })
        .collect();
    storage.insert_notifications(&rows).await?;

    if req.send_telegram {
        let text = format_message(&req.title, &req.message);
        match (&req.user_id, &organization_id) {
            (Some(user_id), _) => notifier.notify_user(user_id, Some(req.kind), text),
            (None, Some(org)) => notifier.notify_organization(org, Some(req.kind), text),
            (None, None) => {}
        }
    }
    debug!(count = rows.len(), kind = ?req.kind, "notifications created");
    Ok(rows)
}
