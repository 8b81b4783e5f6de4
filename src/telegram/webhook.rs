use tracing::{info, warn};

use super::bot_api::{TelegramBot, escape_html};
use super::session::SessionService;
use super::types::{BotCommand, TelegramMessage, TelegramUpdate};
use crate::db::Storage;
use crate::error::CallControlError;

const HELP_TEXT: &str = "Open CallControl, go to Settings → Telegram and press \
\"Connect\" to get a link code, then send it here as <code>/start CODE</code>.";

/// Reply sent back to the chat, and whether the chat's link was created or removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub reply: String,
    pub link_changed: bool,
}

/// Handle one inbound update and return the outcome (if any) after replying.
pub async fn process_update(
    bot: &TelegramBot,
    sessions: &SessionService,
    storage: &Storage,
    update: TelegramUpdate,
) -> Result<Option<UpdateOutcome>, CallControlError> {
    let Some(message) = update.message.or(update.edited_message) else {
        return Ok(None);
    };
    let Some(text) = message.text.as_deref() else {
        return Ok(None);
    };

    let (reply, link_changed) = match BotCommand::parse(text) {
        BotCommand::Start(Some(code)) => confirm_reply(sessions, &message, &code).await?,
        BotCommand::Start(None) | BotCommand::Other => (HELP_TEXT.to_string(), false),
        BotCommand::Stop => {
            let removed = storage.deactivate_link_for_chat(message.chat.id).await?;
            info!(chat_id = message.chat.id, removed, "telegram chat unlinked by user");
            if removed > 0 {
                (
                    "Notifications are turned off. Link again from CallControl any time."
                        .to_string(),
                    true,
                )
            } else {
                ("This chat is not linked to a CallControl account.".to_string(), false)
            }
        }
        BotCommand::Status => {
            let reply = match storage.active_link_for_chat(message.chat.id).await? {
                Some(_) => "This chat is linked and receives CallControl notifications.",
                None => "This chat is not linked to a CallControl account.",
            };
            (reply.to_string(), false)
        }
    };

    if bot.is_configured()
        && let Err(e) = bot.send_message(message.chat.id, &reply).await
    {
        warn!(chat_id = message.chat.id, error = %e, "failed to reply to telegram update");
    }
    Ok(Some(UpdateOutcome {
        reply,
        link_changed,
    }))
}

async fn confirm_reply(
    sessions: &SessionService,
    message: &TelegramMessage,
    code: &str,
) -> Result<(String, bool), CallControlError> {
    let username = message
        .from
        .as_ref()
        .and_then(|u| u.username.as_deref())
        .or(message.chat.username.as_deref());

    let reply = match sessions.confirm(code, message.chat.id, username).await {
        Ok(_) => {
            return Ok((
                "✅ Telegram is connected. You will receive CallControl notifications here."
                    .to_string(),
                true,
            ));
        }
        Err(CallControlError::SessionNotFound) => {
            format!("Code <code>{}</code> was not found.", escape_html(code))
        }
        Err(CallControlError::SessionExpired) => {
            "This code has expired. Request a new one in CallControl.".to_string()
        }
        Err(CallControlError::SessionAlreadyUsed) => "This code has already been used.".to_string(),
        Err(CallControlError::ChatAlreadyLinked) => {
            "This chat is already linked to another CallControl user. Send /stop first."
                .to_string()
        }
        Err(e) => return Err(e),
    };
    Ok((reply, false))
}
