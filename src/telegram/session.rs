//! One-time codes that bind a dashboard user to a Telegram chat.
//!
//! A session is `pending` from creation until either a chat confirms the code
//! (`connected`) or `expires_at` passes (`expired`). Confirmation is a single
//! transaction in [`Storage::confirm_session`].

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::info;

use crate::db::Storage;
use crate::db::models::{TelegramLink, TelegramSession, new_id};
use crate::error::CallControlError;

/// No 0/O or 1/I so codes survive being read aloud or retyped.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const CODE_LEN: usize = 8;

pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct StartedSession {
    pub session_code: String,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deep_link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionStatus {
    NotFound,
    Pending { expires_at: DateTime<Utc> },
    Connected {
        chat_id: Option<i64>,
        telegram_username: Option<String>,
    },
    Expired,
}

#[derive(Clone)]
pub struct SessionService {
    storage: Storage,
    ttl: Duration,
    bot_username: Option<String>,
}

impl SessionService {
    pub fn new(storage: Storage, ttl_secs: u64, bot_username: Option<String>) -> Self {
        Self {
            storage,
            ttl: Duration::seconds(ttl_secs.max(1) as i64),
            bot_username: bot_username.filter(|u| !u.is_empty()),
        }
    }

    pub async fn start(
        &self,
        user_id: &str,
        organization_id: Option<&str>,
    ) -> Result<StartedSession, CallControlError> {
        let replaced = self.storage.delete_pending_sessions(user_id).await?;
        let now = Utc::now();
        let session = TelegramSession {
            id: new_id(),
            user_id: user_id.to_string(),
            organization_id: organization_id.map(str::to_string),
            session_code: generate_code(),
            expires_at: now + self.ttl,
            used: false,
            used_at: None,
            created_at: now,
        };
        self.storage.insert_session(&session).await?;
        info!(user_id, replaced, "telegram link session started");

        let deep_link = self.bot_username.as_ref().map(|bot| {
            format!(
                "https://t.me/{}?start={}",
                bot.trim_start_matches('@'),
                session.session_code
            )
        });
        Ok(StartedSession {
            session_code: session.session_code,
            expires_at: session.expires_at,
            deep_link,
        })
    }

    pub async fn status(&self, code: &str) -> Result<SessionStatus, CallControlError> {
        self.status_at(code, Utc::now()).await
    }

    pub async fn status_at(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionStatus, CallControlError> {
        let Some(session) = self.storage.get_session_by_code(&normalize(code)).await? else {
            return Ok(SessionStatus::NotFound);
        };
        if session.used {
            let link = self.storage.active_link_for_user(&session.user_id).await?;
            return Ok(SessionStatus::Connected {
                chat_id: link.as_ref().map(|l| l.chat_id),
                telegram_username: link.and_then(|l| l.telegram_username),
            });
        }
        if session.is_expired_at(now) {
            return Ok(SessionStatus::Expired);
        }
        Ok(SessionStatus::Pending {
            expires_at: session.expires_at,
        })
    }

    /// Consume `code` for `chat_id`. A code can be consumed once.
    pub async fn confirm(
        &self,
        code: &str,
        chat_id: i64,
        username: Option<&str>,
    ) -> Result<TelegramLink, CallControlError> {
        self.confirm_at(code, chat_id, username, Utc::now()).await
    }

    pub async fn confirm_at(
        &self,
        code: &str,
        chat_id: i64,
        username: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TelegramLink, CallControlError> {
        let session = self
            .storage
            .get_session_by_code(&normalize(code))
            .await?
            .ok_or(CallControlError::SessionNotFound)?;
        if session.used {
            return Err(CallControlError::SessionAlreadyUsed);
        }
        if session.is_expired_at(now) {
            return Err(CallControlError::SessionExpired);
        }

        let link = self
            .storage
            .confirm_session(&session, chat_id, username, now)
            .await?;
        info!(user_id = %link.user_id, chat_id, "telegram chat linked via session code");
        Ok(link)
    }

    /// Remove unused sessions that expired more than an hour ago.
    pub async fn purge_expired(&self) -> Result<u64, CallControlError> {
        self.storage
            .purge_expired_sessions(Utc::now() - Duration::hours(1))
            .await
    }
}

fn normalize(code: &str) -> String {
    code.trim().to_uppercase()
}
