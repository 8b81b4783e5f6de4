use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};

use crate::db::models::{TelegramLink, TelegramSession, TelegramSettings, new_id, ts};
use crate::db::sqlite::Storage;
use crate::error::CallControlError;

const LINK_COLUMNS: &str =
    "id, user_id, organization_id, chat_id, telegram_username, is_active, linked_at";
const SESSION_COLUMNS: &str =
    "id, user_id, organization_id, session_code, expires_at, used, used_at, created_at";
const SETTINGS_COLUMNS: &str = r#"id, organization_id, user_id, notify_new_calls, notify_low_scores,
    notify_processing, low_score_threshold, is_active"#;

impl Storage {
    pub async fn insert_session(&self, session: &TelegramSession) -> Result<(), CallControlError> {
        sqlx::query(
            r#"INSERT INTO telegram_sessions
               (id, user_id, organization_id, session_code, expires_at, used, used_at, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.organization_id)
        .bind(&session.session_code)
        .bind(ts(session.expires_at))
        .bind(session.used)
        .bind(session.used_at.map(ts))
        .bind(ts(session.created_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Drop the user's still-pending codes so only the newest one can be confirmed.
    pub async fn delete_pending_sessions(&self, user_id: &str) -> Result<u64, CallControlError> {
        let res = sqlx::query("DELETE FROM telegram_sessions WHERE user_id = ? AND used = 0")
            .bind(user_id)
            .execute(self.pool())
            .await?;
        Ok(res.rows_affected())
    }

    pub async fn get_session_by_code(
        &self,
        code: &str,
    ) -> Result<Option<TelegramSession>, CallControlError> {
        let session = sqlx::query_as::<_, TelegramSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM telegram_sessions WHERE session_code = ?"
        ))
        .bind(code)
        .fetch_optional(self.pool())
        .await?;
        Ok(session)
    }

    /// Delete unused sessions that expired before `before`.
    pub async fn purge_expired_sessions(
        &self,
        before: DateTime<Utc>,
    ) -> Result<u64, CallControlError> {
        let res = sqlx::query("DELETE FROM telegram_sessions WHERE used = 0 AND expires_at < ?")
            .bind(ts(before))
            .execute(self.pool())
            .await?;
        Ok(res.rows_affected())
    }

    /// Consume a session and link its user to `chat_id` in one transaction.
    ///
    /// The session is claimed with `used = 0 AND expires_at > now`; losing that
    /// race (or an expired code) rolls everything back.
    pub async fn confirm_session(
        &self,
        session: &TelegramSession,
        chat_id: i64,
        username: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TelegramLink, CallControlError> {
        let mut tx = self.pool().begin().await?;

        ensure_chat_free(&mut tx, chat_id, &session.user_id).await?;

        let claimed = sqlx::query(
            r#"UPDATE telegram_sessions SET used = 1, used_at = ?
               WHERE id = ? AND used = 0 AND expires_at > ?"#,
        )
        .bind(ts(now))
        .bind(&session.id)
        .bind(ts(now))
        .execute(&mut *tx)
        .await?;
        if claimed.rows_affected() == 0 {
            return Err(if session.is_expired_at(now) {
                CallControlError::SessionExpired
            } else {
                CallControlError::SessionAlreadyUsed
            });
        }

        let link = upsert_link(
            &mut tx,
            &session.user_id,
            session.organization_id.as_deref(),
            chat_id,
            username,
            now,
        )
        .await?;
        tx.commit().await?;
        Ok(link)
    }

    /// Link a chat to a user directly, without a session code.
    pub async fn link_chat(
        &self,
        user_id: &str,
        organization_id: Option<&str>,
        chat_id: i64,
        username: Option<&str>,
    ) -> Result<TelegramLink, CallControlError> {
        let mut tx = self.pool().begin().await?;
        ensure_chat_free(&mut tx, chat_id, user_id).await?;
        let link = upsert_link(&mut tx, user_id, organization_id, chat_id, username, Utc::now()).await?;
        tx.commit().await?;
        Ok(link)
    }

    pub async fn deactivate_links_for_user(&self, user_id: &str) -> Result<u64, CallControlError> {
        let res = sqlx::query("UPDATE telegram_links SET is_active = 0 WHERE user_id = ? AND is_active = 1")
            .bind(user_id)
            .execute(self.pool())
            .await?;
        Ok(res.rows_affected())
    }

    pub async fn deactivate_link_for_chat(&self, chat_id: i64) -> Result<u64, CallControlError> {
        let res = sqlx::query("UPDATE telegram_links SET is_active = 0 WHERE chat_id = ? AND is_active = 1")
            .bind(chat_id)
            .execute(self.pool())
            .await?;
        Ok(res.rows_affected())
    }

    pub async fn active_link_for_chat(
        &self,
        chat_id: i64,
    ) -> Result<Option<TelegramLink>, CallControlError> {
        let link = sqlx::query_as::<_, TelegramLink>(&format!(
            "SELECT {LINK_COLUMNS} FROM telegram_links WHERE chat_id = ? AND is_active = 1"
        ))
        .bind(chat_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(link)
    }

    pub async fn active_link_for_user(
        &self,
        user_id: &str,
    ) -> Result<Option<TelegramLink>, CallControlError> {
        let link = sqlx::query_as::<_, TelegramLink>(&format!(
            "SELECT {LINK_COLUMNS} FROM telegram_links WHERE user_id = ? AND is_active = 1 \
             ORDER BY linked_at DESC LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(link)
    }

    pub async fn active_links_for_org(
        &self,
        organization_id: &str,
    ) -> Result<Vec<TelegramLink>, CallControlError> {
        let links = sqlx::query_as::<_, TelegramLink>(&format!(
            "SELECT {LINK_COLUMNS} FROM telegram_links WHERE organization_id = ? AND is_active = 1 \
             ORDER BY linked_at"
        ))
        .bind(organization_id)
        .fetch_all(self.pool())
        .await?;
        Ok(links)
    }

    /// Settings row for `(organization_id, user_id)`; `user_id = None` is the org-wide row.
    pub async fn get_telegram_settings(
        &self,
        organization_id: &str,
        user_id: Option<&str>,
    ) -> Result<Option<TelegramSettings>, CallControlError> {
        let settings = sqlx::query_as::<_, TelegramSettings>(&format!(
            "SELECT {SETTINGS_COLUMNS} FROM telegram_settings WHERE organization_id = ? AND user_id IS ?"
        ))
        .bind(organization_id)
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(settings)
    }

    /// Personal settings win over org-wide ones, which win over defaults.
    pub async fn effective_telegram_settings(
        &self,
        organization_id: &str,
        user_id: Option<&str>,
    ) -> Result<TelegramSettings, CallControlError> {
        if let Some(uid) = user_id
            && let Some(personal) = self.get_telegram_settings(organization_id, Some(uid)).await?
        {
            return Ok(personal);
        }
        Ok(self
            .get_telegram_settings(organization_id, None)
            .await?
            .unwrap_or_else(|| TelegramSettings::defaults_for(organization_id)))
    }

    pub async fn save_telegram_settings(
        &self,
        settings: &TelegramSettings,
    ) -> Result<TelegramSettings, CallControlError> {
        let existing = self
            .get_telegram_settings(&settings.organization_id, settings.user_id.as_deref())
            .await?;
        let mut saved = settings.clone();
        match existing {
            Some(row) => {
                saved.id = row.id;
                sqlx::query(
                    r#"UPDATE telegram_settings SET notify_new_calls = ?, notify_low_scores = ?,
                       notify_processing = ?, low_score_threshold = ?, is_active = ?
                       WHERE id = ?"#,
                )
                .bind(saved.notify_new_calls)
                .bind(saved.notify_low_scores)
                .bind(saved.notify_processing)
                .bind(saved.low_score_threshold)
                .bind(saved.is_active)
                .bind(&saved.id)
                .execute(self.pool())
                .await?;
            }
            None => {
                saved.id = new_id();
                sqlx::query(&format!(
                    "INSERT INTO telegram_settings ({SETTINGS_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
                ))
                .bind(&saved.id)
                .bind(&saved.organization_id)
                .bind(&saved.user_id)
                .bind(saved.notify_new_calls)
                .bind(saved.notify_low_scores)
                .bind(saved.notify_processing)
                .bind(saved.low_score_threshold)
                .bind(saved.is_active)
                .execute(self.pool())
                .await?;
            }
        }
        Ok(saved)
    }
}

async fn ensure_chat_free(
    tx: &mut Transaction<'_, Sqlite>,
    chat_id: i64,
    user_id: &str,
) -> Result<(), CallControlError> {
    let holder: Option<(String,)> =
        sqlx::query_as("SELECT user_id FROM telegram_links WHERE chat_id = ? AND is_active = 1")
            .bind(chat_id)
            .fetch_optional(&mut **tx)
            .await?;
    match holder {
        Some((owner,)) if owner != user_id => Err(CallControlError::ChatAlreadyLinked),
        _ => Ok(()),
    }
}

/// Deactivate the user's other links, then insert or take over the row for `chat_id`.
async fn upsert_link(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: &str,
    organization_id: Option<&str>,
    chat_id: i64,
    username: Option<&str>,
    now: DateTime<Utc>,
) -> Result<TelegramLink, CallControlError> {
    sqlx::query("UPDATE telegram_links SET is_active = 0 WHERE user_id = ? AND chat_id != ?")
        .bind(user_id)
        .bind(chat_id)
        .execute(&mut **tx)
        .await?;

    sqlx::query(
        r#"INSERT INTO telegram_links
           (id, user_id, organization_id, chat_id, telegram_username, is_active, linked_at)
           VALUES (?, ?, ?, ?, ?, 1, ?)
           ON CONFLICT(chat_id) DO UPDATE SET
               user_id = excluded.user_id,
               organization_id = excluded.organization_id,
               telegram_username = excluded.telegram_username,
               is_active = 1,
               linked_at = excluded.linked_at"#,
    )
    .bind(new_id())
    .bind(user_id)
    .bind(organization_id)
    .bind(chat_id)
    .bind(username)
    .bind(ts(now))
    .execute(&mut **tx)
    .await?;

    let link = sqlx::query_as::<_, TelegramLink>(&format!(
        "SELECT {LINK_COLUMNS} FROM telegram_links WHERE chat_id = ?"
    ))
    .bind(chat_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(link)
}
