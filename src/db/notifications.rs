use crate::db::models::{Notification, ts};
use crate::db::sqlite::Storage;
use crate::error::CallControlError;

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, organization_id, type, title, message, data, is_read, created_at";

impl Storage {
    pub async fn insert_notifications(&self, items: &[Notification]) -> Result<(), CallControlError> {
        let mut tx = self.pool().begin().await?;
        for n in items {
            sqlx::query(&format!(
                "INSERT INTO notifications ({NOTIFICATION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ))
            .bind(&n.id)
            .bind(&n.user_id)
            .bind(&n.organization_id)
            .bind(n.kind)
            .bind(&n.title)
            .bind(&n.message)
            .bind(&n.data)
            .bind(n.is_read)
            .bind(ts(n.created_at))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Newest first.
    pub async fn list_notifications(
        &self,
        user_id: &str,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<Notification>, CallControlError> {
        let items = sqlx::query_as::<_, Notification>(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications \
             WHERE user_id = ? AND (? = 0 OR is_read = 0) ORDER BY created_at DESC LIMIT ?"
        ))
        .bind(user_id)
        .bind(unread_only)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(items)
    }

    pub async fn unread_count(&self, user_id: &str) -> Result<i64, CallControlError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM notifications WHERE user_id = ? AND is_read = 0")
                .bind(user_id)
                .fetch_one(self.pool())
                .await?;
        Ok(count)
    }

    pub async fn mark_notification_read(&self, id: &str, user_id: &str) -> Result<(), CallControlError> {
        let res = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(self.pool())
            .await?;
        if res.rows_affected() == 0 {
            return Err(CallControlError::NotFound("notification"));
        }
        Ok(())
    }

    pub async fn mark_all_notifications_read(&self, user_id: &str) -> Result<u64, CallControlError> {
        let res = sqlx::query("UPDATE notifications SET is_read = 1 WHERE user_id = ? AND is_read = 0")
            .bind(user_id)
            .execute(self.pool())
            .await?;
        Ok(res.rows_affected())
    }
}
