use chrono::Utc;

use crate::db::models::{KeywordTracker, ts};
use crate::db::sqlite::Storage;
use crate::error::CallControlError;

const TRACKER_COLUMNS: &str = r#"id, organization_id, name, category, keywords, mention_count,
    is_active, created_at, updated_at"#;

impl Storage {
    pub async fn insert_tracker(&self, tracker: &KeywordTracker) -> Result<(), CallControlError> {
        sqlx::query(&format!(
            "INSERT INTO keyword_trackers ({TRACKER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&tracker.id)
        .bind(&tracker.organization_id)
        .bind(&tracker.name)
        .bind(&tracker.category)
        .bind(&tracker.keywords)
        .bind(tracker.mention_count)
        .bind(tracker.is_active)
        .bind(ts(tracker.created_at))
        .bind(ts(tracker.updated_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_tracker(&self, id: &str) -> Result<Option<KeywordTracker>, CallControlError> {
        let tracker = sqlx::query_as::<_, KeywordTracker>(&format!(
            "SELECT {TRACKER_COLUMNS} FROM keyword_trackers WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(tracker)
    }

    pub async fn list_trackers(
        &self,
        organization_id: &str,
        include_inactive: bool,
    ) -> Result<Vec<KeywordTracker>, CallControlError> {
        let trackers = sqlx::query_as::<_, KeywordTracker>(&format!(
            "SELECT {TRACKER_COLUMNS} FROM keyword_trackers \
             WHERE organization_id = ? AND (? OR is_active = 1) ORDER BY created_at"
        ))
        .bind(organization_id)
        .bind(include_inactive)
        .fetch_all(self.pool())
        .await?;
        Ok(trackers)
    }

    pub async fn update_tracker(&self, tracker: &KeywordTracker) -> Result<(), CallControlError> {
        let res = sqlx::query(
            r#"UPDATE keyword_trackers SET name = ?, category = ?, keywords = ?, is_active = ?,
               updated_at = ? WHERE id = ?"#,
        )
        .bind(&tracker.name)
        .bind(&tracker.category)
        .bind(&tracker.keywords)
        .bind(tracker.is_active)
        .bind(ts(tracker.updated_at))
        .bind(&tracker.id)
        .execute(self.pool())
        .await?;
        if res.rows_affected() == 0 {
            return Err(CallControlError::NotFound("keyword tracker"));
        }
        Ok(())
    }

    pub async fn deactivate_tracker(&self, id: &str) -> Result<(), CallControlError> {
        let res = sqlx::query("UPDATE keyword_trackers SET is_active = 0, updated_at = ? WHERE id = ?")
            .bind(ts(Utc::now()))
            .bind(id)
            .execute(self.pool())
            .await?;
        if res.rows_affected() == 0 {
            return Err(CallControlError::NotFound("keyword tracker"));
        }
        Ok(())
    }

    /// Store recounted totals in a single transaction.
    pub async fn set_mention_counts(&self, counts: &[(String, i64)]) -> Result<(), CallControlError> {
        let now = ts(Utc::now());
        let mut tx = self.pool().begin().await?;
        for (id, count) in counts {
            sqlx::query("UPDATE keyword_trackers SET mention_count = ?, updated_at = ? WHERE id = ?")
                .bind(count)
                .bind(&now)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
