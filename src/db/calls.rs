use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::db::models::{Call, CallExportRow, ProcessingStatus, ts};
use crate::db::sqlite::Storage;
use crate::error::CallControlError;

const CALL_COLUMNS: &str = r#"id, organization_id, manager_id, customer_id, file_name, audio_url,
    transcription, general_score, user_satisfaction_index, communication_score, sales_score,
    processing_status, processing_step, source, duration_seconds, created_at, updated_at"#;

/// Analysis output reported by the processing pipeline. `None` keeps the stored value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CallAnalysisUpdate {
    pub processing_status: Option<ProcessingStatus>,
    pub processing_step: Option<String>,
    pub transcription: Option<String>,
    pub general_score: Option<f64>,
    pub user_satisfaction_index: Option<f64>,
    pub communication_score: Option<f64>,
    pub sales_score: Option<f64>,
    pub duration_seconds: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct CallFilter {
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub manager_id: Option<String>,
}

impl Storage {
    pub async fn insert_call(&self, call: &Call) -> Result<(), CallControlError> {
        sqlx::query(
            r#"INSERT INTO calls (
                id, organization_id, manager_id, customer_id, file_name, audio_url,
                transcription, general_score, user_satisfaction_index, communication_score,
                sales_score, processing_status, processing_step, source, duration_seconds,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&call.id)
        .bind(&call.organization_id)
        .bind(&call.manager_id)
        .bind(&call.customer_id)
        .bind(&call.file_name)
        .bind(&call.audio_url)
        .bind(&call.transcription)
        .bind(call.general_score)
        .bind(call.user_satisfaction_index)
        .bind(call.communication_score)
        .bind(call.sales_score)
        .bind(call.processing_status)
        .bind(&call.processing_step)
        .bind(&call.source)
        .bind(call.duration_seconds)
        .bind(ts(call.created_at))
        .bind(ts(call.updated_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_call(&self, id: &str) -> Result<Option<Call>, CallControlError> {
        let call = sqlx::query_as::<_, Call>(&format!("SELECT {CALL_COLUMNS} FROM calls WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(call)
    }

    /// Newest first.
    pub async fn list_calls(
        &self,
        organization_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Call>, CallControlError> {
        let calls = sqlx::query_as::<_, Call>(&format!(
            "SELECT {CALL_COLUMNS} FROM calls WHERE organization_id = ? \
             ORDER BY created_at DESC LIMIT ? OFFSET ?"
        ))
        .bind(organization_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;
        Ok(calls)
    }

    pub async fn update_call_analysis(
        &self,
        id: &str,
        update: &CallAnalysisUpdate,
    ) -> Result<Call, CallControlError> {
        let res = sqlx::query(
            r#"UPDATE calls SET
                processing_status = COALESCE(?, processing_status),
                processing_step = COALESCE(?, processing_step),
                transcription = COALESCE(?, transcription),
                general_score = COALESCE(?, general_score),
                user_satisfaction_index = COALESCE(?, user_satisfaction_index),
                communication_score = COALESCE(?, communication_score),
                sales_score = COALESCE(?, sales_score),
                duration_seconds = COALESCE(?, duration_seconds),
                updated_at = ?
              WHERE id = ?"#,
        )
        .bind(update.processing_status)
        .bind(&update.processing_step)
        .bind(&update.transcription)
        .bind(update.general_score)
        .bind(update.user_satisfaction_index)
        .bind(update.communication_score)
        .bind(update.sales_score)
        .bind(update.duration_seconds)
        .bind(ts(Utc::now()))
        .bind(id)
        .execute(self.pool())
        .await?;
        if res.rows_affected() == 0 {
            return Err(CallControlError::NotFound("call"));
        }
        self.get_call(id)
            .await?
            .ok_or(CallControlError::NotFound("call"))
    }

    /// Calls of an organization joined with manager/customer names, oldest first.
    pub async fn calls_for_export(
        &self,
        organization_id: &str,
        filter: &CallFilter,
    ) -> Result<Vec<CallExportRow>, CallControlError> {
        let rows = sqlx::query_as::<_, CallExportRow>(
            r#"SELECT c.id, c.created_at, m.name AS manager_name, cu.name AS customer_name,
                      cu.phone AS customer_phone, c.file_name, c.processing_status,
                      c.general_score, c.user_satisfaction_index, c.communication_score,
                      c.sales_score, c.duration_seconds, c.transcription
               FROM calls c
               LEFT JOIN managers m ON m.id = c.manager_id
               LEFT JOIN customers cu ON cu.id = c.customer_id
               WHERE c.organization_id = ?
                 AND (? IS NULL OR c.created_at >= ?)
                 AND (? IS NULL OR c.created_at <= ?)
                 AND (? IS NULL OR c.manager_id = ?)
               ORDER BY c.created_at, c.id"#,
        )
        .bind(organization_id)
        .bind(filter.date_from.map(ts))
        .bind(filter.date_from.map(ts))
        .bind(filter.date_to.map(ts))
        .bind(filter.date_to.map(ts))
        .bind(&filter.manager_id)
        .bind(&filter.manager_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Non-empty transcriptions of an organization, for keyword counting.
    pub async fn transcriptions(&self, organization_id: &str) -> Result<Vec<String>, CallControlError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"SELECT transcription FROM calls
               WHERE organization_id = ? AND transcription IS NOT NULL AND transcription != ''"#,
        )
        .bind(organization_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(|(t,)| t).collect())
    }
}
