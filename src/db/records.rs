use chrono::Utc;
use serde_json::Value;
use sqlx::types::Json;

use crate::db::models::{ArticleStatus, AuditLog, ExportRecord, KnowledgeArticle, new_id, ts};
use crate::db::sqlite::Storage;
use crate::error::CallControlError;

impl Storage {
    pub async fn insert_export(&self, export: &ExportRecord) -> Result<(), CallControlError> {
        sqlx::query(
            r#"INSERT INTO exports
               (id, organization_id, user_id, format, file_name, content, record_count, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&export.id)
        .bind(&export.organization_id)
        .bind(&export.user_id)
        .bind(export.format)
        .bind(&export.file_name)
        .bind(&export.content)
        .bind(export.record_count)
        .bind(ts(export.created_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_export(&self, id: &str) -> Result<Option<ExportRecord>, CallControlError> {
        let export = sqlx::query_as::<_, ExportRecord>(
            r#"SELECT id, organization_id, user_id, format, file_name, content, record_count, created_at
               FROM exports WHERE id = ?"#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        Ok(export)
    }

    pub async fn list_articles(
        &self,
        organization_id: &str,
        status: Option<ArticleStatus>,
    ) -> Result<Vec<KnowledgeArticle>, CallControlError> {
        let articles = sqlx::query_as::<_, KnowledgeArticle>(
            r#"SELECT id, organization_id, title, body, status, version, created_at, updated_at
               FROM knowledge_articles
               WHERE organization_id = ? AND (? IS NULL OR status = ?)
               ORDER BY updated_at DESC"#,
        )
        .bind(organization_id)
        .bind(status)
        .bind(status)
        .fetch_all(self.pool())
        .await?;
        Ok(articles)
    }

    pub async fn insert_article(&self, article: &KnowledgeArticle) -> Result<(), CallControlError> {
        sqlx::query(
            r#"INSERT INTO knowledge_articles
               (id, organization_id, title, body, status, version, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&article.id)
        .bind(&article.organization_id)
        .bind(&article.title)
        .bind(&article.body)
        .bind(article.status)
        .bind(article.version)
        .bind(ts(article.created_at))
        .bind(ts(article.updated_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn record_audit(
        &self,
        organization_id: Option<&str>,
        user_id: Option<&str>,
        action: &str,
        entity_type: &str,
        entity_id: Option<&str>,
        details: Option<Value>,
    ) -> Result<(), CallControlError> {
        sqlx::query(
            r#"INSERT INTO audit_logs
               (id, organization_id, user_id, action, entity_type, entity_id, details, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(new_id())
        .bind(organization_id)
        .bind(user_id)
        .bind(action)
        .bind(entity_type)
        .bind(entity_id)
        .bind(details.map(Json))
        .bind(ts(Utc::now()))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_audit_logs(
        &self,
        organization_id: &str,
        limit: i64,
    ) -> Result<Vec<AuditLog>, CallControlError> {
        let logs = sqlx::query_as::<_, AuditLog>(
            r#"SELECT id, organization_id, user_id, action, entity_type, entity_id, details, created_at
               FROM audit_logs WHERE organization_id = ? ORDER BY created_at DESC LIMIT ?"#,
        )
        .bind(organization_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(logs)
    }
}
