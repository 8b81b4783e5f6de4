use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use sqlx::types::Json;
use std::fmt;
use std::str::FromStr;

use crate::error::CallControlError;

/// Fixed-width RFC3339 so that text comparison in SQL matches time order.
pub fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum UserRole {
    Viewer,
    Operator,
    Manager,
    Admin,
    Superadmin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Operator => "operator",
            Self::Manager => "manager",
            Self::Admin => "admin",
            Self::Superadmin => "superadmin",
        }
    }

    pub fn can_manage_users(&self) -> bool {
        *self >= Self::Admin
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ArticleStatus {
    Draft,
    Internal,
    Published,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum NotificationType {
    NewCall,
    LowScore,
    ProcessingComplete,
    ProcessingFailed,
    ExportReady,
    KeywordAlert,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
    Txt,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Txt => "txt",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv; charset=utf-8",
            Self::Txt => "text/plain; charset=utf-8",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = CallControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "txt" | "text" => Ok(Self::Txt),
            other => Err(CallControlError::validation(format!(
                "unsupported export format: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TelfinAuthMode {
    Oauth,
    Basic,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct User {
    pub id: String,
    pub organization_id: Option<String>,
    pub email: String,
    pub full_name: Option<String>,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct Manager {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct Customer {
    pub id: String,
    pub organization_id: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct Call {
    pub id: String,
    pub organization_id: String,
    pub manager_id: Option<String>,
    pub customer_id: Option<String>,
    pub file_name: Option<String>,
    pub audio_url: Option<String>,
    pub transcription: Option<String>,
    pub general_score: Option<f64>,
    pub user_satisfaction_index: Option<f64>,
    pub communication_score: Option<f64>,
    pub sales_score: Option<f64>,
    pub processing_status: ProcessingStatus,
    pub processing_step: Option<String>,
    pub source: String,
    pub duration_seconds: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A call joined with the manager/customer names, as exported.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct CallExportRow {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub manager_name: Option<String>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub file_name: Option<String>,
    pub processing_status: ProcessingStatus,
    pub general_score: Option<f64>,
    pub user_satisfaction_index: Option<f64>,
    pub communication_score: Option<f64>,
    pub sales_score: Option<f64>,
    pub duration_seconds: Option<i64>,
    pub transcription: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct TelegramLink {
    pub id: String,
    pub user_id: String,
    pub organization_id: Option<String>,
    pub chat_id: i64,
    pub telegram_username: Option<String>,
    pub is_active: bool,
    pub linked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct TelegramSession {
    pub id: String,
    pub user_id: String,
    pub organization_id: Option<String>,
    pub session_code: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TelegramSession {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct TelegramSettings {
    pub id: String,
    pub organization_id: String,
    pub user_id: Option<String>,
    pub notify_new_calls: bool,
    pub notify_low_scores: bool,
    pub notify_processing: bool,
    pub low_score_threshold: f64,
    pub is_active: bool,
}

impl TelegramSettings {
    /// Settings used when an organization never saved any.
    pub fn defaults_for(organization_id: &str) -> Self {
        Self {
            id: String::new(),
            organization_id: organization_id.to_string(),
            user_id: None,
            notify_new_calls: true,
            notify_low_scores: true,
            notify_processing: false,
            low_score_threshold: 50.0,
            is_active: true,
        }
    }

    pub fn allows(&self, kind: NotificationType) -> bool {
        if !self.is_active {
            return false;
        }
        match kind {
            NotificationType::NewCall => self.notify_new_calls,
            NotificationType::LowScore => self.notify_low_scores,
            NotificationType::ProcessingComplete | NotificationType::ProcessingFailed => {
                self.notify_processing
            }
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct KeywordTracker {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub category: Option<String>,
    pub keywords: Json<Vec<String>>,
    pub mention_count: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct KnowledgeArticle {
    pub id: String,
    pub organization_id: String,
    pub title: String,
    pub body: String,
    pub status: ArticleStatus,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub organization_id: Option<String>,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub data: Option<Json<Value>>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct ExportRecord {
    pub id: String,
    pub organization_id: String,
    pub user_id: Option<String>,
    pub format: ExportFormat,
    pub file_name: String,
    pub content: String,
    pub record_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct TelfinCall {
    pub id: String,
    pub organization_id: String,
    pub call_uuid: String,
    pub direction: Option<String>,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
    pub started_at: Option<String>,
    pub duration_seconds: Option<i64>,
    pub record_uuid: Option<String>,
    pub result: Option<String>,
    pub raw: Json<Value>,
    pub synced_at: DateTime<Utc>,
}

/// Stored provider credentials. Secrets never leave the server.
#[derive(Debug, Clone, Deserialize, PartialEq, FromRow)]
pub struct TelfinConnection {
    pub id: String,
    pub organization_id: String,
    pub auth_mode: TelfinAuthMode,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub telfin_client_id: Option<String>,
    pub login: Option<String>,
    pub password: Option<String>,
    pub is_active: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Public view of a connection.
#[derive(Debug, Clone, Serialize)]
pub struct TelfinConnectionView {
    pub organization_id: String,
    pub auth_mode: TelfinAuthMode,
    pub client_id: Option<String>,
    pub telfin_client_id: Option<String>,
    pub login: Option<String>,
    pub has_secret: bool,
    pub is_active: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl From<&TelfinConnection> for TelfinConnectionView {
    fn from(c: &TelfinConnection) -> Self {
        Self {
            organization_id: c.organization_id.clone(),
            auth_mode: c.auth_mode,
            client_id: c.client_id.clone(),
            telfin_client_id: c.telfin_client_id.clone(),
            login: c.login.clone(),
            has_secret: c.client_secret.is_some() || c.password.is_some(),
            is_active: c.is_active,
            last_sync_at: c.last_sync_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct AuditLog {
    pub id: String,
    pub organization_id: Option<String>,
    pub user_id: Option<String>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub details: Option<Json<Value>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_sort_lexicographically() {
        let a = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 5).unwrap();
        let b = a + chrono::Duration::milliseconds(123);
        assert!(ts(a) < ts(b));
        assert_eq!(ts(a), "2024-01-01T12:00:05.000000Z");
    }

    #[test]
    fn roles_are_ranked() {
        assert!(UserRole::Superadmin > UserRole::Admin);
        assert!(UserRole::Admin.can_manage_users());
        assert!(!UserRole::Manager.can_manage_users());
    }

    #[test]
    fn settings_gate_processing_notifications() {
        let settings = TelegramSettings::defaults_for("org");
        assert!(settings.allows(NotificationType::NewCall));
        assert!(!settings.allows(NotificationType::ProcessingComplete));
        assert!(settings.allows(NotificationType::System));
    }
}
