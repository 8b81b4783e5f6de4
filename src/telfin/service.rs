use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use super::TelfinErrorCode;
use super::client::{TelfinBasicApi, TelfinOauthApi};
use super::token::TelfinTokenManager;
use super::types::{CallHistoryQuery, StorageUrl, TelfinCallRecord};
use crate::config::TelfinConfig;
use crate::db::Storage;
use crate::db::models::{TelfinAuthMode, TelfinCall, TelfinConnection, new_id};
use crate::error::CallControlError;

type SharedOauthApi = Arc<AsyncMutex<TelfinOauthApi>>;

/// Connection settings as submitted by an admin. Omitted secrets keep the stored ones.
#[derive(Debug, Clone, Deserialize)]
pub struct TelfinConnectionInput {
    pub auth_mode: TelfinAuthMode,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub telfin_client_id: Option<String>,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionCheck {
    pub auth_mode: TelfinAuthMode,
    pub telfin_client_id: String,
    pub login: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub fetched: usize,
    pub stored: u64,
    pub synced_at: DateTime<Utc>,
}

/// Per-organization Telfin access. OAuth clients (and their tokens) are cached
/// so concurrent requests for one organization share a single token.
#[derive(Clone)]
pub struct TelfinService {
    http: reqwest::Client,
    cfg: TelfinConfig,
    storage: Storage,
    oauth_clients: Arc<Mutex<HashMap<String, SharedOauthApi>>>,
}

impl TelfinService {
    pub fn new(http: reqwest::Client, cfg: TelfinConfig, storage: Storage) -> Self {
        Self {
            http,
            cfg,
            storage,
            oauth_clients: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn save_connection(
        &self,
        organization_id: &str,
        input: TelfinConnectionInput,
    ) -> Result<TelfinConnection, CallControlError> {
        let non_empty = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        let conn = TelfinConnection {
            id: new_id(),
            organization_id: organization_id.to_string(),
            auth_mode: input.auth_mode,
            client_id: non_empty(input.client_id),
            client_secret: non_empty(input.client_secret),
            telfin_client_id: non_empty(input.telfin_client_id),
            login: non_empty(input.login),
            password: non_empty(input.password),
            is_active: input.is_active,
            last_sync_at: None,
            created_at: Utc::now(),
        };
        if conn.auth_mode == TelfinAuthMode::Oauth && conn.client_id.is_none() {
            return Err(CallControlError::validation("client_id is required for oauth mode"));
        }
        if conn.auth_mode == TelfinAuthMode::Basic && conn.login.is_none() {
            return Err(CallControlError::validation("login is required for basic mode"));
        }

        let saved = self.storage.save_telfin_connection(&conn).await?;
        self.forget(organization_id);
        info!(organization_id, auth_mode = ?saved.auth_mode, "telfin connection saved");
        Ok(saved)
    }

    /// Drop the cached OAuth client (and its token) of an organization.
    pub fn forget(&self, organization_id: &str) {
        self.clients().remove(organization_id);
    }

    async fn connection(&self, organization_id: &str) -> Result<TelfinConnection, CallControlError> {
        match self.storage.get_telfin_connection(organization_id).await? {
            Some(conn) if conn.is_active => Ok(conn),
            Some(_) => Err(CallControlError::telfin(
                TelfinErrorCode::NotConfigured,
                "telfin connection is disabled",
            )),
            None => Err(CallControlError::telfin(
                TelfinErrorCode::NotConfigured,
                "telfin connection is not configured",
            )),
        }
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<String, SharedOauthApi>> {
        self.oauth_clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn oauth_api(&self, conn: &TelfinConnection) -> Result<SharedOauthApi, CallControlError> {
        let mut map = self.clients();
        if let Some(api) = map.get(&conn.organization_id) {
            return Ok(api.clone());
        }
        let (Some(client_id), Some(client_secret)) = (&conn.client_id, &conn.client_secret) else {
            return Err(CallControlError::telfin(
                TelfinErrorCode::NotConfigured,
                "oauth client_id/client_secret are not configured",
            ));
        };
        let tokens = TelfinTokenManager::new(
            self.http.clone(),
            &self.cfg.api_base,
            client_id,
            client_secret,
            Duration::from_secs(self.cfg.token_buffer_secs),
        )?;
        let api = Arc::new(AsyncMutex::new(TelfinOauthApi::new(
            self.http.clone(),
            self.cfg.api_base.clone(),
            tokens,
            self.cfg.max_auth_attempts,
        )));
        map.insert(conn.organization_id.clone(), api.clone());
        Ok(api)
    }

    fn basic_api(&self, conn: &TelfinConnection) -> Result<TelfinBasicApi, CallControlError> {
        let (Some(login), Some(password), Some(client)) =
            (&conn.login, &conn.password, &conn.telfin_client_id)
        else {
            return Err(CallControlError::telfin(
                TelfinErrorCode::NotConfigured,
                "basic login/password/client id are not configured",
            ));
        };
        Ok(TelfinBasicApi::new(
            self.http.clone(),
            self.cfg.api_base.clone(),
            login.clone(),
            password.clone(),
            client.clone(),
        ))
    }

    /// Verify credentials and remember the provider-side client id.
    pub async fn test_connection(
        &self,
        organization_id: &str,
    ) -> Result<ConnectionCheck, CallControlError> {
        let conn = self.connection(organization_id).await?;
        let info = match conn.auth_mode {
            TelfinAuthMode::Oauth => {
                let api = self.oauth_api(&conn)?;
                let mut api = api.lock().await;
                api.get_user_info().await?
            }
            TelfinAuthMode::Basic => {
                let (Some(login), Some(password)) = (&conn.login, &conn.password) else {
                    return Err(CallControlError::telfin(
                        TelfinErrorCode::NotConfigured,
                        "basic login/password are not configured",
                    ));
                };
                TelfinBasicApi::new(
                    self.http.clone(),
                    self.cfg.api_base.clone(),
                    login.clone(),
                    password.clone(),
                    conn.telfin_client_id.clone().unwrap_or_default(),
                )
                .get_user_info()
                .await?
            }
        };
        if conn.telfin_client_id.as_deref() != Some(info.client_id.as_str()) {
            self.storage
                .set_telfin_client_id(organization_id, &info.client_id)
                .await?;
        }
        info!(organization_id, telfin_client_id = %info.client_id, "telfin connection verified");
        Ok(ConnectionCheck {
            auth_mode: conn.auth_mode,
            telfin_client_id: info.client_id,
            login: info.login,
        })
    }

    /// Pull call history for `[start, end]` and upsert it by call uuid.
    pub async fn sync_calls(
        &self,
        organization_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SyncReport, CallControlError> {
        if start >= end {
            return Err(CallControlError::validation("sync range start must be before end"));
        }
        let conn = self.connection(organization_id).await?;
        let api = self.oauth_api(&conn)?;
        let mut api = api.lock().await;

        let telfin_client_id = match conn.telfin_client_id.clone() {
            Some(id) => id,
            None => {
                let info = api.get_user_info().await?;
                self.storage
                    .set_telfin_client_id(organization_id, &info.client_id)
                    .await?;
                info.client_id
            }
        };

        let query = CallHistoryQuery {
            start,
            end,
            count: self.cfg.history_page_size,
        };
        let records = api.get_call_history(&telfin_client_id, &query).await?;
        drop(api);

        let now = Utc::now();
        let rows = records
            .into_iter()
            .map(|r| to_row(organization_id, r, now))
            .collect::<Result<Vec<_>, _>>()?;
        let stored = self.storage.upsert_telfin_calls(&rows).await?;
        self.storage.touch_telfin_sync(organization_id, now).await?;
        info!(organization_id, fetched = rows.len(), stored, "telfin calls synced");
        Ok(SyncReport {
            fetched: rows.len(),
            stored,
            synced_at: now,
        })
    }

    pub async fn storage_url(
        &self,
        organization_id: &str,
        record_uuid: &str,
    ) -> Result<StorageUrl, CallControlError> {
        let conn = self.connection(organization_id).await?;
        self.basic_api(&conn)?.storage_url(record_uuid).await
    }

    pub async fn download_record(
        &self,
        organization_id: &str,
        record_uuid: &str,
    ) -> Result<(Option<String>, axum::body::Bytes), CallControlError> {
        let conn = self.connection(organization_id).await?;
        self.basic_api(&conn)?.download_record(record_uuid).await
    }
}

fn to_row(
    organization_id: &str,
    record: TelfinCallRecord,
    now: DateTime<Utc>,
) -> Result<TelfinCall, CallControlError> {
    let raw = serde_json::to_value(&record)?;
    Ok(TelfinCall {
        id: new_id(),
        organization_id: organization_id.to_string(),
        call_uuid: record.call_uuid,
        direction: record.flow,
        from_number: record.from_username,
        to_number: record.to_username,
        started_at: record.start_time_gmt,
        duration_seconds: record.duration,
        record_uuid: record.record_uuid,
        result: record.result,
        raw: Json(raw),
        synced_at: now,
    })
}
