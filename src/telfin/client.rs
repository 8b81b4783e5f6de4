use axum::body::Bytes;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use super::TelfinErrorCode;
use super::token::TelfinTokenManager;
use super::types::{CallHistoryPage, CallHistoryQuery, StorageUrl, TelfinCallRecord, TelfinUserInfo};
use crate::error::CallControlError;

/// `{base}/api/ver1.0/{segments...}/` with the provider's trailing slash.
fn endpoint(api_base: &Url, segments: &[&str]) -> Result<Url, CallControlError> {
    let mut url = api_base.clone();
    url.path_segments_mut()
        .map_err(|_| CallControlError::validation("telfin api_base cannot be a base URL"))?
        .pop_if_empty()
        .extend(["api", "ver1.0"])
        .extend(segments)
        .push("");
    Ok(url)
}

fn is_auth_rejection(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

/// OAuth-authenticated API: user info and call history.
pub struct TelfinOauthApi {
    http: reqwest::Client,
    api_base: Url,
    tokens: TelfinTokenManager,
    max_auth_attempts: u32,
}

impl TelfinOauthApi {
    pub fn new(
        http: reqwest::Client,
        api_base: Url,
        tokens: TelfinTokenManager,
        max_auth_attempts: u32,
    ) -> Self {
        Self {
            http,
            api_base,
            tokens,
            max_auth_attempts: max_auth_attempts.max(1),
        }
    }

    /// GET with a bearer token. A 401/403 clears the token and the request is
    /// repeated with a fresh one, up to `max_auth_attempts` times in total.
    async fn authorized_get(
        &mut self,
        url: Url,
        query: &[(&str, String)],
        code: TelfinErrorCode,
    ) -> Result<reqwest::Response, CallControlError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let token = self.tokens.ensure_valid_token().await?;
            let resp = self
                .http
                .get(url.clone())
                .bearer_auth(token)
                .header("Accept", "application/json")
                .query(query)
                .send()
                .await
                .map_err(|e| CallControlError::telfin(code, e))?;

            let status = resp.status();
            if status.is_success() {
                return Ok(resp);
            }
            if is_auth_rejection(status) {
                self.tokens.clear_token();
                if attempt < self.max_auth_attempts {
                    warn!(%status, attempt, "telfin rejected token; refreshing and retrying");
                    continue;
                }
            }
            let body = resp.text().await.unwrap_or_default();
            return Err(CallControlError::telfin(
                code,
                format!("{} returned {status}: {}", url.path(), truncate(&body, 200)),
            ));
        }
    }

    pub async fn get_user_info(&mut self) -> Result<TelfinUserInfo, CallControlError> {
        let url = endpoint(&self.api_base, &["user"])?;
        let resp = self
            .authorized_get(url, &[], TelfinErrorCode::UserInfoFailed)
            .await?;
        resp.json()
            .await
            .map_err(|e| CallControlError::telfin(TelfinErrorCode::UserInfoFailed, e))
    }

    pub async fn get_call_history(
        &mut self,
        telfin_client_id: &str,
        query: &CallHistoryQuery,
    ) -> Result<Vec<TelfinCallRecord>, CallControlError> {
        let url = endpoint(&self.api_base, &["client", telfin_client_id, "call_history"])?;
        let resp = self
            .authorized_get(url, &query.params(), TelfinErrorCode::CallHistoryFailed)
            .await?;
        let page: CallHistoryPage = resp
            .json()
            .await
            .map_err(|e| CallControlError::telfin(TelfinErrorCode::CallHistoryFailed, e))?;
        info!(
            telfin_client_id,
            count = page.call_history.len(),
            "telfin call history fetched"
        );
        Ok(page.call_history)
    }
}

/// Basic-auth API: call record download and temporary storage urls.
#[derive(Clone)]
pub struct TelfinBasicApi {
    http: reqwest::Client,
    api_base: Url,
    login: String,
    password: String,
    telfin_client_id: String,
}

impl TelfinBasicApi {
    pub fn new(
        http: reqwest::Client,
        api_base: Url,
        login: String,
        password: String,
        telfin_client_id: String,
    ) -> Self {
        Self {
            http,
            api_base,
            login,
            password,
            telfin_client_id,
        }
    }

    /// Verifies the credentials against the user endpoint.
    pub async fn get_user_info(&self) -> Result<TelfinUserInfo, CallControlError> {
        let code = TelfinErrorCode::UserInfoFailed;
        let resp = self
            .http
            .get(endpoint(&self.api_base, &["user"])?)
            .basic_auth(&self.login, Some(&self.password))
            .send()
            .await
            .map_err(|e| CallControlError::telfin(code, e))?;
        let status = resp.status();
        if is_auth_rejection(status) {
            return Err(CallControlError::telfin(
                TelfinErrorCode::AuthFailed,
                format!("basic credentials rejected with {status}"),
            ));
        }
        if !status.is_success() {
            return Err(CallControlError::telfin(code, format!("user returned {status}")));
        }
        resp.json()
            .await
            .map_err(|e| CallControlError::telfin(code, e))
    }

    async fn get(
        &self,
        record_uuid: &str,
        action: &str,
        code: TelfinErrorCode,
    ) -> Result<reqwest::Response, CallControlError> {
        let url = endpoint(
            &self.api_base,
            &["client", self.telfin_client_id.as_str(), "record", record_uuid, action],
        )?;
        let resp = self
            .http
            .get(url)
            .basic_auth(&self.login, Some(&self.password))
            .send()
            .await
            .map_err(|e| CallControlError::telfin(code, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CallControlError::telfin(
                code,
                format!("record {record_uuid} {action} returned {status}"),
            ));
        }
        Ok(resp)
    }

    /// Returns the content type reported by the provider and the audio bytes.
    pub async fn download_record(
        &self,
        record_uuid: &str,
    ) -> Result<(Option<String>, Bytes), CallControlError> {
        let code = TelfinErrorCode::RecordDownloadFailed;
        let resp = self.get(record_uuid, "download", code).await?;
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| CallControlError::telfin(code, e))?;
        Ok((content_type, bytes))
    }

    pub async fn storage_url(&self, record_uuid: &str) -> Result<StorageUrl, CallControlError> {
        let code = TelfinErrorCode::StorageUrlFailed;
        let resp = self.get(record_uuid, "storage_url", code).await?;
        let raw: Value = resp
            .json()
            .await
            .map_err(|e| CallControlError::telfin(code, e))?;
        Ok(StorageUrl::from_value(raw))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_keep_trailing_slash() {
        let base = Url::parse("https://apiproxy.telphin.ru").unwrap();
        let url = endpoint(&base, &["client", "42", "record", "r-1", "download"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://apiproxy.telphin.ru/api/ver1.0/client/42/record/r-1/download/"
        );
        assert_eq!(
            endpoint(&base, &["user"]).unwrap().as_str(),
            "https://apiproxy.telphin.ru/api/ver1.0/user/"
        );
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("привет", 3), "при");
        assert_eq!(truncate("ok", 10), "ok");
    }
}
