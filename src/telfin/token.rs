use chrono::{DateTime, Utc};
use oauth2::{
    AuthType, ClientId, ClientSecret, EndpointNotSet, EndpointSet, TokenResponse, TokenUrl,
    basic::BasicClient,
};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::TelfinErrorCode;
use crate::error::CallControlError;

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

type TelfinOauth2Client =
    BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

#[derive(Debug, Clone)]
struct CachedToken {
    secret: String,
    /// Instant after which the token is treated as stale (expiry minus buffer).
    refresh_after: DateTime<Utc>,
}

/// In-memory OAuth2 client-credentials token for one Telfin application.
pub struct TelfinTokenManager {
    oauth: TelfinOauth2Client,
    http: reqwest::Client,
    buffer: Duration,
    token: Option<CachedToken>,
}

impl TelfinTokenManager {
    pub fn new(
        http: reqwest::Client,
        api_base: &Url,
        client_id: &str,
        client_secret: &str,
        buffer: Duration,
    ) -> Result<Self, CallControlError> {
        let token_url = api_base.join("oauth/token")?;
        let oauth = BasicClient::new(ClientId::new(client_id.to_string()))
            .set_client_secret(ClientSecret::new(client_secret.to_string()))
            .set_auth_type(AuthType::RequestBody)
            .set_token_uri(TokenUrl::from_url(token_url));
        Ok(Self {
            oauth,
            http,
            buffer,
            token: None,
        })
    }

    pub fn has_valid_token(&self) -> bool {
        self.has_valid_token_at(Utc::now())
    }

    pub fn has_valid_token_at(&self, now: DateTime<Utc>) -> bool {
        self.token.as_ref().is_some_and(|t| now < t.refresh_after)
    }

    pub fn access_token(&self) -> Option<&str> {
        self.token.as_ref().map(|t| t.secret.as_str())
    }

    pub fn clear_token(&mut self) {
        if self.token.take().is_some() {
            debug!("telfin access token cleared");
        }
    }

    /// Return a usable access token, fetching a new one when the cached token
    /// is missing or inside the refresh buffer. On error no token is kept.
    pub async fn ensure_valid_token(&mut self) -> Result<String, CallControlError> {
        if self.has_valid_token()
            && let Some(token) = self.access_token()
        {
            return Ok(token.to_string());
        }
        self.clear_token();

        let response = self
            .oauth
            .exchange_client_credentials()
            .request_async(&self.http)
            .await
            .map_err(|e| {
                let e = CallControlError::from(e);
                warn!(error = %e, "telfin token request failed");
                CallControlError::telfin(TelfinErrorCode::AuthFailed, e)
            })?;

        let secret = response.access_token().secret().clone();
        if secret.is_empty() {
            return Err(CallControlError::telfin(
                TelfinErrorCode::AuthFailed,
                "token endpoint returned an empty access token",
            ));
        }
        let lifetime = response.expires_in().unwrap_or(DEFAULT_TOKEN_LIFETIME);
        self.store_token(secret.clone(), lifetime, Utc::now());
        info!(lifetime_secs = lifetime.as_secs(), "telfin access token refreshed");
        Ok(secret)
    }

    /// The buffer is capped at half the lifetime so a fresh token is always valid.
    fn store_token(&mut self, secret: String, lifetime: Duration, now: DateTime<Utc>) {
        let lifetime = lifetime.max(Duration::from_secs(1));
        let buffer = self.buffer.min(lifetime / 2);
        let usable = chrono::Duration::from_std(lifetime - buffer)
            .unwrap_or_else(|_| chrono::Duration::seconds(1));
        self.token = Some(CachedToken {
            secret,
            refresh_after: now + usable,
        });
    }
}
