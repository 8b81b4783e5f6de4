use axum::extract::{FromRef, FromRequestParts};
use axum::http::{HeaderMap, request::Parts};
use axum_extra::TypedHeader;
use headers::Authorization;
use headers::authorization::Bearer;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::error::CallControlError;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const TELEGRAM_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// The service key every `/api` request must present.
#[derive(Clone)]
pub struct ApiKey(pub Arc<str>);

/// Secret Telegram echoes back on webhook deliveries. `None` disables the check.
#[derive(Clone)]
pub struct WebhookSecret(pub Option<Arc<str>>);

fn keys_match(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Accepts either:
/// - Header: `Authorization: Bearer <key>`
/// - Header: `x-api-key: <key>`
pub fn ensure_authorized(
    headers: &HeaderMap,
    bearer: Option<&str>,
    expected: &str,
) -> Result<(), CallControlError> {
    if expected.is_empty() {
        warn!("service key is empty; refusing all API requests");
        return Err(CallControlError::Unauthorized);
    }
    if let Some(token) = bearer
        && keys_match(token, expected)
    {
        return Ok(());
    }
    if let Some(hv) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok())
        && keys_match(hv.trim(), expected)
    {
        return Ok(());
    }
    Err(CallControlError::Unauthorized)
}

#[derive(Debug, Clone, Copy)]
pub struct RequireApiKey;

impl<S> FromRequestParts<S> for RequireApiKey
where
    S: Send + Sync,
    ApiKey: FromRef<S>,
{
    type Rejection = CallControlError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let ApiKey(expected) = ApiKey::from_ref(state);
        let bearer = TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
            .await
            .ok();
        ensure_authorized(
            &parts.headers,
            bearer.as_ref().map(|TypedHeader(auth)| auth.token()),
            &expected,
        )?;
        Ok(Self)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RequireTelegramSecret;

impl<S> FromRequestParts<S> for RequireTelegramSecret
where
    S: Send + Sync,
    WebhookSecret: FromRef<S>,
{
    type Rejection = CallControlError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let WebhookSecret(expected) = WebhookSecret::from_ref(state);
        let Some(expected) = expected else {
            return Ok(Self);
        };
        let presented = parts
            .headers
            .get(TELEGRAM_SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if keys_match(presented, &expected) {
            Ok(Self)
        } else {
            warn!("telegram webhook called with a wrong secret token");
            Err(CallControlError::Unauthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_or_header_is_accepted() {
        let empty = HeaderMap::new();
        assert!(ensure_authorized(&empty, Some("k"), "k").is_ok());
        assert!(ensure_authorized(&empty, Some("nope"), "k").is_err());
        assert!(ensure_authorized(&empty, None, "k").is_err());

        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("k"));
        assert!(ensure_authorized(&headers, None, "k").is_ok());
    }

    #[test]
    fn empty_key_locks_everything() {
        assert!(ensure_authorized(&HeaderMap::new(), Some(""), "").is_err());
    }
}
