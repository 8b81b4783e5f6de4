//! HTTP handlers, one module per endpoint family. Every success body carries
//! `"success": true`; failures go through [`CallControlError`]'s `IntoResponse`.

pub mod calls;
pub mod events;
pub mod exports;
pub mod health;
pub mod notifications;
pub mod records;
pub mod telegram;
pub mod telfin;
pub mod trackers;
pub mod users;

use axum::Json;
use axum::extract::{FromRequest, Request, rejection::JsonRejection};
use axum::http::StatusCode;
use serde::Deserialize;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::CallControlError;

/// `Json<T>` whose rejections use the crate's error body.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = CallControlError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => Err(
                CallControlError::PayloadTooLarge("request body too large".to_string()),
            ),
            Err(rejection) => Err(CallControlError::Validation(rejection.body_text())),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OrgQuery {
    pub organization_id: String,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

impl OrgQuery {
    pub fn limit(&self, default: i64, max: i64) -> i64 {
        self.limit.unwrap_or(default).clamp(1, max)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// Serialize `body` as an object and add `"success": true`.
pub fn success<T: Serialize>(body: T) -> Result<Json<Value>, CallControlError> {
    let mut map = match serde_json::to_value(body)? {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("data".to_string(), other);
            map
        }
    };
    map.insert("success".to_string(), Value::Bool(true));
    Ok(Json(Value::Object(map)))
}

pub fn require_non_empty(field: &str, value: &str) -> Result<(), CallControlError> {
    if value.trim().is_empty() {
        return Err(CallControlError::validation(format!("{field} is required")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_merges_into_objects() {
        let Json(v) = success(json!({"user": {"id": "u"}})).unwrap();
        assert_eq!(v, json!({"success": true, "user": {"id": "u"}}));
        let Json(v) = success(()).unwrap();
        assert_eq!(v, json!({"success": true}));
        let Json(v) = success(vec![1, 2]).unwrap();
        assert_eq!(v, json!({"success": true, "data": [1, 2]}));
    }
}
