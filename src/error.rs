use axum::{Json, http::StatusCode, response::IntoResponse};
use oauth2::basic::BasicErrorResponseType;
use oauth2::reqwest::Error as ReqwestClientError;
use oauth2::{HttpClientError, RequestTokenError, StandardErrorResponse};
use serde::Serialize;
use sqlx::Error as SqlxError;
use thiserror::Error as ThisError;
use tracing::error;

use crate::telfin::TelfinErrorCode;

#[derive(Debug, ThisError)]
pub enum CallControlError {
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] SqlxError),

    #[error("OAuth2 token request error: {0}")]
    Oauth2Token(String),

    #[error("OAuth2 server error: {error}")]
    Oauth2Server { error: String },

    #[error("Ractor error: {0}")]
    RactorError(String),

    #[error("invalid or missing API key")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("session code not found")]
    SessionNotFound,

    #[error("session code has expired")]
    SessionExpired,

    #[error("session code has already been used")]
    SessionAlreadyUsed,

    #[error("this Telegram chat is already linked to another user")]
    ChatAlreadyLinked,

    #[error("Telegram bot is not configured")]
    TelegramNotConfigured,

    #[error("Telegram API error: {0}")]
    Telegram(String),

    #[error("[{code}] {message}")]
    Telfin {
        code: TelfinErrorCode,
        message: String,
    },

    #[error("Upstream error with status: {0}")]
    UpstreamStatus(StatusCode),
}

impl CallControlError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn telfin(code: TelfinErrorCode, message: impl ToString) -> Self {
        Self::Telfin {
            code,
            message: message.to_string(),
        }
    }

    /// Network-level failures and upstream 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Reqwest(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            Self::UpstreamStatus(code) => code.is_server_error(),
            _ => false,
        }
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Validation(_) | Self::Json(_) | Self::UrlParse(_) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
            }
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::PayloadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE"),
            Self::SessionNotFound => (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND"),
            Self::SessionExpired => (StatusCode::GONE, "SESSION_EXPIRED"),
            Self::SessionAlreadyUsed => (StatusCode::CONFLICT, "SESSION_USED"),
            Self::ChatAlreadyLinked => (StatusCode::CONFLICT, "CHAT_ALREADY_LINKED"),
            Self::TelegramNotConfigured => (StatusCode::SERVICE_UNAVAILABLE, "TELEGRAM_NOT_CONFIGURED"),
            Self::Telegram(_) => (StatusCode::BAD_GATEWAY, "TELEGRAM_ERROR"),
            Self::Telfin { code, .. } => match code {
                TelfinErrorCode::NotConfigured => (StatusCode::BAD_REQUEST, code.as_str()),
                TelfinErrorCode::AuthFailed => (StatusCode::UNAUTHORIZED, code.as_str()),
                _ => (StatusCode::BAD_GATEWAY, code.as_str()),
            },
            Self::Oauth2Token(_) | Self::Oauth2Server { .. } => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED")
            }
            Self::Reqwest(_) => (StatusCode::BAD_GATEWAY, "BAD_GATEWAY"),
            Self::UpstreamStatus(code) => match *code {
                StatusCode::TOO_MANY_REQUESTS => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT"),
                StatusCode::UNAUTHORIZED => (StatusCode::BAD_GATEWAY, "UPSTREAM_UNAUTHORIZED"),
                StatusCode::FORBIDDEN => (StatusCode::BAD_GATEWAY, "UPSTREAM_FORBIDDEN"),
                StatusCode::NOT_FOUND => (StatusCode::NOT_FOUND, "UPSTREAM_NOT_FOUND"),
                _ => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            },
            Self::DatabaseError(_) | Self::RactorError(_) | Self::Io(_) | Self::Csv(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        }
    }
}

impl
    From<
        RequestTokenError<
            HttpClientError<ReqwestClientError>,
            StandardErrorResponse<BasicErrorResponseType>,
        >,
    > for CallControlError
{
    fn from(
        e: RequestTokenError<
            HttpClientError<ReqwestClientError>,
            StandardErrorResponse<BasicErrorResponseType>,
        >,
    ) -> Self {
        match e {
            RequestTokenError::ServerResponse(err) => CallControlError::Oauth2Server {
                error: err.error().to_string(),
            },
            RequestTokenError::Request(req_e) => {
                CallControlError::Oauth2Token(format!("request failed: {}", req_e))
            }
            RequestTokenError::Parse(parse_err, _body) => {
                CallControlError::Json(parse_err.into_inner())
            }
            RequestTokenError::Other(s) => CallControlError::Oauth2Token(s),
        }
    }
}

impl IntoResponse for CallControlError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = self.status_and_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "request failed with internal error");
            "An internal server error occurred.".to_string()
        } else {
            self.to_string()
        };
        (
            status,
            Json(ApiErrorResponse {
                success: false,
                error: message,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

/// Body returned by every failing endpoint.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
}
