use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{ok, result, description}` envelope returned by every Bot API method.
#[derive(Debug, Deserialize)]
pub struct TelegramResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
    #[serde(default)]
    pub edited_message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    pub date: i64,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendMessage<'a> {
    pub chat_id: i64,
    pub text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<&'a str>,
    pub disable_web_page_preview: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetWebhook<'a> {
    pub url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_token: Option<&'a str>,
    pub allowed_updates: &'a [&'a str],
    pub drop_pending_updates: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookInfo {
    pub url: String,
    #[serde(default)]
    pub has_custom_certificate: bool,
    #[serde(default)]
    pub pending_update_count: i64,
    #[serde(default)]
    pub last_error_date: Option<i64>,
    #[serde(default)]
    pub last_error_message: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BotInfo {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// Parsed intent of an inbound chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Start(Option<String>),
    Stop,
    Status,
    Other,
}

impl BotCommand {
    /// `/start CODE`, `/start@bot CODE`, `/stop`, `/status`; anything else is `Other`.
    pub fn parse(text: &str) -> Self {
        let mut parts = text.split_whitespace();
        let Some(head) = parts.next() else {
            return Self::Other;
        };
        let command = head.split('@').next().unwrap_or(head);
        match command {
            "/start" => Self::Start(parts.next().map(|c| c.trim().to_uppercase())),
            "/stop" => Self::Stop,
            "/status" => Self::Status,
            _ => Self::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_with_code_and_bot_suffix() {
        assert_eq!(
            BotCommand::parse("/start abcd2345"),
            BotCommand::Start(Some("ABCD2345".to_string()))
        );
        assert_eq!(
            BotCommand::parse("/start@callcontrol_bot XY"),
            BotCommand::Start(Some("XY".to_string()))
        );
        assert_eq!(BotCommand::parse("/start"), BotCommand::Start(None));
        assert_eq!(BotCommand::parse("/stop"), BotCommand::Stop);
        assert_eq!(BotCommand::parse("hello"), BotCommand::Other);
        assert_eq!(BotCommand::parse(""), BotCommand::Other);
    }

    #[test]
    fn error_envelope_has_no_result() {
        let resp: TelegramResponse<BotInfo> = serde_json::from_str(
            r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#,
        )
        .unwrap();
        assert!(!resp.ok);
        assert!(resp.result.is_none());
        assert_eq!(resp.description.as_deref(), Some("Unauthorized"));
    }
}
