use backon::{ExponentialBuilder, Retryable};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::types::{BotInfo, SendMessage, SetWebhook, TelegramResponse, WebhookInfo};
use crate::config::TelegramConfig;
use crate::error::CallControlError;

const ALLOWED_UPDATES: &[&str] = &["message", "edited_message"];

fn default_retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(500))
        .with_max_delay(Duration::from_secs(3))
        .with_max_times(3)
        .with_jitter()
}

/// Stateless-ish Telegram Bot API caller. Cheap to clone.
#[derive(Clone)]
pub struct TelegramBot {
    client: reqwest::Client,
    api_base: Url,
    token: Option<Arc<str>>,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl TelegramBot {
    pub fn new(client: reqwest::Client, cfg: &TelegramConfig) -> Self {
        let per_second = NonZeroU32::new(cfg.max_messages_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            client,
            api_base: cfg.api_base.clone(),
            token: cfg.bot_token.as_deref().filter(|t| !t.is_empty()).map(Arc::from),
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.token.is_some()
    }

    fn method_url(&self, method: &str) -> Result<Url, CallControlError> {
        let token = self.token.as_ref().ok_or(CallControlError::TelegramNotConfigured)?;
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| CallControlError::validation("telegram api_base cannot be a base URL"))?
            .pop_if_empty()
            .push(&format!("bot{token}"))
            .push(method);
        Ok(url)
    }

    async fn call<P, R>(&self, method: &str, payload: &P) -> Result<R, CallControlError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let url = self.method_url(method)?;

        // The method URL embeds the bot token; reqwest errors must not carry it.
        let envelope: TelegramResponse<R> = (|| async {
            let resp = self
                .client
                .post(url.clone())
                .json(payload)
                .send()
                .await
                .map_err(reqwest::Error::without_url)?;
            let status = resp.status();
            if status.is_server_error() {
                return Err(CallControlError::UpstreamStatus(status));
            }
            Ok(resp
                .json::<TelegramResponse<R>>()
                .await
                .map_err(reqwest::Error::without_url)?)
        })
        .retry(default_retry_policy())
        .when(|e: &CallControlError| e.is_retryable())
        .notify(|err, dur: Duration| {
            warn!(method, "Telegram call retrying after error {}, sleeping {:?}", err, dur);
        })
        .await?;

        if !envelope.ok {
            let description = envelope
                .description
                .unwrap_or_else(|| "Unknown Telegram API error".to_string());
            return Err(CallControlError::Telegram(match envelope.error_code {
                Some(code) => format!("{code}: {description}"),
                None => description,
            }));
        }
        envelope
            .result
            .ok_or_else(|| CallControlError::Telegram(format!("{method} returned no result")))
    }

    /// Rate-limited `sendMessage`.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), CallControlError> {
        self.limiter.until_ready().await;
        let payload = SendMessage {
            chat_id,
            text,
            parse_mode: Some("HTML"),
            disable_web_page_preview: true,
        };
        let _: Value = self.call("sendMessage", &payload).await?;
        debug!(chat_id, "Telegram message sent");
        Ok(())
    }

    pub async fn set_webhook(
        &self,
        url: &str,
        secret_token: Option<&str>,
    ) -> Result<bool, CallControlError> {
        let payload = SetWebhook {
            url,
            secret_token,
            allowed_updates: ALLOWED_UPDATES,
            drop_pending_updates: false,
        };
        self.call("setWebhook", &payload).await
    }

    pub async fn delete_webhook(&self) -> Result<bool, CallControlError> {
        self.call("deleteWebhook", &serde_json::json!({})).await
    }

    pub async fn get_webhook_info(&self) -> Result<WebhookInfo, CallControlError> {
        self.call("getWebhookInfo", &serde_json::json!({})).await
    }

    pub async fn get_me(&self) -> Result<BotInfo, CallControlError> {
        self.call("getMe", &serde_json::json!({})).await
    }
}

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}
