use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;
use url::Url;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
pub const TELFIN_API_BASE: &str = "https://apiproxy.telphin.ru";

/// Process-wide configuration, read once by `main`.
/// Library code receives an `Arc<Config>` through the router state instead.
pub static CONFIG: LazyLock<Config> = LazyLock::new(|| {
    Config::load().unwrap_or_else(|e| panic!("invalid configuration: {e}"))
});

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub basic: BasicConfig,
    pub telegram: TelegramConfig,
    pub telfin: TelfinConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicConfig {
    pub listen_addr: String,
    pub database_url: String,
    pub loglevel: String,
    /// Shared service key the dashboard presents on every `/api` call.
    /// Empty (the default) refuses every `/api` request.
    pub api_key: String,
    pub proxy: Option<Url>,
    pub storage_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
            database_url: "sqlite:callcontrol.sqlite".to_string(),
            loglevel: "info".to_string(),
            api_key: String::new(),
            proxy: None,
            storage_dir: PathBuf::from("storage"),
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub bot_username: Option<String>,
    pub api_base: Url,
    pub webhook_url: Option<Url>,
    pub webhook_secret: Option<String>,
    pub session_ttl_secs: u64,
    pub purge_interval_secs: u64,
    pub max_messages_per_second: u32,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            bot_username: None,
            api_base: Url::parse(TELEGRAM_API_BASE).expect("static telegram url"),
            webhook_url: None,
            webhook_secret: None,
            session_ttl_secs: 600,
            purge_interval_secs: 900,
            max_messages_per_second: 25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelfinConfig {
    pub api_base: Url,
    pub token_buffer_secs: u64,
    pub max_auth_attempts: u32,
    pub history_page_size: u32,
}

impl Default for TelfinConfig {
    fn default() -> Self {
        Self {
            api_base: Url::parse(TELFIN_API_BASE).expect("static telfin url"),
            token_buffer_secs: 60,
            max_auth_attempts: 2,
            history_page_size: 500,
        }
    }
}

impl Config {
    /// Defaults, then `config.toml`, then `CALLCONTROL_*` environment variables
    /// (`__` separates sections, e.g. `CALLCONTROL_TELEGRAM__BOT_TOKEN`).
    pub fn load() -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("CALLCONTROL_").split("__"))
            .extract()
    }

    pub fn telegram(&self) -> &TelegramConfig {
        &self.telegram
    }

    pub fn telfin(&self) -> &TelfinConfig {
        &self.telfin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_service_key_is_unset() {
        assert!(Config::default().basic.api_key.is_empty());
    }

    #[test]
    fn env_overrides_nested_sections() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("CALLCONTROL_TELEGRAM__SESSION_TTL_SECS", "120");
            jail.set_env("CALLCONTROL_BASIC__API_KEY", "secret");
            let cfg = Config::load()?;
            assert_eq!(cfg.telegram.session_ttl_secs, 120);
            assert_eq!(cfg.basic.api_key, "secret");
            assert_eq!(cfg.telfin.max_auth_attempts, 2);
            Ok(())
        });
    }
}
