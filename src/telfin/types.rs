use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct TelfinUserInfo {
    #[serde(deserialize_with = "string_or_number")]
    pub client_id: String,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallHistoryPage {
    #[serde(default)]
    pub call_history: Vec<TelfinCallRecord>,
}

/// One entry of the provider's call history. Unknown fields are kept in `extra`
/// and stored verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelfinCallRecord {
    pub call_uuid: String,
    #[serde(default, alias = "direction")]
    pub flow: Option<String>,
    #[serde(default, alias = "from_number")]
    pub from_username: Option<String>,
    #[serde(default, alias = "to_number")]
    pub to_username: Option<String>,
    #[serde(default, alias = "start_time")]
    pub start_time_gmt: Option<String>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub record_uuid: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct CallHistoryQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub count: u32,
}

impl CallHistoryQuery {
    /// Provider expects `YYYY-MM-DD HH:MM:SS` in UTC.
    pub fn params(&self) -> [(&'static str, String); 4] {
        let fmt = "%Y-%m-%d %H:%M:%S";
        [
            ("start_datetime", self.start.format(fmt).to_string()),
            ("end_datetime", self.end.format(fmt).to_string()),
            ("order", "desc".to_string()),
            ("count", self.count.to_string()),
        ]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageUrl {
    pub url: Option<String>,
    pub raw: Value,
}

impl StorageUrl {
    pub fn from_value(raw: Value) -> Self {
        let url = ["record_url", "storage_url", "url"]
            .iter()
            .find_map(|k| raw.get(*k).and_then(Value::as_str))
            .map(str::to_string);
        Self { url, raw }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}
