//! Telfin (Telphin) telephony integration.
//!
//! Two auth flavours exist on the provider side: OAuth2 client credentials
//! for the call history API and HTTP Basic for record downloads.

pub mod client;
pub mod service;
pub mod token;
pub mod types;

use serde::Serialize;
use std::fmt;

pub use client::{TelfinBasicApi, TelfinOauthApi};
pub use service::TelfinService;
pub use token::TelfinTokenManager;

/// Support diagnostics codes, rendered as `[TELFIN-API-00N]` in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TelfinErrorCode {
    NotConfigured,
    AuthFailed,
    CallHistoryFailed,
    RecordDownloadFailed,
    StorageUrlFailed,
    UserInfoFailed,
}

impl TelfinErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotConfigured => "TELFIN-API-001",
            Self::AuthFailed => "TELFIN-API-002",
            Self::CallHistoryFailed => "TELFIN-API-003",
            Self::RecordDownloadFailed => "TELFIN-API-004",
            Self::StorageUrlFailed => "TELFIN-API-005",
            Self::UserInfoFailed => "TELFIN-API-006",
        }
    }
}

impl fmt::Display for TelfinErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallControlError;

    #[test]
    fn error_message_embeds_code() {
        let err = CallControlError::telfin(TelfinErrorCode::CallHistoryFailed, "status 500");
        assert_eq!(err.to_string(), "[TELFIN-API-003] status 500");
    }
}
