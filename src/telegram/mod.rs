//! Telegram integration: Bot API client, update types, chat linking sessions
//! and the inbound webhook processor.

pub mod bot_api;
pub mod session;
pub mod types;
pub mod webhook;

pub use bot_api::TelegramBot;
pub use session::{SessionService, SessionStatus, StartedSession};
