pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod server;
pub mod service;
pub mod telegram;
pub mod telfin;

pub use error::CallControlError;
pub use server::{AppState, callcontrol_router};
