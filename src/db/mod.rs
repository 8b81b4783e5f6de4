//! Database module: models, schema and the `Storage` repository.
//!
//! Layout:
//! - `models.rs`: Rust structs mirroring DB rows and the text-encoded enums
//! - `schema.rs`: SQL DDL for initializing the database (SQLite-first)
//! - `sqlite.rs`: pool setup and the `Storage` handle
//! - remaining files: queries grouped by table family (`impl Storage` blocks)

pub mod calls;
pub mod models;
pub mod notifications;
pub mod records;
pub mod schema;
pub mod sqlite;
pub mod telegram;
pub mod telfin;
pub mod trackers;
pub mod users;

pub use calls::{CallAnalysisUpdate, CallFilter};
pub use schema::SQLITE_INIT;
pub use sqlite::{SqlitePool, Storage};
