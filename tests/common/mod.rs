#![allow(dead_code)]

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use callcontrol::config::Config;
use callcontrol::db::Storage;
use callcontrol::{AppState, callcontrol_router};
use serde_json::Value;
use std::{
    fs,
    path::PathBuf,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tower::ServiceExt;

pub const API_KEY: &str = "test-key";

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    db_path: PathBuf,
    storage_dir: PathBuf,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = fs::remove_file(format!("{}{suffix}", self.db_path.display()));
        }
        let _ = fs::remove_dir_all(&self.storage_dir);
    }
}

fn unique_name(tag: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX_EPOCH")
        .as_nanos();
    format!("callcontrol-{tag}-{}-{nanos}", std::process::id())
}

/// Fresh app over a temp sqlite file. `tweak` runs on the config before wiring.
pub async fn spawn_app(tag: &str, tweak: impl FnOnce(&mut Config)) -> TestApp {
    let name = unique_name(tag);
    let db_path = std::env::temp_dir().join(format!("{name}.sqlite"));
    let storage_dir = std::env::temp_dir().join(format!("{name}-audio"));

    // Keep test behavior stable regardless of the repo's runtime `config.toml`.
    let mut cfg = Config::default();
    cfg.basic.api_key = API_KEY.to_string();
    cfg.basic.database_url = format!("sqlite:{}", db_path.display());
    cfg.basic.storage_dir = storage_dir.clone();
    cfg.telegram.bot_token = None;
    tweak(&mut cfg);

    let storage = Storage::connect(&cfg.basic.database_url)
        .await
        .expect("open test database");
    let state = AppState::build(Arc::new(cfg), storage, reqwest::Client::new())
        .await
        .expect("build app state");
    let app = callcontrol_router(state.clone());
    TestApp {
        app,
        state,
        db_path,
        storage_dir,
    }
}

impl TestApp {
    pub async fn request(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-api-key", API_KEY);
        self.send(builder, body).await
    }

    pub async fn send(
        &self,
        builder: axum::http::request::Builder,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let req = match body {
            Some(v) => builder
                .header("content-type", "application/json")
                .body(Body::from(v.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("failed to build request");
        let resp = self.app.clone().oneshot(req).await.expect("request failed");
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("failed to read response body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, json)
    }

    /// New organization with an admin; returns `(organization_id, user_id)`.
    pub async fn admin(&self, email: &str, org: &str) -> (String, String) {
        let (status, body) = self
            .request(
                "POST",
                "/api/users/profile",
                Some(serde_json::json!({ "email": email, "organization_name": org })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        (
            body["organization"]["id"].as_str().unwrap().to_string(),
            body["user"]["id"].as_str().unwrap().to_string(),
        )
    }

    /// Operator joining an existing organization.
    pub async fn member(&self, email: &str, organization_id: &str) -> String {
        let (status, body) = self
            .request(
                "POST",
                "/api/users/profile",
                Some(serde_json::json!({
                    "email": email,
                    "organization_id": organization_id,
                    "role": "operator",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["user"]["id"].as_str().unwrap().to_string()
    }
}
