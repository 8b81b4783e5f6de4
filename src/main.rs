use callcontrol::config::CONFIG;
use callcontrol::db::Storage;
use callcontrol::{AppState, callcontrol_router};
use mimalloc::MiMalloc;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = Arc::new(CONFIG.clone());

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.basic.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        database_url = %cfg.basic.database_url,
        proxy = %cfg.basic.proxy.as_ref().map(|u| u.as_str()).unwrap_or("<none>"),
        loglevel = %cfg.basic.loglevel,
        telegram = cfg.telegram.bot_token.is_some(),
        storage_dir = %cfg.basic.storage_dir.display(),
    );
    if cfg.basic.api_key.is_empty() {
        warn!("basic.api_key is not set (CALLCONTROL_BASIC__API_KEY); every /api request will be rejected");
    }

    let storage = Storage::connect(&cfg.basic.database_url).await?;

    let mut http = reqwest::Client::builder()
        .user_agent(concat!("callcontrol/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(120));
    if let Some(proxy) = cfg.basic.proxy.as_ref() {
        http = http.proxy(reqwest::Proxy::all(proxy.as_str())?);
    }
    let http = http.build()?;

    let state = AppState::build(cfg.clone(), storage, http).await?;

    let sessions = state.sessions.clone();
    let every = Duration::from_secs(cfg.telegram.purge_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match sessions.purge_expired().await {
                Ok(0) => {}
                Ok(n) => info!(purged = n, "expired telegram sessions removed"),
                Err(e) => warn!(error = %e, "telegram session purge failed"),
            }
        }
    });

    let app = callcontrol_router(state);
    let listener = TcpListener::bind(&cfg.basic.listen_addr).await?;
    info!("HTTP server listening on {}", cfg.basic.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}
