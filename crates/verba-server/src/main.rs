//! verba-server: the Verba platform HTTP service.
//!
//! Single Tokio process serving the entitlement query API, the
//! subscription management API, the referral API, and the
//! payment-provider webhook endpoint.

mod auth;
mod config;
mod error;
mod events;
mod routes;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use verba_billing::provider::HttpProvider;

use crate::config::ServerConfig;
use crate::events::EventBus;

/// Server-wide shared state.
#[derive(Clone)]
pub struct AppState {
    /// Database connection.
    pub db: Arc<tokio::sync::Mutex<rusqlite::Connection>>,
    /// Configuration.
    pub config: Arc<ServerConfig>,
    /// Payment-provider client.
    pub provider: Arc<HttpProvider>,
    /// Event bus for lifecycle notifications.
    pub event_bus: EventBus,
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("verba=info".parse()?),
        )
        .init();

    info!("Verba server starting");

    let config = ServerConfig::load()?;
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let db_path = data_dir.join("verba.db");
    let conn = verba_db::open(&db_path)?;
    let db = Arc::new(tokio::sync::Mutex::new(conn));

    let provider = HttpProvider::new(
        config.provider.base_url.clone(),
        config.provider.api_key.clone(),
        Duration::from_secs(config.provider.timeout_secs),
    )?;

    let event_bus = EventBus::new(1000);
    let state = AppState {
        db,
        config: Arc::new(config),
        provider: Arc::new(provider),
        event_bus: event_bus.clone(),
    };

    let app = routes::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&state.config.http.listen_addr).await?;
    info!("Listening on {}", state.config.http.listen_addr);

    event_bus.emit(
        "ServerStarted",
        unix_now(),
        serde_json::json!({ "version": env!("CARGO_PKG_VERSION") }),
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Ctrl-C received, shutting down");
        })
        .await?;

    info!("Server stopped");
    Ok(())
}
