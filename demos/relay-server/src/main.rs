//! Relay server: conversation shell sessions and tmux panes over WebSocket.
//!
//! Run with: cargo run -p relay-server
//!
//! Configuration comes from `RELAY_*` variables (a `.env` file is read first).

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context as _;
use axum::{Json, Router, routing::get};
use relay_core::RelayConfig;
use relay_session::{SessionRegistry, storage::FileStorage};
use relay_terminal::TmuxDriver;
use relay_transport::{WsState, create_ws_router};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = RelayConfig::from_env().context("Invalid configuration")?;
    let storage = FileStorage::open(&config.data_dir)
        .await
        .with_context(|| format!("Cannot open data dir {}", config.data_dir.display()))?;
    let driver = Arc::new(TmuxDriver::from_config(&config));

    let registry = SessionRegistry::from_config(&config, driver)
        .context("Cannot resolve workspace root")?
        .with_storage(Arc::new(storage));
    let registry = Arc::new(registry);
    registry.load().await.context("Cannot load conversations")?;
    tracing::info!(root = %registry.workspace().root.display(), "Workspace ready");

    let app = Router::new()
        .route("/healthz", get(healthz))
        .merge(create_ws_router(WsState::new(Arc::clone(&registry), config.max_output_chars)))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Cannot bind {addr}"))?;
    tracing::info!("Server listening on ws://{addr}/ws");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    let saved = registry.flush().await.context("Cannot flush conversations")?;
    tracing::info!(saved, "Shutdown complete");
    Ok(())
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
