//! Arena Brawl Server - authoritative host for a small multiplayer arena brawler
//!
//! This is the main entry point for the game server. It handles:
//! - WebSocket connections for lobby intents and real-time play
//! - A single-threaded host loop that owns the match
//! - HTTP endpoints for health and room creation

mod app;
mod config;
mod events;
mod game;
mod host;
mod http;
mod lobby;
mod session;
mod util;
mod ws;

use std::net::SocketAddr;
use std::rc::Rc;

use tokio::net::TcpListener;
use tokio::task::LocalSet;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::game::ArenaGeometry;
use crate::host::{ContextSettings, HostLoop};
use crate::http::build_router;
use crate::session::WsRelay;
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Arena Brawl Server");
    info!("Server address: {}", config.server_addr);

    let relay = WsRelay::new(config.public_ws_base());
    let seed = config.match_seed.unwrap_or_else(rand::random);
    let rules = config.match_rules();
    info!(capacity = rules.capacity, score_to_win = rules.score_to_win, seed, "Match rules loaded");

    // The host owns non-Send match state, so it runs on a LocalSet
    let settings = ContextSettings {
        rules,
        transport: Rc::new(relay.clone()),
        spatial: Rc::new(ArenaGeometry::default_stage()),
        seed,
    };
    let (host_loop, host) = HostLoop::new(settings, config.auto_open_room);

    // Create application state
    let state = AppState::new(config.clone(), relay, host);

    // Build router
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws?code=<join code>", addr);

    let local = LocalSet::new();
    local.spawn_local(host_loop.run());
    local
        .run_until(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await
        })
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
