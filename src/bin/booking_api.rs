//! Concierge Booking API
//!
//! 预订 REST 后端，供 MCP Tool Provider 包装为工具。
//!
//! 启动: cargo run --bin concierge-booking-api

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use concierge::booking::{create_router, BookingState};
use concierge::config::load_config;
use concierge::core::ShutdownManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    concierge::observability::init();

    let config_path = std::env::args().nth(1).map(Into::into);
    let cfg = load_config(config_path).context("Failed to load configuration")?;

    let state = BookingState::from_config(&cfg)
        .await
        .context("Failed to configure booking API authorization")?;
    tracing::info!(
        mode = ?cfg.auth.mode,
        required_scope = %cfg.booking.required_scope,
        policy = state.policy.is_some(),
        "booking API authorization configured"
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.booking.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Booking API listening on http://{}", addr);

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    axum::serve(listener, create_router(Arc::new(state)))
        .with_graceful_shutdown(shutdown.signal())
        .await
        .context("Server error")?;
    Ok(())
}
