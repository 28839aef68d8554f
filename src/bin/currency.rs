//! Concierge Currency Agent
//!
//! 汇率 peer agent：同一编排器 + 本地 get_exchange_rate 工具，通过 A2A 对外提供换算技能。
//!
//! 启动: cargo run --bin concierge-currency

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use concierge::a2a::{create_router, A2aState};
use concierge::agent::{build_currency_orchestrator, currency_agent_card};
use concierge::config::load_config;
use concierge::core::ShutdownManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    concierge::observability::init();

    let config_path = std::env::args().nth(1).map(Into::into);
    let cfg = load_config(config_path).context("Failed to load configuration")?;

    let orchestrator = Arc::new(
        build_currency_orchestrator(&cfg).context("Failed to start the currency agent")?,
    );
    let state = Arc::new(A2aState {
        orchestrator: Arc::clone(&orchestrator),
        card: currency_agent_card(&cfg),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.currency.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(rates = %cfg.currency.rates_url, "Currency Agent listening on http://{}", addr);

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown.signal())
        .await
        .context("Server error")?;

    if let Some(orchestrator) = Arc::into_inner(orchestrator) {
        orchestrator.shutdown().await;
    }
    Ok(())
}
