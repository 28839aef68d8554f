//! Concierge - 酒店预订 Agent 服务
//!
//! 入口：初始化日志与配置，装配编排器，启动 A2A 服务端直至收到关闭信号。

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use concierge::a2a::{create_router, A2aState};
use concierge::agent::{build_orchestrator, hotel_agent_card};
use concierge::config::load_config;
use concierge::core::ShutdownManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    concierge::observability::init();

    let config_path = std::env::args().nth(1).map(Into::into);
    let cfg = load_config(config_path).context("Failed to load configuration")?;

    let orchestrator = build_orchestrator(&cfg)
        .await
        .context("Failed to start the hotel booking agent")?;
    if let Some(peers) = orchestrator.peers() {
        tracing::info!(peers = ?peers.names(), "peer agents available");
    }
    let orchestrator = Arc::new(orchestrator);

    let state = Arc::new(A2aState {
        orchestrator: Arc::clone(&orchestrator),
        card: hotel_agent_card(&cfg),
    });
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.agent.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("{} listening on http://{}", cfg.agent.name, addr);

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.signal())
        .await
        .context("Server error")?;

    // 路由已释放 state，此时编排器只剩这一个引用
    match Arc::into_inner(orchestrator) {
        Some(orchestrator) => orchestrator.shutdown().await,
        None => tracing::warn!("orchestrator still shared at shutdown, skipping cleanup"),
    }
    Ok(())
}
