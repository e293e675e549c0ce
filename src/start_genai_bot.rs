//! Startup helpers for the bot server.

use std::future::Future;
use std::process::ExitCode;

use anyhow::Context;

use crate::core::config::BotConfig;
use crate::server::{self, AppState};

/// Run the server until Ctrl-C (used by the `genai-bot-server` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting GenAI bot v{}", env!("CARGO_PKG_VERSION"));

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(serve()) {
        tracing::error!("Server error: {e:#}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

async fn serve() -> anyhow::Result<()> {
    let config = BotConfig::from_env().context("invalid bot configuration")?;
    serve_with(config, shutdown_signal()).await
}

async fn serve_with<F>(config: BotConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tracing::info!(
        backend = %config.backend,
        streaming = config.streaming.enabled,
        port = config.server.port,
        "configuration loaded"
    );

    let state = AppState::from_config(&config)
        .await
        .context("failed to initialise bot state")?;

    server::run_server_with_shutdown(state, config.server.port, shutdown)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("server stopped unexpectedly")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Ctrl-C handler unavailable: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
