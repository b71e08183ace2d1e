mod bootstrap;
mod health;
mod ingress;
mod sweep;

use std::time::Duration;

use anyhow::{Context, Result};
use quotewatch_core::config::{AppConfig, LoadOptions};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use quotewatch_core::config::LogFormat::*;

    // RUST_LOG wins over the configured level so operators can raise verbosity per target.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

    match config.logging.format {
        Compact => builder.compact().init(),
        Pretty => builder.pretty().init(),
        Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let server = &app.config.server;
    let address = format!("{}:{}", server.bind_address, server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    let shutdown = CancellationToken::new();
    let sweep = tokio::spawn(sweep::run(
        app.state.clone(),
        Duration::from_secs(server.sweep_interval_secs),
        shutdown.clone(),
    ));

    let routes = ingress::router(app.state.clone())
        .merge(health::router(app.db_pool.clone(), app.state.pending.clone()));

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "quotewatch-server listening"
    );

    let signal = shutdown.clone();
    axum::serve(listener, routes)
        .with_graceful_shutdown(async move {
            wait_for_shutdown().await;
            signal.cancel();
        })
        .await
        .context("http server terminated unexpectedly")?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        armed_watchdogs = app.state.engine.watchdog().armed_count(),
        "quotewatch-server stopping"
    );
    shutdown.cancel();
    let grace = Duration::from_secs(server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, sweep).await.is_err() {
        tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            "sweep did not stop within the graceful shutdown window"
        );
    }
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "failed to listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
}
