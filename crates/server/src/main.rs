mod bootstrap;
mod fetch;
mod health;
mod resolver;

use std::time::Duration;

use anyhow::Result;
use botfleet_core::config::{AppConfig, LoadOptions};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use botfleet_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_env("BOTFLEET_LOG")
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
    // Logging must be up before bootstrap so its events are captured.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.health_state(),
    )
    .await?;

    app.start().await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        shards = app.config.fleet.shards,
        polling_interval_secs = app.config.fleet.polling_interval_secs,
        "botfleet-server started"
    );

    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "botfleet-server stopping"
    );

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, app.shutdown()).await.is_err() {
        tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "graceful shutdown window elapsed; exiting with work outstanding"
        );
    }

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
