mod adapters;
mod bootstrap;
mod health;
mod operator;
#[cfg(test)]
mod test_support;
mod twiml;
mod webhooks;

use std::time::Duration;

use anyhow::Result;
use axum::Router;
use callhook_core::config::{AppConfig, LoadOptions};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use callhook_core::config::LogFormat::*;

    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
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
    // Logging must be up before bootstrap so its events are visible.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let router = Router::new()
        .merge(health::router(app.db_pool.clone()))
        .merge(webhooks::router(webhooks::WebhookState::new(
            app.runtime.clone(),
            &app.config.server.public_base_url,
        )))
        .merge(operator::router(operator::OperatorState::new(app.runtime.clone())));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = app.scheduler_worker();
    let worker_handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(event_name = "system.server.started", bind_address = %address, "callhook-server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(error) = tokio::signal::ctrl_c().await {
                warn!(event_name = "system.server.signal_failed", error = %error, "ctrl-c handler failed");
            }
            info!(event_name = "system.server.stopping", "callhook-server stopping");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, worker_handle).await.is_err() {
        warn!(
            event_name = "system.server.worker_timeout",
            grace_secs = grace.as_secs(),
            "scheduler worker did not stop in time"
        );
    }
    app.db_pool.close().await;
    info!(event_name = "system.server.stopped", "callhook-server stopped");

    Ok(())
}
