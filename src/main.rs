//! mediadrop - media download service
//!
//! Entry point: loads configuration, starts the expiry sweeper and serves the
//! REST API until Ctrl-C.

use std::net::SocketAddr;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mediadrop::jobs;
use mediadrop::{AppState, Config, build_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mediadrop=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Starting mediadrop");

    let config = Config::from_env()?;
    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .with_context(|| {
            format!(
                "Cannot create output directory '{}'",
                config.output_dir.display()
            )
        })?;
    tracing::info!(
        output_dir = %config.output_dir.display(),
        lifetime_secs = config.file_lifetime.as_secs(),
        max_concurrent_downloads = config.max_concurrent_downloads,
        "Configuration loaded"
    );

    let mut scheduler = jobs::start_scheduler(&config).await?;

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.host, config.port))?;

    let state = AppState::from_config(config);
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Cannot bind {}", addr))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("axum::serve")?;

    tracing::info!("Shutting down");
    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!(error = %e, "Job scheduler did not shut down cleanly");
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
