//! Batch API Server
//!
//! HTTP service executing batches of internal API sub-requests, optionally
//! inside one enclosing transaction

use anyhow::{Context, Result};
use batchapi::{create_router, version_info, AppConfig, Settings};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Settings first: they choose the log format
    let settings = Settings::new().context("Failed to load server settings")?;

    init_logging(&settings.logging.level, &settings.logging.format)?;
    info!("{}", version_info());

    let app_config = AppConfig::load_default().context("Failed to load API key configuration")?;
    info!("API key configuration loaded: {} keys", app_config.api_keys.len());

    let app = create_router(settings.clone(), app_config).await?;

    let addr = settings.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Batch API server started on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("Batch endpoint: http://{}/batches", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start server: {}", e))?;

    Ok(())
}

/// Initialize logging system
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if log_format == "json" {
        // JSON format logs (production environment)
        Box::new(
            tracing_subscriber::fmt()
                .with_env_filter(log_level)
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .finish(),
        )
    } else {
        // Human readable format (development environment)
        Box::new(
            tracing_subscriber::fmt()
                .with_env_filter(log_level)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .finish(),
        )
    };

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Logging system initialized");
    Ok(())
}
