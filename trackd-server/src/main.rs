//! trackd-server - experiment tracking backend
//!
//! Event ingestion, task lifecycle, and metric aggregation service.

use anyhow::Result;
use std::path::Path;
use tracing::info;
use trackd_common::config::TrackdConfig;
use trackd_common::db::init_database;
use trackd_server::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting trackd-server v{}", env!("CARGO_PKG_VERSION"));

    let config = TrackdConfig::load()?;
    info!("Database path: {}", config.database_path);

    let pool = init_database(Path::new(&config.database_path)).await?;
    info!("✓ Database initialized");

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config, pool).await?;
    state.start_watchdog();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("trackd-server listening on http://{bind_addr}");
    info!("Health check: http://{bind_addr}/health");

    axum::serve(listener, app).await?;

    Ok(())
}
