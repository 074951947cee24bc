//! # operas-server
//!
//! HTTP server for the operas museum beacon simulator.
//!
//! This binary provides:
//! - REST API for starting and stopping artifact beacons
//! - OpenAPI documentation via Swagger UI
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development, without Bluetooth hardware
//! OPERAS__RADIO__BACKEND=mock cargo run --package operas-server
//!
//! # Production
//! OPERAS_CONFIG=/etc/operas/config.toml ./operas-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use operas_core::Config;
use operas_server::api;
use operas_server::logging::{self, LogSettings};
use operas_server::state::AppState;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = Config::default_path()?;
    let config = Config::load_layered(&config_path)
        .with_context(|| format!("Invalid configuration at {}", config_path.display()))?;

    logging::init(&LogSettings::from_env(config.server.production))?;
    info!(
        config = %config_path.display(),
        backend = ?config.radio.backend,
        "Starting operas-server"
    );

    let addr: SocketAddr = config.server.bind_address.parse()?;
    let state = Arc::new(AppState::new(config).await?);
    let app = api::create_app(state.clone());

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let report = state.registry.shutdown().await;
    for (id, err) in &report.failures {
        warn!(artifact_id = %id, error = %err, "Beacon left running at shutdown");
    }
    info!(stopped = report.stopped.len(), "Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
