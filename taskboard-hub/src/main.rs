//! Task board sync hub.
//!
//! An axum server that holds the authoritative task list, fans out every
//! change to all connected clients over WebSocket, and accepts attachment
//! uploads over HTTP.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:3001
//! cargo run --bin taskboard-hub
//!
//! # Custom address and upload directory
//! cargo run --bin taskboard-hub -- --bind 127.0.0.1:8080 --upload-dir /tmp/uploads
//!
//! # Or via environment variable
//! TASKBOARD_HUB_ADDR=127.0.0.1:8080 cargo run --bin taskboard-hub
//! ```

use std::sync::Arc;

use clap::Parser;
use taskboard_hub::config::{HubCliArgs, HubConfig};
use taskboard_hub::hub::{self, HubState};
use taskboard_hub::store::InMemoryTaskStore;
use taskboard_hub::upload::UploadDir;

#[tokio::main]
async fn main() {
    let cli = HubCliArgs::parse();

    let config = match HubConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(
        addr = %config.bind_addr,
        upload_dir = %config.upload_dir.display(),
        "starting taskboard hub"
    );

    let state = Arc::new(HubState::with_config(
        Arc::new(InMemoryTaskStore::new()),
        UploadDir::new(config.upload_dir),
        config.max_upload_size,
    ));

    match hub::start_server_with_state(&config.bind_addr, Arc::clone(&state)).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "hub listening");
            tokio::select! {
                result = handle => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "hub server task failed");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutting down, closing client connections");
                    state.close_all_connections().await;
                }
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start hub");
            std::process::exit(1);
        }
    }
}
