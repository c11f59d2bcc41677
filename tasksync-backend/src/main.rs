//! `tasksync-backend` -- in-memory REST backend for local development.
//!
//! Serves the auth and task endpoints the `tasksync` client talks to.
//! All state lives in memory and is lost on exit.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 127.0.0.1:54321
//! cargo run --bin tasksync-backend
//!
//! # Run on custom address with a custom key
//! cargo run --bin tasksync-backend -- --bind 127.0.0.1:8080 --api-key secret
//! ```

use std::sync::Arc;

use clap::Parser;
use tasksync_backend::config::{BackendCliArgs, BackendConfig};
use tasksync_backend::server::{self, BackendState};

#[tokio::main]
async fn main() {
    let cli = BackendCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match BackendConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting tasksync backend");

    let state = Arc::new(BackendState::new(config.api_key));

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "backend listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "backend server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start backend");
            std::process::exit(1);
        }
    }
}
