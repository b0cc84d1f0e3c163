//! Parley reference server -- WebSocket event routing plus the JSON API.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:8800
//! cargo run --bin parley-server
//!
//! # Run on custom address
//! cargo run --bin parley-server -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! PARLEY_SERVER_ADDR=127.0.0.1:8080 cargo run --bin parley-server
//! ```

use std::sync::Arc;

use clap::Parser;
use parley_server::config::{ServerCliArgs, ServerConfig};
use parley_server::server::{self, ServerState};

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match ServerConfig::load(&cli) {
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

    tracing::info!(addr = %config.bind_addr, "starting parley server");

    let state = Arc::new(ServerState::with_config(config.default_page_limit));

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    }
}
