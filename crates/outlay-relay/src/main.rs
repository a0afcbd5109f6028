//! Outlay relay - forwards signed transactions to the cluster.
//!
//! The browser posts signed transactions here; the relay submits them over
//! JSON-RPC, retries with exponential backoff and answers with the confirmed
//! signature.

mod server;

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use outlay_core::{Config, RetryPolicy, RpcConnection};

use server::RelayState;

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=outlay_core=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let config = Config::load().context("Failed to load configuration")?;
    let connection = RpcConnection::new(&config.rpc_url, &config.commitment)
        .context("Failed to create RPC client")?;
    let state = RelayState::new(Arc::new(connection), RetryPolicy::default());

    let listener = tokio::net::TcpListener::bind(&config.relay_bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.relay_bind))?;
    info!(
        bind = %config.relay_bind,
        rpc_url = %config.rpc_url,
        path = server::RELAY_PATH,
        "Relay listening"
    );

    axum::serve(listener, server::router(state))
        .await
        .context("Relay server failed")?;
    Ok(())
}
