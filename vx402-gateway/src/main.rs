//! vx402 gateway HTTP server.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config (config.toml in current directory)
//! cargo run -p vx402-gateway --release
//!
//! # Run with custom config path
//! CONFIG=/path/to/config.toml cargo run -p vx402-gateway
//!
//! # Configure logging level
//! RUST_LOG=info cargo run -p vx402-gateway
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` — Path to TOML configuration file (default: `config.toml`)
//! - `HOST` — Override bind address (default: `0.0.0.0`)
//! - `PORT` — Override port (default: `4020`)
//! - `RUST_LOG` — Log level filter (default: `info`)

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use vx402_evm::EvmAdapter;
use vx402_gateway::config::GatewayConfig;
use vx402_gateway::handlers::gateway_router;
use vx402_gateway::{AppState, Gateway};
use vx402_svm::SolanaAdapter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("Gateway failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig::load()?;
    let addr = SocketAddr::new(config.host, config.port);
    let rpc_timeout = config.rpc_timeout();

    let mut gateway = Gateway::from_config(config);
    tracing::info!(
        chains = gateway.core.chain_count(),
        "Loaded configuration"
    );
    if gateway.core.chain_count() == 0 {
        tracing::warn!("No chains configured — every verification will be rejected");
    }

    let core = Arc::clone(&gateway.core);
    for (chain, settings) in core.chains() {
        if chain.is_evm() {
            let adapter = EvmAdapter::new(chain, settings, rpc_timeout)
                .map_err(|e| format!("chain {chain}: {e}"))?;
            gateway.register_adapter(Arc::new(adapter));
        } else {
            gateway.register_adapter(Arc::new(SolanaAdapter::new(settings, rpc_timeout)));
        }
        tracing::info!(%chain, confirmations = settings.required_confirmations, "Registered chain");
    }

    let state: AppState = Arc::new(gateway);
    let app = gateway_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Gateway listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Gateway shut down gracefully");
    Ok(())
}

/// Waits for Ctrl-C or SIGTERM (Unix) to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down..."),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl-C");
        tracing::info!("Received Ctrl-C, shutting down...");
    }
}
