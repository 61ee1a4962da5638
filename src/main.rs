//! Tunnel server (cloud side)
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────────┐
//!                 │                     TUNNEL SERVER                         │
//!                 │                                                           │
//!                 │  ┌───────────┐   ┌──────────────┐   ┌──────────────────┐ │
//!                 │  │  cluster  │──▶│     pki      │──▶│ wait until signed│ │
//!                 │  │ discovery │   │ cert manager │   └────────┬─────────┘ │
//!                 │  └───────────┘   └──────┬───────┘            │           │
//!                 │                         │ CSR approver       ▼           │
//!                 │                         ▼            ┌──────────────┐    │
//!   apiserver ────┼──────────────────────────────────────▶│ master (mTLS │    │
//!                 │                                       │ or socket)   │    │
//!   agents ───────┼──────────────────────────────────────▶│ agent gRPC   │    │
//!                 │                                       │ reverse proxy│────┼──▶ norm / apiserver
//!                 │                                       └──────────────┘    │
//!                 └──────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::sync::Arc;

use edge_tunnel::config::cli::ServerArgs;
use edge_tunnel::lifecycle::signals::wait_for_signal;
use edge_tunnel::lifecycle::{ServerBootstrap, Shutdown};
use edge_tunnel::net::tls::install_crypto_provider;
use edge_tunnel::observability::{logging, metrics};
use edge_tunnel::tunnel::{DetachedRuntime, RuntimeOptions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerArgs::parse().into_config()?;
    logging::init(&config.observability)?;
    install_crypto_provider();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.bind_address,
        server_count = config.server_count,
        proxy_strategy = %config.proxy_strategy,
        "tunnel-server starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let runtime = Arc::new(DetachedRuntime::new(RuntimeOptions::from_config(&config)));
    let bootstrap = ServerBootstrap::new(config, runtime);
    if let Err(e) = bootstrap.run(&shutdown).await {
        tracing::error!(error = %e, "tunnel-server failed to start");
        return Err(e.into());
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
