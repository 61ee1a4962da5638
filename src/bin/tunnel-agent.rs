//! Tunnel agent (edge side)
//!
//! Bootstraps the edge identity, waits for it to be signed, then hands the
//! connection to the tunnel server over to the agent runtime.

use clap::Parser;
use std::sync::Arc;

use edge_tunnel::config::cli::AgentArgs;
use edge_tunnel::lifecycle::signals::wait_for_signal;
use edge_tunnel::lifecycle::{AgentBootstrap, Shutdown};
use edge_tunnel::net::tls::install_crypto_provider;
use edge_tunnel::observability::logging;
use edge_tunnel::tunnel::DetachedAgent;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AgentArgs::parse().into_config()?;
    logging::init(&config.observability)?;
    install_crypto_provider();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        cluster_name = %config.cluster_name,
        identifiers = %config.agent_identifiers,
        "tunnel-agent starting"
    );

    let shutdown = Shutdown::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let bootstrap = AgentBootstrap::new(config, Arc::new(DetachedAgent));
    if let Err(e) = bootstrap.run(&shutdown).await {
        tracing::error!(error = %e, "tunnel-agent failed to start");
        return Err(e.into());
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
