//! Edge-side seam to the tunnel runtime.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::identifiers::AgentIdentifiers;

/// Everything an agent runtime needs to attach to the tunnel server.
#[derive(Clone)]
pub struct AgentSession {
    pub server_address: String,
    pub identifiers: AgentIdentifiers,
    pub tls: Arc<rustls::ClientConfig>,
}

/// The agent half of the reverse-tunnel runtime.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Stay attached to the server until `stop` fires.
    async fn run(&self, session: AgentSession, stop: CancellationToken);
}

/// Stand-in used when no agent runtime is linked: logs and idles.
#[derive(Debug, Clone, Default)]
pub struct DetachedAgent;

#[async_trait]
impl AgentRuntime for DetachedAgent {
    async fn run(&self, session: AgentSession, stop: CancellationToken) {
        tracing::info!(
            server = %session.server_address,
            identifiers = %session.identifiers,
            "Agent runtime detached, idling until shutdown"
        );
        stop.cancelled().await;
    }
}
