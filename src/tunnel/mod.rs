//! Seam to the reverse-tunnel runtime.
//!
//! # Responsibilities
//! - Describe what the listeners need from a tunnel runtime: an HTTP
//!   handler for master requests and gRPC routes for agents
//! - Carry the runtime's construction options
//! - Provide a detached stand-in when no runtime is linked
//!
//! # Design Decisions
//! - Stream multiplexing and agent selection live behind the trait; this
//!   crate only wires transports to it
//! - The runtime is shared behind `Arc<dyn TunnelRuntime>` by both listeners

pub mod agent;
pub mod server;

use axum::http::StatusCode;
use axum::Router;
use uuid::Uuid;

use crate::config::ServerConfig;

pub use agent::{AgentRuntime, DetachedAgent};
pub use server::{MasterTransport, TunnelListeners, TunnelServer};

/// How agents authenticate to the agent-facing listener.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentTokenAuth {
    /// Verify agents' service-account tokens in addition to mTLS.
    pub enabled: bool,
    pub agent_namespace: Option<String>,
    pub agent_service_account: Option<String>,
}

/// Options a tunnel runtime is constructed from.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Unique per process start.
    pub server_id: Uuid,
    /// Agent selection strategies, passed through unchanged.
    pub strategies: Vec<String>,
    /// Number of server replicas agents should connect to.
    pub server_count: usize,
    pub auth: AgentTokenAuth,
}

impl RuntimeOptions {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            server_id: Uuid::new_v4(),
            strategies: config.proxy_strategies(),
            server_count: config.server_count,
            auth: AgentTokenAuth::default(),
        }
    }
}

/// The reverse-tunnel runtime both server listeners hand requests to.
pub trait TunnelRuntime: Send + Sync {
    /// Handler for requests arriving on the master-facing listener.
    fn master_router(&self) -> Router;

    /// gRPC services for the agent-facing listener.
    fn agent_routes(&self) -> tonic::service::Routes;
}

/// Stand-in used when no tunnel runtime is linked.
///
/// Master requests get `503 Service Unavailable`; the agent listener
/// registers no services, so every RPC fails.
#[derive(Debug, Clone)]
pub struct DetachedRuntime {
    options: RuntimeOptions,
}

impl DetachedRuntime {
    pub fn new(options: RuntimeOptions) -> Self {
        tracing::info!(
            server_id = %options.server_id,
            strategies = ?options.strategies,
            server_count = options.server_count,
            "Tunnel runtime detached"
        );
        Self { options }
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }
}

impl TunnelRuntime for DetachedRuntime {
    fn master_router(&self) -> Router {
        Router::new().fallback(|| async {
            (StatusCode::SERVICE_UNAVAILABLE, "tunnel runtime not attached")
        })
    }

    fn agent_routes(&self) -> tonic::service::Routes {
        tonic::service::Routes::default()
    }
}
