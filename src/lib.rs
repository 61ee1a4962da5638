//! Cloud-edge reverse tunnel: certificate-gated bootstrap and listeners.

// Identity and configuration
pub mod config;
pub mod hook;
pub mod identifiers;

// Certificate bootstrap
pub mod cluster;
pub mod pki;

// Listeners and traffic
pub mod http;
pub mod net;
pub mod routing;
pub mod tunnel;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::{AgentConfig, ServerConfig};
pub use lifecycle::{AgentBootstrap, ServerBootstrap, Shutdown};
