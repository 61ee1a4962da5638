//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Certificate bootstrap → Wait until signed → Bind → Serve
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then identity, then listeners
//! - Ordered shutdown: stop accept, drain, close
//! - Shutdown has timeout: listeners get a bounded grace period

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{
    AgentBootstrap, ListenerOrchestrator, ListenerPlan, Phase, RunningListeners, ServerBootstrap, ServerTls,
    StartupError, REVERSE_PROXY_LISTENER,
};
