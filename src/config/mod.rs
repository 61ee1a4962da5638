//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → cli.rs (flag overrides)
//!     → validation.rs (semantic checks)
//!     → ServerConfig / AgentConfig (validated, immutable)
//!     → passed by reference to bootstrap
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod cli;
pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::ConfigError;
pub use schema::{AgentConfig, ObservabilityConfig, PkiConfig, ServerConfig, UpstreamConfig};
