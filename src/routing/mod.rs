//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path)
//!     → router.rs (route lookup)
//!     → matcher.rs (evaluate match conditions)
//!     → Return: Health | Norm | ApiServer
//! ```
//!
//! # Design Decisions
//! - Route table fixed at startup, immutable at runtime
//! - No regex in hot path (prefix and exact matching only)
//! - Deterministic: same input always matches same route

pub mod matcher;
pub mod router;

pub use router::{RouteTarget, RoutingError, UpstreamRouter};
