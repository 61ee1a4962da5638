//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TLS connection (reverse-proxy listener)
//!     → server.rs (Axum setup, request ID, tracing)
//!     → [routing layer picks health, norm or apiserver]
//!     → request.rs (strip hop-by-hop headers, add X-Forwarded-*)
//!     → proxy.rs (forward, stream the response back)
//!     → upgrade.rs (bridge upgraded connections)
//!     → response.rs (clean upstream headers)
//!     → Send to client
//! ```

pub mod proxy;
pub mod request;
pub mod response;
pub mod server;
pub mod upgrade;

pub use proxy::{Forwarder, ProxyError};
pub use request::X_REQUEST_ID;
pub use server::{proxy_app, ProxyService, ReverseProxyServer};
