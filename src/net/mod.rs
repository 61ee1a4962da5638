//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Certificate source (CertManager)
//!     → tls.rs (per-role rustls configs, live resolver)
//!
//! Incoming connection
//!     → listener.rs (TCP bind, TLS accept loop, serve supervision)
//!     → local_socket.rs (master endpoint on a filesystem socket)
//!     → Hand off to HTTP / RPC servers
//! ```
//!
//! # Design Decisions
//! - Binding happens before serving so bind errors are synchronous
//! - TLS material is resolved per handshake, never snapshotted

pub mod listener;
pub mod local_socket;
pub mod tls;

pub use listener::ListenerError;
pub use local_socket::LocalSocketFactory;
pub use tls::{CertificateSource, ListenerRole, RootPool, SharedCertificate, TlsError};
