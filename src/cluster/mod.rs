//! Cluster access subsystem.
//!
//! # Data Flow
//! ```text
//! kubeconfig | apiserver address + token | in-cluster environment
//!     → client.rs (kube Client + CA data for the root pool)
//!     → discovery.rs (tunnel-server Service lookup)
//!     → Return: certificate SANs (cloud) or server address (edge)
//! ```

pub mod client;
pub mod discovery;

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub use client::ClusterAccess;
pub use discovery::ServiceDiscovery;

/// Errors reaching the cluster or reading the tunnel-server Service.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to load kubeconfig: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("failed to infer cluster configuration: {0}")]
    Infer(#[from] kube::config::InferConfigError),

    #[error("invalid apiserver address {address:?}: {message}")]
    Address { address: String, message: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cluster request failed: {0}")]
    Kube(#[from] kube::Error),

    #[error("service {namespace}/{name} has no usable {what}")]
    Incomplete {
        namespace: &'static str,
        name: &'static str,
        what: &'static str,
    },
}
