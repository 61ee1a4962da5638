//! Kubernetes client construction.
//!
//! Three sources, tried in the order the caller picks: an explicit
//! kubeconfig, an explicit apiserver address authenticated with the
//! mounted service-account token, or whatever the environment provides.

use axum::http::Uri;
use kube::config::{Config, KubeConfigOptions, Kubeconfig};
use kube::Client;
use rustls::pki_types::CertificateDer;
use std::path::Path;

use super::DiscoveryError;
use crate::net::tls::{RootPool, TlsError};

/// A connected client plus the CA data it was configured with.
#[derive(Clone)]
pub struct ClusterAccess {
    client: Client,
    ca_der: Option<Vec<Vec<u8>>>,
}

impl ClusterAccess {
    /// Client from a kubeconfig file; its CA data seeds the root pool.
    pub async fn from_kubeconfig(path: &Path) -> Result<Self, DiscoveryError> {
        let kubeconfig = Kubeconfig::read_from(path)?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
        tracing::info!(path = %path.display(), "Created cluster client from kubeconfig");
        let ca_der = config.root_cert.clone();
        Ok(Self {
            client: Client::try_from(config)?,
            ca_der,
        })
    }

    /// Client for an explicit apiserver address.
    pub fn from_apiserver(address: &str, ca_file: &Path, token_file: &Path) -> Result<Self, DiscoveryError> {
        let raw = if address.contains("://") {
            address.to_string()
        } else {
            format!("https://{}", address)
        };
        let uri: Uri = raw.parse().map_err(|e: axum::http::uri::InvalidUri| DiscoveryError::Address {
            address: address.to_string(),
            message: e.to_string(),
        })?;

        let pem = std::fs::read(ca_file).map_err(|source| DiscoveryError::Io {
            path: ca_file.to_path_buf(),
            source,
        })?;
        let ca_der = rustls_pemfile::certs(&mut &pem[..])
            .map(|cert| cert.map(|der| der.to_vec()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| DiscoveryError::Io {
                path: ca_file.to_path_buf(),
                source,
            })?;

        let mut config = Config::new(uri);
        config.root_cert = Some(ca_der);
        config.auth_info.token_file = Some(token_file.display().to_string());

        tracing::info!(address, "Created cluster client from apiserver address");
        Ok(Self {
            client: Client::try_from(config)?,
            ca_der: None,
        })
    }

    /// Client from the environment: `KUBECONFIG`, then in-cluster config.
    pub async fn infer() -> Result<Self, DiscoveryError> {
        let config = Config::infer().await?;
        tracing::info!(cluster_url = %config.cluster_url, "Created cluster client from environment");
        Ok(Self {
            client: Client::try_from(config)?,
            ca_der: None,
        })
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Trust anchors for peer verification: the kubeconfig's CA data when
    /// the client came from one, otherwise `ca_file`.
    pub fn root_pool(&self, ca_file: &Path) -> Result<RootPool, TlsError> {
        match &self.ca_der {
            Some(certs) if !certs.is_empty() => {
                RootPool::from_der(certs.iter().map(|der| CertificateDer::from(der.clone())))
            }
            _ => RootPool::from_pem_file(ca_file),
        }
    }
}
