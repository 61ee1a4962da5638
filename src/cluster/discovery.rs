//! Tunnel-server Service lookup.
//!
//! # Responsibilities
//! - Derive the cloud certificate's SANs from the tunnel-server Service
//! - Resolve the address edge agents dial when none is configured
//! - Retry lookups on a fixed interval until success or shutdown
//!
//! # Design Decisions
//! - Pure functions over a fetched `Service` so the derivation is testable
//!   without a cluster
//! - The external-address annotation wins over the cluster IP for agents

use k8s_openapi::api::core::v1::Service;
use kube::{Api, Client};
use std::net::IpAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::DiscoveryError;
use crate::pki::SubjectAltNames;
use crate::resilience::poll::retry_until;

pub const SERVICE_NAMESPACE: &str = "kube-system";
pub const SERVICE_NAME: &str = "x-tunnel-server-svc";
/// Port name of the agent-facing listener on the Service.
pub const AGENT_PORT_NAME: &str = "tcp";
/// Annotation holding an externally reachable `host[:port]`.
pub const EXTERNAL_ADDR_ANNOTATION: &str = "x-tunnel-server-external-addr";
pub const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Reads the tunnel-server Service.
#[derive(Clone)]
pub struct ServiceDiscovery {
    api: Api<Service>,
}

impl ServiceDiscovery {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::namespaced(client, SERVICE_NAMESPACE),
        }
    }

    pub async fn service(&self) -> Result<Service, DiscoveryError> {
        Ok(self.api.get(SERVICE_NAME).await?)
    }

    pub async fn subject_alt_names(&self) -> Result<SubjectAltNames, DiscoveryError> {
        service_sans(&self.service().await?)
    }

    pub async fn tunnel_server_address(&self) -> Result<String, DiscoveryError> {
        server_address(&self.service().await?)
    }

    /// Keep looking up the SANs every [`RETRY_INTERVAL`]; `None` on cancel.
    pub async fn subject_alt_names_until(&self, cancel: &CancellationToken) -> Option<SubjectAltNames> {
        retry_until(RETRY_INTERVAL, cancel, "tunnel-server SAN discovery", || {
            let discovery = self.clone();
            async move { discovery.subject_alt_names().await }
        })
        .await
    }

    /// Keep resolving the server address every [`RETRY_INTERVAL`]; `None` on cancel.
    pub async fn tunnel_server_address_until(&self, cancel: &CancellationToken) -> Option<String> {
        retry_until(RETRY_INTERVAL, cancel, "tunnel-server address discovery", || {
            let discovery = self.clone();
            async move { discovery.tunnel_server_address().await }
        })
        .await
    }
}

fn external_address(service: &Service) -> Option<&str> {
    service
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(EXTERNAL_ADDR_ANNOTATION))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

/// Strip an optional `:port` (and IPv6 brackets) from `host[:port]`.
fn host_part(address: &str) -> &str {
    if let Some(rest) = address.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    if address.parse::<IpAddr>().is_ok() {
        return address;
    }
    address.rsplit_once(':').map_or(address, |(host, _)| host)
}

fn cluster_ip(service: &Service) -> Option<IpAddr> {
    service
        .spec
        .as_ref()
        .and_then(|s| s.cluster_ip.as_deref())
        .and_then(|ip| ip.parse().ok())
}

/// SANs for the cloud certificate: the four in-cluster DNS forms, the
/// cluster IP and the external address.
pub fn service_sans(service: &Service) -> Result<SubjectAltNames, DiscoveryError> {
    let mut sans = SubjectAltNames {
        dns_names: vec![
            SERVICE_NAME.to_string(),
            format!("{}.{}", SERVICE_NAME, SERVICE_NAMESPACE),
            format!("{}.{}.svc", SERVICE_NAME, SERVICE_NAMESPACE),
            format!("{}.{}.svc.cluster.local", SERVICE_NAME, SERVICE_NAMESPACE),
        ],
        ip_addresses: Vec::new(),
    };

    match cluster_ip(service) {
        Some(ip) => sans.ip_addresses.push(ip),
        None => {
            return Err(DiscoveryError::Incomplete {
                namespace: SERVICE_NAMESPACE,
                name: SERVICE_NAME,
                what: "cluster IP",
            })
        }
    }

    if let Some(external) = external_address(service) {
        let host = host_part(external);
        match host.parse::<IpAddr>() {
            Ok(ip) => sans.ip_addresses.push(ip),
            Err(_) => sans.dns_names.push(host.to_string()),
        }
    }
    Ok(sans)
}

/// Address edge agents dial: the external address, or
/// `<clusterIP>:<port named tcp>`.
pub fn server_address(service: &Service) -> Result<String, DiscoveryError> {
    if let Some(external) = external_address(service) {
        return Ok(external.to_string());
    }

    let incomplete = |what| DiscoveryError::Incomplete {
        namespace: SERVICE_NAMESPACE,
        name: SERVICE_NAME,
        what,
    };
    let ip = cluster_ip(service).ok_or_else(|| incomplete("cluster IP"))?;
    let port = service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .and_then(|ports| ports.iter().find(|p| p.name.as_deref() == Some(AGENT_PORT_NAME)))
        .map(|p| p.port)
        .ok_or_else(|| incomplete("port named tcp"))?;

    Ok(match ip {
        IpAddr::V6(v6) => format!("[{}]:{}", v6, port),
        IpAddr::V4(v4) => format!("{}:{}", v4, port),
    })
}
