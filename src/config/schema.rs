//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for both tunnel
//! components. All types derive Serde traits for deserialization from config
//! files, and every field has a default so an empty file is a valid config.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::hook::HookProviderKind;
use crate::identifiers::AgentIdentifiers;

/// Name the cloud component uses for its certificate store and CSR.
pub const SERVER_COMPONENT: &str = "tunnel-server";

/// Name the edge component uses for its certificate store and CSR.
pub const AGENT_COMPONENT: &str = "tunnel-agent";

/// Default port accepting reverse-proxy requests from agents.
pub const DEFAULT_REVERSE_PROXY_PORT: u16 = 10261;

/// Default port accepting gRPC tunnels from agents.
pub const DEFAULT_AGENT_PORT: u16 = 10262;

/// Default port accepting requests from the master (API server).
pub const DEFAULT_MASTER_PORT: u16 = 10263;

/// Root configuration for the cloud-side tunnel server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Path to a kubeconfig; in-cluster discovery is used when unset.
    pub kube_config: Option<PathBuf>,

    /// IP address all TCP listeners bind to.
    pub bind_address: String,

    /// Serve the master-facing endpoint on this local socket instead of TCP.
    pub local_socket_path: Option<PathBuf>,

    /// Extra DNS names added to the server certificate.
    pub cert_dns_names: Vec<String>,

    /// Extra IP addresses added to the server certificate.
    pub cert_ips: Vec<String>,

    /// Number of tunnel server replicas (1 unless running HA).
    pub server_count: usize,

    /// Proxy strategy names handed to the tunnel runtime (comma-separated).
    pub proxy_strategy: String,

    /// Listener ports.
    pub ports: PortConfig,

    /// Certificate bootstrap settings.
    #[serde(default = "PkiConfig::server_defaults")]
    pub pki: PkiConfig,

    /// Reverse proxy upstream targets.
    pub upstreams: UpstreamConfig,

    /// CSR auto-approval settings.
    pub approver: ApproverConfig,

    /// Seconds to let in-flight connections finish after a stop signal.
    pub shutdown_grace_secs: u64,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            kube_config: None,
            bind_address: "0.0.0.0".to_string(),
            local_socket_path: None,
            cert_dns_names: Vec::new(),
            cert_ips: Vec::new(),
            server_count: 1,
            proxy_strategy: "destHost".to_string(),
            ports: PortConfig::default(),
            pki: PkiConfig::server_defaults(),
            upstreams: UpstreamConfig::default(),
            approver: ApproverConfig::default(),
            shutdown_grace_secs: 10,
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Address of the master-facing TCP listener.
    pub fn master_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.ports.master)
    }

    /// Address of the agent-facing gRPC listener.
    pub fn agent_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.ports.agent)
    }

    /// Address of the reverse-proxy listener.
    pub fn reverse_proxy_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.ports.reverse_proxy)
    }

    /// Proxy strategies as an ordered list.
    pub fn proxy_strategies(&self) -> Vec<String> {
        self.proxy_strategy
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Root configuration for the edge-side tunnel agent.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Name of the edge cluster; becomes the certificate common name.
    pub cluster_name: String,

    /// Explicit tunnel server address; discovered from the cluster when unset.
    pub tunnel_server_address: Option<String>,

    /// Reachable API server address, used when no kubeconfig is given.
    pub apiserver_address: Option<String>,

    /// Path to a kubeconfig.
    pub kube_config: Option<PathBuf>,

    /// Routing identifiers (`kind=value,...`); defaults to `host=<cluster>`.
    pub agent_identifiers: String,

    /// Vendor hook run around agent start.
    pub hook_provider: HookProviderKind,

    /// Certificate bootstrap settings.
    #[serde(default = "PkiConfig::agent_defaults")]
    pub pki: PkiConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            cluster_name: String::new(),
            tunnel_server_address: None,
            apiserver_address: None,
            kube_config: None,
            agent_identifiers: String::new(),
            hook_provider: HookProviderKind::None,
            pki: PkiConfig::agent_defaults(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Fill in values derived from other settings.
    ///
    /// An empty identifier list becomes `host=<cluster>`, and the kubelet
    /// kubeconfig is used when neither a kubeconfig nor an API server
    /// address is configured.
    pub fn complete(&mut self) {
        if self.agent_identifiers.is_empty() {
            self.agent_identifiers =
                AgentIdentifiers::default_for_cluster(&self.cluster_name).to_string();
        }
        if self.kube_config.is_none() && self.apiserver_address.is_none() {
            self.kube_config = Some(PathBuf::from(DEFAULT_AGENT_KUBECONFIG));
        }
    }
}

/// Kubeconfig used by the agent when neither a kubeconfig nor an API server
/// address is configured.
pub const DEFAULT_AGENT_KUBECONFIG: &str = "/etc/kubernetes/kubelet.conf";

/// Service-account token the agent presents when given only an API server
/// address.
pub const AGENT_TOKEN_FILE: &str = "/var/lib/tunnel-agent/serviceaccount/token";

/// Listener port configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PortConfig {
    pub master: u16,
    pub agent: u16,
    pub reverse_proxy: u16,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            master: DEFAULT_MASTER_PORT,
            agent: DEFAULT_AGENT_PORT,
            reverse_proxy: DEFAULT_REVERSE_PROXY_PORT,
        }
    }
}

/// Certificate bootstrap configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PkiConfig {
    /// Directory holding the component's certificate store.
    pub cert_dir: PathBuf,

    /// CA bundle used as the trust anchor when no kubeconfig is given.
    pub ca_file: PathBuf,

    /// Signer name put on submitted certificate signing requests.
    #[serde(default = "default_signer_name")]
    pub signer_name: String,

    /// Seconds between "is the certificate signed yet" checks.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_signer_name() -> String {
    "kubernetes.io/legacy-unknown".to_string()
}

fn default_poll_interval() -> u64 {
    5
}

impl PkiConfig {
    pub fn server_defaults() -> Self {
        Self {
            cert_dir: PathBuf::from(format!("/var/lib/{}/pki", SERVER_COMPONENT)),
            ca_file: PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount/ca.crt"),
            signer_name: default_signer_name(),
            poll_interval_secs: default_poll_interval(),
        }
    }

    pub fn agent_defaults() -> Self {
        Self {
            cert_dir: PathBuf::from(format!("/var/lib/{}/pki", AGENT_COMPONENT)),
            ca_file: PathBuf::from(format!("/var/lib/{}/serviceaccount/ca.crt", AGENT_COMPONENT)),
            signer_name: default_signer_name(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

/// Reverse proxy upstream configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL for `/v1/norm` requests.
    pub norm_url: String,

    /// Base URL for every other request. Derived from
    /// `KUBERNETES_SERVICE_HOST`/`KUBERNETES_SERVICE_PORT` when unset.
    pub api_server_url: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            norm_url: "https://norm".to_string(),
            api_server_url: None,
        }
    }
}

/// CSR auto-approval configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApproverConfig {
    /// Number of approval workers.
    pub threadiness: usize,

    /// Seconds between listings of pending requests.
    pub resync_secs: u64,
}

impl Default for ApproverConfig {
    fn default() -> Self {
        Self {
            threadiness: 2,
            resync_secs: 10,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.ports.master, 10263);
        assert_eq!(config.ports.agent, 10262);
        assert_eq!(config.ports.reverse_proxy, 10261);
        assert_eq!(config.pki.cert_dir, PathBuf::from("/var/lib/tunnel-server/pki"));
        assert_eq!(config.approver.threadiness, 2);

        let agent: AgentConfig = toml::from_str("").unwrap();
        assert_eq!(agent.pki.cert_dir, PathBuf::from("/var/lib/tunnel-agent/pki"));
        assert_eq!(agent.hook_provider, HookProviderKind::None);
    }

    #[test]
    fn partial_pki_section_keeps_field_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            [pki]
            cert_dir = "/tmp/pki"
            ca_file = "/tmp/ca.crt"
            "#,
        )
        .unwrap();
        assert_eq!(config.pki.poll_interval_secs, 5);
        assert_eq!(config.pki.signer_name, "kubernetes.io/legacy-unknown");
    }

    #[test]
    fn agent_completion_fills_derived_values() {
        let mut agent = AgentConfig {
            cluster_name: "edge-1".into(),
            ..Default::default()
        };
        agent.complete();
        assert_eq!(agent.agent_identifiers, "host=edge-1");
        assert_eq!(agent.kube_config, Some(PathBuf::from(DEFAULT_AGENT_KUBECONFIG)));

        let mut explicit = AgentConfig {
            cluster_name: "edge-1".into(),
            agent_identifiers: "uid=7".into(),
            apiserver_address: Some("10.0.0.1:6443".into()),
            ..Default::default()
        };
        explicit.complete();
        assert_eq!(explicit.agent_identifiers, "uid=7");
        assert!(explicit.kube_config.is_none());
    }

    #[test]
    fn listener_addresses_use_bind_address() {
        let config = ServerConfig {
            bind_address: "10.0.0.1".into(),
            ..Default::default()
        };
        assert_eq!(config.master_address(), "10.0.0.1:10263");
        assert_eq!(config.agent_address(), "10.0.0.1:10262");
        assert_eq!(config.reverse_proxy_address(), "10.0.0.1:10261");
    }

    #[test]
    fn proxy_strategies_split_on_commas() {
        let config = ServerConfig {
            proxy_strategy: "destHost, default".into(),
            ..Default::default()
        };
        assert_eq!(config.proxy_strategies(), vec!["destHost", "default"]);
    }
}
