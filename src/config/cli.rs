//! Command-line surfaces for both binaries.
//!
//! Flags override values read from `--config`; validation runs after the
//! overrides are applied so a flag can supply a value the file lacks.

use clap::Parser;
use std::path::PathBuf;

use crate::config::loader::{parse_file, ConfigError};
use crate::config::schema::{AgentConfig, LogFormat, ServerConfig};
use crate::config::validation::{validate_agent_config, validate_server_config};
use crate::hook::HookProviderKind;

/// Cloud-side tunnel server.
#[derive(Debug, Parser)]
#[command(name = "tunnel-server", version, about = "Cloud-side reverse tunnel server")]
pub struct ServerArgs {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to a kubeconfig (in-cluster config when omitted)
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// IP address the listeners bind to
    #[arg(long)]
    pub bind_address: Option<String>,

    /// Serve the master-facing endpoint on a local socket at this path
    #[arg(long)]
    pub local_socket: Option<PathBuf>,

    /// Extra DNS names for the server certificate
    #[arg(long, value_delimiter = ',')]
    pub cert_dns_names: Vec<String>,

    /// Extra IP addresses for the server certificate
    #[arg(long, value_delimiter = ',')]
    pub cert_ips: Vec<String>,

    /// Number of tunnel server replicas
    #[arg(long)]
    pub server_count: Option<usize>,

    /// Proxy strategy handed to the tunnel runtime
    #[arg(long)]
    pub proxy_strategy: Option<String>,

    /// Certificate store directory
    #[arg(long)]
    pub cert_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,
}

impl ServerArgs {
    /// Merge file configuration with flag overrides and validate the result.
    pub fn into_config(self) -> Result<ServerConfig, ConfigError> {
        let mut config: ServerConfig = match &self.config {
            Some(path) => parse_file(path)?,
            None => ServerConfig::default(),
        };

        if let Some(path) = self.kubeconfig {
            config.kube_config = Some(path);
        }
        if let Some(addr) = self.bind_address {
            config.bind_address = addr;
        }
        if let Some(path) = self.local_socket {
            config.local_socket_path = Some(path);
        }
        if !self.cert_dns_names.is_empty() {
            config.cert_dns_names = self.cert_dns_names;
        }
        if !self.cert_ips.is_empty() {
            config.cert_ips = self.cert_ips;
        }
        if let Some(count) = self.server_count {
            config.server_count = count;
        }
        if let Some(strategy) = self.proxy_strategy {
            config.proxy_strategy = strategy;
        }
        if let Some(dir) = self.cert_dir {
            config.pki.cert_dir = dir;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
        if self.log_json {
            config.observability.log_format = LogFormat::Json;
        }

        validate_server_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

/// Edge-side tunnel agent.
#[derive(Debug, Parser)]
#[command(name = "tunnel-agent", version, about = "Edge-side reverse tunnel agent")]
pub struct AgentArgs {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Name of the edge cluster
    #[arg(long)]
    pub cluster_name: Option<String>,

    /// Routing identifiers, e.g. host=east,cidr=10.0.0.0/8
    #[arg(long)]
    pub agent_identifiers: Option<String>,

    /// Tunnel server address (discovered from the cluster when omitted)
    #[arg(long)]
    pub tunnel_server_addr: Option<String>,

    /// API server address used when no kubeconfig is given
    #[arg(long)]
    pub apiserver_addr: Option<String>,

    /// Path to a kubeconfig
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Vendor hook run around agent start
    #[arg(long, value_enum)]
    pub hook_provider: Option<HookProviderKind>,

    /// Certificate store directory
    #[arg(long)]
    pub cert_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,
}

impl AgentArgs {
    /// Merge file configuration with flag overrides, validate, then complete.
    pub fn into_config(self) -> Result<AgentConfig, ConfigError> {
        let mut config: AgentConfig = match &self.config {
            Some(path) => parse_file(path)?,
            None => AgentConfig::default(),
        };

        if let Some(name) = self.cluster_name {
            config.cluster_name = name;
        }
        if let Some(ids) = self.agent_identifiers {
            config.agent_identifiers = ids;
        }
        if let Some(addr) = self.tunnel_server_addr {
            config.tunnel_server_address = Some(addr);
        }
        if let Some(addr) = self.apiserver_addr {
            config.apiserver_address = Some(addr);
        }
        if let Some(path) = self.kubeconfig {
            config.kube_config = Some(path);
        }
        if let Some(hook) = self.hook_provider {
            config.hook_provider = hook;
        }
        if let Some(dir) = self.cert_dir {
            config.pki.cert_dir = dir;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
        if self.log_json {
            config.observability.log_format = LogFormat::Json;
        }

        validate_agent_config(&config).map_err(ConfigError::Validation)?;
        config.complete();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_flags_override_defaults() {
        let args = ServerArgs::parse_from([
            "tunnel-server",
            "--bind-address",
            "127.0.0.1",
            "--cert-ips",
            "10.0.0.1,10.0.0.2",
            "--server-count",
            "3",
        ]);
        let config = args.into_config().unwrap();
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.cert_ips, vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(config.server_count, 3);
        assert_eq!(config.proxy_strategy, "destHost");
    }

    #[test]
    fn server_rejects_bad_cert_ip_flag() {
        let args = ServerArgs::parse_from(["tunnel-server", "--cert-ips", "nope"]);
        assert!(matches!(args.into_config(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn agent_completes_default_identifiers() {
        let args = AgentArgs::parse_from(["tunnel-agent", "--cluster-name", "edge-7"]);
        let config = args.into_config().unwrap();
        assert_eq!(config.agent_identifiers, "host=edge-7");
    }

    #[test]
    fn agent_without_cluster_name_is_rejected() {
        let args = AgentArgs::parse_from(["tunnel-agent"]);
        assert!(args.into_config().is_err());
    }

    #[test]
    fn agent_hook_provider_flag() {
        let args = AgentArgs::parse_from([
            "tunnel-agent",
            "--cluster-name",
            "edge-7",
            "--hook-provider",
            "tkestack",
        ]);
        assert_eq!(args.into_config().unwrap().hook_provider, HookProviderKind::TkeStack);
    }
}
