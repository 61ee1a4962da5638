//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check required values are present (cluster name, bind address)
//! - Validate value ranges and formats (replica count, certificate IPs)
//! - Reject malformed agent identifier lists before anything starts
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: Config → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::IpAddr;

use crate::config::schema::{AgentConfig, ServerConfig};
use crate::identifiers;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validate tunnel server configuration.
pub fn validate_server_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.bind_address.trim().is_empty() {
        errors.push(ValidationError::new("bind_address", "must not be empty"));
    }
    if config.server_count == 0 {
        errors.push(ValidationError::new("server_count", "must be at least 1"));
    }
    if config.proxy_strategies().is_empty() {
        errors.push(ValidationError::new("proxy_strategy", "must not be empty"));
    }
    for ip in &config.cert_ips {
        if ip.parse::<IpAddr>().is_err() {
            errors.push(ValidationError::new(
                "cert_ips",
                format!("{:?} is not an IP address", ip),
            ));
        }
    }
    if let Some(path) = &config.local_socket_path {
        if path.as_os_str().is_empty() {
            errors.push(ValidationError::new("local_socket_path", "must not be empty when set"));
        }
    }
    if config.approver.threadiness == 0 {
        errors.push(ValidationError::new("approver.threadiness", "must be at least 1"));
    }
    if config.pki.poll_interval_secs == 0 {
        errors.push(ValidationError::new("pki.poll_interval_secs", "must be greater than 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate tunnel agent configuration.
pub fn validate_agent_config(config: &AgentConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.cluster_name.trim().is_empty() {
        errors.push(ValidationError::new("cluster_name", "--cluster-name is not set"));
    }
    if !identifiers::validate(&config.agent_identifiers) {
        errors.push(ValidationError::new(
            "agent_identifiers",
            format!("{:?} is not a valid identifier list", config.agent_identifiers),
        ));
    }
    if let Some(addr) = &config.tunnel_server_address {
        if addr.trim().is_empty() {
            errors.push(ValidationError::new("tunnel_server_address", "must not be empty when set"));
        }
    }
    if config.pki.poll_interval_secs == 0 {
        errors.push(ValidationError::new("pki.poll_interval_secs", "must be greater than 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_server_config_is_valid() {
        assert!(validate_server_config(&ServerConfig::default()).is_ok());
    }

    #[test]
    fn reports_every_server_problem() {
        let config = ServerConfig {
            bind_address: String::new(),
            server_count: 0,
            cert_ips: vec!["10.0.0.1".into(), "not-an-ip".into()],
            ..Default::default()
        };
        let errors = validate_server_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["bind_address", "server_count", "cert_ips"]);
    }

    #[test]
    fn agent_requires_cluster_name() {
        let errors = validate_agent_config(&AgentConfig::default()).unwrap_err();
        assert_eq!(errors[0].message, "--cluster-name is not set");
    }

    #[test]
    fn agent_rejects_bad_identifiers() {
        let config = AgentConfig {
            cluster_name: "edge-1".into(),
            agent_identifiers: "host=east,bogus".into(),
            ..Default::default()
        };
        let errors = validate_agent_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "agent_identifiers");
    }

    #[test]
    fn agent_with_empty_identifiers_is_valid() {
        let config = AgentConfig {
            cluster_name: "edge-1".into(),
            ..Default::default()
        };
        assert!(validate_agent_config(&config).is_ok());
    }
}
