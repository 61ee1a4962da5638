//! Configuration loading from disk.

use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::{AgentConfig, ServerConfig};
use crate::config::validation::{validate_agent_config, validate_server_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Read and parse a TOML file without semantic validation.
pub(crate) fn parse_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Load and validate tunnel server configuration from a TOML file.
pub fn load_server_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let config: ServerConfig = parse_file(path)?;
    validate_server_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate tunnel agent configuration from a TOML file.
pub fn load_agent_config(path: &Path) -> Result<AgentConfig, ConfigError> {
    let config: AgentConfig = parse_file(path)?;
    validate_agent_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_server_overrides() {
        let file = write_temp(
            r#"
            bind_address = "127.0.0.1"
            cert_ips = ["192.168.1.10"]

            [ports]
            master = 20263
            "#,
        );
        let config = load_server_config(file.path()).unwrap();
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.ports.master, 20263);
        assert_eq!(config.ports.agent, 10262);
    }

    #[test]
    fn agent_without_cluster_name_fails_validation() {
        let file = write_temp("agent_identifiers = \"host=a\"\n");
        match load_agent_config(file.path()) {
            Err(ConfigError::Validation(errors)) => {
                assert!(errors.iter().any(|e| e.field == "cluster_name"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let file = write_temp("bind_address = [");
        assert!(matches!(load_server_config(file.path()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = load_server_config(Path::new("/nonexistent/tunnel.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
