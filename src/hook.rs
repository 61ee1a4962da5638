//! Vendor hooks run around edge agent start.
//!
//! # Design Decisions
//! - Closed set of providers selected by configuration, not by probing
//! - Hooks receive the resolved agent configuration read-only

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::schema::AgentConfig;

/// Errors returned by a hook provider.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("{provider} hook failed before start: {message}")]
    BeforeStart { provider: &'static str, message: String },

    #[error("{provider} hook failed after start: {message}")]
    AfterStart { provider: &'static str, message: String },
}

/// Capability run immediately before and after the agent starts.
#[async_trait]
pub trait TunnelHook: Send + Sync {
    fn name(&self) -> &'static str;

    async fn before_start(&self, config: &AgentConfig) -> Result<(), HookError>;

    async fn after_start(&self, config: &AgentConfig) -> Result<(), HookError>;
}

/// Hook providers selectable from configuration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum HookProviderKind {
    /// No hook.
    #[default]
    None,
    /// TKE Stack clusters.
    #[value(name = "tkestack")]
    TkeStack,
}

impl HookProviderKind {
    /// Instantiate the selected provider.
    pub fn build(self) -> Box<dyn TunnelHook> {
        match self {
            HookProviderKind::None => Box::new(NoopHook),
            HookProviderKind::TkeStack => Box::new(TkeStackHook),
        }
    }
}

struct NoopHook;

#[async_trait]
impl TunnelHook for NoopHook {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn before_start(&self, _config: &AgentConfig) -> Result<(), HookError> {
        Ok(())
    }

    async fn after_start(&self, _config: &AgentConfig) -> Result<(), HookError> {
        Ok(())
    }
}

/// TKE Stack hook. Credential patching is handled outside this process, so
/// both phases only record that they ran.
struct TkeStackHook;

#[async_trait]
impl TunnelHook for TkeStackHook {
    fn name(&self) -> &'static str {
        "tkestack"
    }

    async fn before_start(&self, config: &AgentConfig) -> Result<(), HookError> {
        tracing::info!(cluster = %config.cluster_name, "tkestack hook before start");
        Ok(())
    }

    async fn after_start(&self, config: &AgentConfig) -> Result<(), HookError> {
        tracing::info!(cluster = %config.cluster_name, "tkestack hook after start");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn providers_succeed() {
        let config = AgentConfig {
            cluster_name: "edge-1".into(),
            ..Default::default()
        };
        for kind in [HookProviderKind::None, HookProviderKind::TkeStack] {
            let hook = kind.build();
            hook.before_start(&config).await.unwrap();
            hook.after_start(&config).await.unwrap();
        }
    }

    #[test]
    fn deserializes_from_config() {
        #[derive(Deserialize)]
        struct Wrapper {
            hook: HookProviderKind,
        }
        let w: Wrapper = toml::from_str("hook = \"tkestack\"").unwrap();
        assert_eq!(w.hook, HookProviderKind::TkeStack);
        assert_eq!(w.hook.build().name(), "tkestack");
    }
}
