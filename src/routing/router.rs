//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Hold the fixed route table of the reverse proxy
//! - Resolve a request to the health endpoint or one of two upstreams
//! - Derive the API server upstream from the in-cluster environment
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - First match wins: health, then norm prefix, then API server fallback
//! - The fallback always matches, so there is no NoMatch outcome

use axum::body::Body;
use axum::http::{Method, Request};
use std::net::IpAddr;
use thiserror::Error;
use url::Url;

use super::matcher::{ExactPathMatcher, Matcher, PathPrefixMatcher};
use crate::config::schema::UpstreamConfig;

/// Health endpoint answered locally.
pub const HEALTHZ_PATH: &str = "/v1/healthz";

/// Prefix forwarded to the norm upstream.
pub const NORM_PREFIX: &str = "/v1/norm";

pub const SERVICE_HOST_ENV: &str = "KUBERNETES_SERVICE_HOST";
pub const SERVICE_PORT_ENV: &str = "KUBERNETES_SERVICE_PORT";

/// Errors building the route table.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("invalid {name} upstream URL {url:?}: {source}")]
    InvalidUrl {
        name: &'static str,
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
}

/// Where a request is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    /// Answered locally with 200 "OK".
    Health,
    /// Forwarded to the norm upstream.
    Norm,
    /// Forwarded to the API server.
    ApiServer,
}

impl RouteTarget {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteTarget::Health => "healthz",
            RouteTarget::Norm => "norm",
            RouteTarget::ApiServer => "apiserver",
        }
    }
}

/// Fixed route table of the reverse proxy.
#[derive(Debug)]
pub struct UpstreamRouter {
    health: ExactPathMatcher,
    norm: PathPrefixMatcher,
    norm_upstream: Url,
    api_upstream: Url,
}

impl UpstreamRouter {
    pub fn new(norm_upstream: Url, api_upstream: Url) -> Self {
        Self {
            health: ExactPathMatcher::new(HEALTHZ_PATH).with_method(Method::GET),
            norm: PathPrefixMatcher::new(NORM_PREFIX),
            norm_upstream,
            api_upstream,
        }
    }

    /// Build from configuration, falling back to the in-cluster environment
    /// for the API server.
    pub fn from_config(config: &UpstreamConfig) -> Result<Self, RoutingError> {
        let norm = parse_url("norm", &config.norm_url)?;
        let api = match &config.api_server_url {
            Some(url) => parse_url("apiserver", url)?,
            None => api_server_url_from_env()?,
        };
        Ok(Self::new(norm, api))
    }

    /// Resolve the route for a request.
    pub fn route(&self, req: &Request<Body>) -> RouteTarget {
        if self.health.matches(req) {
            RouteTarget::Health
        } else if self.norm.matches(req) {
            RouteTarget::Norm
        } else {
            RouteTarget::ApiServer
        }
    }

    /// Base URL for a forwarded target.
    pub fn upstream(&self, target: RouteTarget) -> Option<&Url> {
        match target {
            RouteTarget::Health => None,
            RouteTarget::Norm => Some(&self.norm_upstream),
            RouteTarget::ApiServer => Some(&self.api_upstream),
        }
    }
}

fn parse_url(name: &'static str, raw: &str) -> Result<Url, RoutingError> {
    Url::parse(raw).map_err(|source| RoutingError::InvalidUrl {
        name,
        url: raw.to_string(),
        source,
    })
}

/// `https://<KUBERNETES_SERVICE_HOST>:<KUBERNETES_SERVICE_PORT>`.
pub fn api_server_url_from_env() -> Result<Url, RoutingError> {
    let host = std::env::var(SERVICE_HOST_ENV).map_err(|_| RoutingError::MissingEnv(SERVICE_HOST_ENV))?;
    let port = std::env::var(SERVICE_PORT_ENV).map_err(|_| RoutingError::MissingEnv(SERVICE_PORT_ENV))?;
    api_server_url(&host, &port)
}

fn api_server_url(host: &str, port: &str) -> Result<Url, RoutingError> {
    let host = match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) => format!("[{}]", v6),
        _ => host.to_string(),
    };
    parse_url("apiserver", &format!("https://{}:{}", host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> UpstreamRouter {
        UpstreamRouter::new(
            Url::parse("https://norm").unwrap(),
            Url::parse("https://10.96.0.1:443").unwrap(),
        )
    }

    fn request(method: Method, path: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn routes_fixed_table() {
        let r = router();
        assert_eq!(r.route(&request(Method::GET, "/v1/healthz")), RouteTarget::Health);
        assert_eq!(r.route(&request(Method::GET, "/v1/norm/x")), RouteTarget::Norm);
        assert_eq!(r.route(&request(Method::POST, "/v1/norm")), RouteTarget::Norm);
        assert_eq!(r.route(&request(Method::GET, "/anything/else")), RouteTarget::ApiServer);
        assert_eq!(r.route(&request(Method::GET, "/api/v1/pods")), RouteTarget::ApiServer);
    }

    #[test]
    fn non_get_healthz_is_forwarded() {
        assert_eq!(
            router().route(&request(Method::POST, "/v1/healthz")),
            RouteTarget::ApiServer
        );
    }

    #[test]
    fn health_has_no_upstream() {
        let r = router();
        assert!(r.upstream(RouteTarget::Health).is_none());
        assert_eq!(r.upstream(RouteTarget::Norm).unwrap().as_str(), "https://norm/");
    }

    #[test]
    fn api_server_url_brackets_ipv6() {
        assert_eq!(api_server_url("10.0.0.1", "443").unwrap().as_str(), "https://10.0.0.1/");
        assert_eq!(api_server_url("fd00::1", "6443").unwrap().as_str(), "https://[fd00::1]:6443/");
    }

    #[test]
    fn configured_api_server_wins_over_env() {
        let config = UpstreamConfig {
            norm_url: "https://norm".into(),
            api_server_url: Some("https://apiserver.example:6443".into()),
        };
        let r = UpstreamRouter::from_config(&config).unwrap();
        assert_eq!(
            r.upstream(RouteTarget::ApiServer).unwrap().as_str(),
            "https://apiserver.example:6443/"
        );
    }

    #[test]
    fn invalid_norm_url_is_rejected() {
        let config = UpstreamConfig {
            norm_url: "not a url".into(),
            api_server_url: Some("https://a".into()),
        };
        assert!(matches!(
            UpstreamRouter::from_config(&config),
            Err(RoutingError::InvalidUrl { name: "norm", .. })
        ));
    }
}
