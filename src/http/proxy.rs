//! Single-host forwarding client.
//!
//! # Responsibilities
//! - Hold the pooled upstream client shared by all proxied requests
//! - Join the upstream base URL with the request path and query
//! - Forward the request body as a stream and stream the response back
//!
//! # Design Decisions
//! - Upstream certificates are not verified; the proxy only reaches
//!   in-cluster upstreams
//! - HTTP/1.1 only, so any request can be upgraded
//! - No retries: a failed upstream call is a 502

use axum::body::Body;
use axum::http::{Request, Response};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::request::{forward_headers, is_upgrade};
use super::{response, upgrade};

pub const MAX_IDLE_PER_HOST: usize = 100;
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(90);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

/// Errors from the forwarding client.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to build forwarding client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

/// Pooled client forwarding requests to a fixed upstream per route.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    proto: &'static str,
}

impl Forwarder {
    /// Client for a listener that accepts `https`.
    pub fn new() -> Result<Self, ProxyError> {
        Self::with_proto("https")
    }

    /// `proto` is reported upstream as `X-Forwarded-Proto`.
    pub fn with_proto(proto: &'static str) -> Result<Self, ProxyError> {
        Self::build(proto, true)
    }

    /// Like [`with_proto`](Self::with_proto) but ignoring any system proxy.
    pub fn direct(proto: &'static str) -> Result<Self, ProxyError> {
        Self::build(proto, false)
    }

    fn build(proto: &'static str, system_proxy: bool) -> Result<Self, ProxyError> {
        let builder = reqwest::Client::builder();
        let builder = if system_proxy { builder } else { builder.no_proxy() };
        let client = builder
            .danger_accept_invalid_certs(true)
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .pool_idle_timeout(IDLE_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .tcp_keepalive(TCP_KEEPALIVE)
            .http1_only()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(ProxyError::Client)?;
        Ok(Self { client, proto })
    }

    /// Forward `req` to `upstream`, keeping its path and query.
    pub async fn forward(
        &self,
        upstream: &Url,
        mut req: Request<Body>,
        peer: Option<SocketAddr>,
    ) -> Result<Response<Body>, ProxyError> {
        let url = target_url(upstream, req.uri().path(), req.uri().query());
        let headers = forward_headers(req.headers(), peer, self.proto);
        let upgrading = is_upgrade(req.headers());
        let on_upgrade = upgrading.then(|| hyper::upgrade::on(&mut req));

        let builder = self
            .client
            .request(req.method().clone(), url)
            .headers(headers);
        let builder = if upgrading {
            builder
        } else {
            builder.body(reqwest::Body::wrap_stream(req.into_body().into_data_stream()))
        };

        let upstream_response = builder.send().await?;
        match on_upgrade {
            Some(incoming) => Ok(upgrade::bridge(incoming, upstream_response).await),
            None => Ok(response::from_upstream(upstream_response)),
        }
    }
}

/// Join `base` and the request path the way a single-host proxy does.
pub fn target_url(base: &Url, path: &str, query: Option<&str>) -> Url {
    let mut url = base.clone();
    let joined = match (base.path().ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base.path(), &path[1..]),
        (false, false) => format!("{}/{}", base.path(), path),
        _ => format!("{}{}", base.path(), path),
    };
    url.set_path(&joined);
    url.set_query(query);
    url
}
