//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router for the reverse-proxy listener
//! - Wire up middleware (request ID, tracing)
//! - Answer the health endpoint locally
//! - Dispatch everything else through the route table to an upstream
//! - Serve over TLS on an already bound listener
//!
//! # Design Decisions
//! - One catch-all handler; the route table decides, not Axum's router,
//!   so a non-GET health request is forwarded like any other path
//! - The health endpoint never consults an upstream or listener state

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, Response, StatusCode},
    response::IntoResponse,
    routing::any,
    Router,
};
use async_trait::async_trait;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use super::proxy::{Forwarder, ProxyError};
use super::request::X_REQUEST_ID;
use super::response;
use crate::observability::metrics;
use crate::routing::UpstreamRouter;

/// State shared by proxy handlers.
#[derive(Clone)]
pub struct ProxyState {
    pub router: Arc<UpstreamRouter>,
    pub forwarder: Arc<Forwarder>,
}

/// Build the reverse-proxy application.
pub fn proxy_app(router: Arc<UpstreamRouter>, forwarder: Arc<Forwarder>) -> Router {
    let state = ProxyState { router, forwarder };
    Router::new()
        .route("/{*path}", any(proxy_handler))
        .route("/", any(proxy_handler))
        .with_state(state)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// Reverse-proxy listener.
pub struct ReverseProxyServer {
    app: Router,
}

impl ReverseProxyServer {
    pub fn new(router: UpstreamRouter) -> Result<Self, ProxyError> {
        Ok(Self::with_forwarder(router, Forwarder::new()?))
    }

    pub fn with_forwarder(router: UpstreamRouter, forwarder: Forwarder) -> Self {
        Self {
            app: proxy_app(Arc::new(router), Arc::new(forwarder)),
        }
    }

    /// The application, for serving on a custom transport.
    pub fn app(&self) -> Router {
        self.app.clone()
    }

    /// Serve HTTPS on a bound listener until `handle` shuts it down.
    pub async fn serve_tls(
        self,
        listener: std::net::TcpListener,
        tls: Arc<rustls::ServerConfig>,
        handle: Handle,
    ) -> std::io::Result<()> {
        let address = listener.local_addr()?;
        tracing::info!(address = %address, "Reverse proxy listening");

        axum_server::from_tcp_rustls(listener, RustlsConfig::from_config(tls))
            .handle(handle)
            .serve(self.app.into_make_service_with_connect_info::<SocketAddr>())
            .await?;

        tracing::info!("Reverse proxy stopped");
        Ok(())
    }
}

/// Serves the reverse-proxy listener on an already bound socket.
#[async_trait]
pub trait ProxyService: Send + 'static {
    async fn serve(
        self: Box<Self>,
        listener: std::net::TcpListener,
        tls: Arc<rustls::ServerConfig>,
        handle: Handle,
    ) -> std::io::Result<()>;
}

#[async_trait]
impl ProxyService for ReverseProxyServer {
    async fn serve(
        self: Box<Self>,
        listener: std::net::TcpListener,
        tls: Arc<rustls::ServerConfig>,
        handle: Handle,
    ) -> std::io::Result<()> {
        (*self).serve_tls(listener, tls, handle).await
    }
}

/// Main proxy handler.
/// Looks up the route and answers or forwards the request.
async fn proxy_handler(State(state): State<ProxyState>, request: Request<Body>) -> Response<Body> {
    let started = Instant::now();
    let target = state.router.route(&request);
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let upstream = match state.router.upstream(target) {
        Some(url) => url.clone(),
        None => {
            metrics::record_proxy_request(target.as_str(), 200, started.elapsed());
            return (StatusCode::OK, "OK").into_response();
        }
    };

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    tracing::debug!(
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
        upstream = target.as_str(),
        "Proxying request"
    );

    let response = match state.forwarder.forward(&upstream, request, peer).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(request_id = %request_id, upstream = target.as_str(), error = %e, "Upstream error");
            response::bad_gateway()
        }
    };

    metrics::record_proxy_request(target.as_str(), response.status().as_u16(), started.elapsed());
    response
}
