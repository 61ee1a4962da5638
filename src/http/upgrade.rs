//! Protocol upgrade bridging.
//!
//! Exec, attach and port-forward switch protocols after the first
//! response. Once the upstream answers `101 Switching Protocols` the client
//! receives the same response and both upgraded connections are joined
//! until either side closes.

use axum::body::Body;
use axum::http::{Response, StatusCode};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;

/// Reply with the upstream's 101 and bridge the upgraded connections.
///
/// A non-101 answer is returned to the client as a normal response.
pub async fn bridge(incoming: OnUpgrade, upstream: reqwest::Response) -> Response<Body> {
    if upstream.status() != StatusCode::SWITCHING_PROTOCOLS {
        return super::response::from_upstream(upstream);
    }

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    *response.headers_mut() = upstream.headers().clone();

    let upstream = match upstream.upgrade().await {
        Ok(upgraded) => upgraded,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to upgrade upstream connection");
            return super::response::bad_gateway();
        }
    };

    tokio::spawn(async move {
        match incoming.await {
            Ok(client) => {
                let mut client = TokioIo::new(client);
                let mut upstream = upstream;
                match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
                    Ok((from_client, from_upstream)) => {
                        tracing::debug!(from_client, from_upstream, "Upgraded session ended");
                    }
                    Err(e) => tracing::debug!(error = %e, "Upgraded session closed with error"),
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to upgrade client connection"),
        }
    });

    response
}
