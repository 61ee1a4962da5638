//! Response handling and transformation.
//!
//! # Responsibilities
//! - Turn an upstream response into a streamed client response
//! - Strip hop-by-hop headers from upstream responses
//! - Map forwarding failures to 502 Bad Gateway
//!
//! # Design Decisions
//! - Bodies are streamed chunk by chunk; nothing is buffered to completion

use axum::body::Body;
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;

use super::request::strip_hop_by_hop;

/// Stream an upstream response back to the client.
pub fn from_upstream(upstream: reqwest::Response) -> Response<Body> {
    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_hop_by_hop(&mut headers);

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Response sent when the upstream could not be reached.
pub fn bad_gateway() -> Response<Body> {
    (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bad_gateway_has_502() {
        let response = bad_gateway();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"Upstream request failed");
    }
}
