//! Reverse-proxy routing against mock upstreams.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use url::Url;

use edge_tunnel::http::{proxy_app, Forwarder};
use edge_tunnel::routing::UpstreamRouter;

mod common;

async fn start_proxy(norm: SocketAddr, api: SocketAddr) -> SocketAddr {
    let router = UpstreamRouter::new(
        Url::parse(&format!("http://{}", norm)).unwrap(),
        Url::parse(&format!("http://{}", api)).unwrap(),
    );
    let app = proxy_app(Arc::new(router), Arc::new(Forwarder::direct("https").unwrap()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await;
    });
    addr
}

#[tokio::test]
async fn test_routes_to_fixed_upstreams() {
    let norm = common::start_echo_upstream("norm").await;
    let api = common::start_echo_upstream("api").await;
    let proxy = start_proxy(norm, api).await;
    let client = common::http_client();

    let res = client.get(format!("http://{}/v1/healthz", proxy)).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "OK");

    let res = client.get(format!("http://{}/v1/norm/x", proxy)).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "norm GET /v1/norm/x");

    let res = client
        .get(format!("http://{}/anything/else?watch=true", proxy))
        .send()
        .await
        .unwrap();
    assert_eq!(res.text().await.unwrap(), "api GET /anything/else?watch=true");

    let res = client.post(format!("http://{}/v1/healthz", proxy)).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "api POST /v1/healthz");
}

#[tokio::test]
async fn test_sets_forwarded_headers() {
    let norm = common::start_echo_upstream("norm").await;
    let api = common::start_echo_upstream("api").await;
    let proxy = start_proxy(norm, api).await;

    let res = common::http_client()
        .get(format!("http://{}/api/v1/nodes", proxy))
        .header("x-forwarded-for", "203.0.113.9")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-seen-forwarded-for"], "203.0.113.9, 127.0.0.1");
    assert_eq!(res.headers()["x-seen-forwarded-proto"], "https");
    assert_eq!(res.headers()["x-seen-host"], proxy.to_string().as_str());
    assert!(res.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_healthz_independent_of_upstreams() {
    let dead = common::closed_port().await;
    let proxy = start_proxy(dead, dead).await;
    let client = common::http_client();

    let res = client.get(format!("http://{}/v1/healthz", proxy)).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "OK");

    let res = client.get(format!("http://{}/v1/norm/x", proxy)).send().await.unwrap();
    assert_eq!(res.status(), 502);

    let res = client.get(format!("http://{}/api", proxy)).send().await.unwrap();
    assert_eq!(res.status(), 502);
}

#[tokio::test]
async fn test_streams_before_upstream_finishes() {
    let (release, released) = tokio::sync::oneshot::channel();
    let api = common::start_streaming_upstream("first", "second", released).await;
    let norm = common::closed_port().await;
    let proxy = start_proxy(norm, api).await;

    let mut res = common::http_client()
        .get(format!("http://{}/api/v1/pods?watch=1", proxy))
        .send()
        .await
        .unwrap();

    // The first chunk arrives while the upstream is still holding the second.
    let first = tokio::time::timeout(Duration::from_secs(2), res.chunk())
        .await
        .expect("first chunk was buffered")
        .unwrap()
        .unwrap();
    assert_eq!(&first[..], b"first");

    release.send(()).unwrap();
    let mut rest = Vec::new();
    while let Some(chunk) = res.chunk().await.unwrap() {
        rest.extend_from_slice(&chunk);
    }
    assert_eq!(rest, b"second");
}

#[tokio::test]
async fn test_upgrade_is_tunnelled() {
    let api = common::start_upgrade_upstream().await;
    let norm = common::closed_port().await;
    let proxy = start_proxy(norm, api).await;

    let mut client = tokio::net::TcpStream::connect(proxy).await.unwrap();
    client
        .write_all(
            b"POST /api/v1/namespaces/default/pods/web/exec?command=sh HTTP/1.1\r\n\
              Host: proxy.local\r\n\
              Connection: Upgrade\r\n\
              Upgrade: SPDY/3.1\r\n\
              Content-Length: 0\r\n\r\n",
        )
        .await
        .unwrap();

    let head = tokio::time::timeout(Duration::from_secs(5), common::read_head(&mut client))
        .await
        .unwrap()
        .to_ascii_lowercase();
    assert!(head.starts_with("http/1.1 101"), "unexpected head: {}", head);
    assert!(head.contains("upgrade: spdy/3.1"));

    client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 64];
    let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], b"echo:ping");
}
