//! Live certificate rotation on a running TLS listener.

use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use edge_tunnel::net::tls::{server_config, ListenerRole, SharedCertificate};
use rustls::pki_types::{CertificateDer, ServerName};

mod common;

async fn peer_leaf(connector: &TlsConnector, addr: std::net::SocketAddr) -> CertificateDer<'static> {
    let tcp = tokio::net::TcpStream::connect(addr).await.unwrap();
    let name = ServerName::try_from("127.0.0.1").unwrap();
    let tls = connector.connect(name, tcp).await.unwrap();
    let (_, session) = tls.get_ref();
    session.peer_certificates().unwrap()[0].clone().into_owned()
}

#[tokio::test]
async fn test_new_handshakes_see_rotated_certificate() {
    common::init();
    let ca = common::TestCa::new();
    let first = ca.leaf("tunnel-server");
    let second = ca.leaf("tunnel-server");

    let source = Arc::new(SharedCertificate::new());
    source.set(first.certified.clone());
    let config = server_config(source.clone(), &ca.roots(), ListenerRole::ReverseProxy).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = TlsAcceptor::from(config);
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                if let Ok(mut tls) = acceptor.accept(tcp).await {
                    let _ = tls.shutdown().await;
                }
            });
        }
    });

    let client = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_root_certificates(ca.roots().store())
    .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(client));

    assert_eq!(peer_leaf(&connector, addr).await, first.der);

    // The listener keeps running; only the slot changes.
    source.set(second.certified.clone());
    assert_eq!(peer_leaf(&connector, addr).await, second.der);
}
