//! Listener binding and serve-loop supervision.
//!
//! # Responsibilities
//! - Bind TCP listeners synchronously so bind errors reach the caller
//! - Run TLS handshakes for the agent-facing RPC listener
//! - Supervise serve loops: a loop that ends in error is logged and counted
//!
//! # Design Decisions
//! - Bind failures are fatal, serve failures are not; a failed listener is
//!   never restarted and never stops its siblings
//! - Handshakes run on their own tasks so a slow peer cannot stall accept

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Failed to create a local socket.
    #[error("failed to create local socket {path}: {source}")]
    LocalSocket {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A serve loop ended with an error.
    #[error("{listener} listener failed: {message}")]
    Serve {
        listener: &'static str,
        message: String,
    },
}

/// Bind a TCP listener on `address` (`ip:port`).
pub async fn bind_tcp(address: &str) -> Result<TcpListener, ListenerError> {
    let listener = TcpListener::bind(address)
        .await
        .map_err(|source| ListenerError::Bind {
            address: address.to_string(),
            source,
        })?;

    if let Ok(local_addr) = listener.local_addr() {
        tracing::info!(address = %local_addr, "Listener bound");
    }
    Ok(listener)
}

/// Convert a bound tokio listener for servers that take a std listener.
pub fn into_std(listener: TcpListener) -> Result<std::net::TcpListener, ListenerError> {
    let address = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();
    listener
        .into_std()
        .map_err(|source| ListenerError::Bind { address, source })
}

/// Run a serve loop on its own task.
///
/// An error is logged and counted under `listener`; it is never returned.
pub fn supervise<F, E>(listener: &'static str, serve: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    tokio::spawn(async move {
        match serve.await {
            Ok(()) => tracing::info!(listener, "Listener stopped"),
            Err(e) => {
                let err = ListenerError::Serve {
                    listener,
                    message: e.to_string(),
                };
                tracing::error!(listener, error = %err, "Listener serve loop failed");
                metrics::record_listener_failure(listener);
            }
        }
    })
}

/// Stream of established TLS connections for an RPC server.
pub type TlsIncoming = ReceiverStream<Result<TlsStream<TcpStream>, io::Error>>;

/// Accept TCP connections, complete TLS handshakes and yield the streams.
///
/// Failed handshakes are logged and dropped. The stream ends when `stop`
/// fires.
pub fn tls_incoming(
    listener: TcpListener,
    config: Arc<rustls::ServerConfig>,
    stop: CancellationToken,
) -> TlsIncoming {
    let (tx, rx) = mpsc::channel(128);
    let acceptor = TlsAcceptor::from(config);

    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                _ = stop.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            let (stream, peer_addr) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                    continue;
                }
            };

            let acceptor = acceptor.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                match acceptor.accept(stream).await {
                    Ok(tls) => {
                        tracing::debug!(peer_addr = %peer_addr, "TLS handshake complete");
                        let _ = tx.send(Ok(tls)).await;
                    }
                    Err(e) => {
                        tracing::debug!(peer_addr = %peer_addr, error = %e, "TLS handshake failed");
                    }
                }
            });
        }
    });

    ReceiverStream::new(rx)
}
