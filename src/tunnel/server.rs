//! Master-facing and agent-facing listeners.
//!
//! # Responsibilities
//! - Bind the master listener (TCP with mTLS, or a local socket)
//! - Bind the agent gRPC listener with TLS and HTTP/2 keepalive
//! - Hand both to the tunnel runtime and supervise their serve loops
//!
//! # Design Decisions
//! - Both listeners are bound before either starts serving, so a bind
//!   failure returns before any traffic is accepted
//! - Serve failures are supervised: logged, counted, never escalated
//! - Both listeners stop on the shared token; the master drains within the
//!   grace period

use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::TunnelRuntime;
use crate::net::listener::{bind_tcp, into_std, supervise, tls_incoming, ListenerError};
use crate::net::local_socket::LocalSocketFactory;
use crate::net::tls::{KEEPALIVE_INTERVAL, KEEPALIVE_TIMEOUT};

pub const MASTER_LISTENER: &str = "master";
pub const AGENT_LISTENER: &str = "agent";
/// Label of the tasks that start a graceful shutdown on stop.
pub const DRAIN_TASK: &str = "drain";

/// Transport of the master-facing listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterTransport {
    /// HTTPS with mandatory client certificates.
    Tcp { address: String },
    /// Plain HTTP on a filesystem socket for a co-located caller.
    LocalSocket { path: PathBuf },
}

/// Where the master listener ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterEndpoint {
    Tcp(SocketAddr),
    LocalSocket(PathBuf),
}

/// Bound master and agent listeners.
pub struct TunnelServer {
    master: MasterTransport,
    agent_address: String,
    runtime: Arc<dyn TunnelRuntime>,
    sockets: LocalSocketFactory,
}

/// Running master and agent serve loops.
#[derive(Debug)]
pub struct TunnelListeners {
    pub master: MasterEndpoint,
    pub agent: SocketAddr,
    /// Serve-loop tasks keyed by listener name.
    pub tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl TunnelServer {
    pub fn new(master: MasterTransport, agent_address: impl Into<String>, runtime: Arc<dyn TunnelRuntime>) -> Self {
        Self {
            master,
            agent_address: agent_address.into(),
            runtime,
            sockets: LocalSocketFactory::shared().clone(),
        }
    }

    /// Use `factory` for the local socket instead of the process-wide one.
    pub fn with_socket_factory(mut self, factory: LocalSocketFactory) -> Self {
        self.sockets = factory;
        self
    }

    /// Bind both listeners and start serving.
    ///
    /// Returns a bind error without starting anything. Once this returns
    /// `Ok`, failures are only logged.
    pub async fn start(
        self,
        master_tls: Arc<rustls::ServerConfig>,
        agent_tls: Arc<rustls::ServerConfig>,
        stop: CancellationToken,
        grace: Duration,
    ) -> Result<TunnelListeners, ListenerError> {
        let master = match &self.master {
            MasterTransport::Tcp { address } => BoundMaster::Tcp(into_std(bind_tcp(address).await?)?),
            MasterTransport::LocalSocket { path } => BoundMaster::Socket(self.sockets.bind(path)?, path.clone()),
        };
        let agent = bind_tcp(&self.agent_address).await?;
        let agent_addr = agent.local_addr().map_err(|source| ListenerError::Bind {
            address: self.agent_address.clone(),
            source,
        })?;

        let mut tasks = Vec::with_capacity(3);
        let endpoint = self.serve_master(master, master_tls, &stop, grace, &mut tasks)?;

        tracing::info!(address = %agent_addr, "Handling connections from agents");
        let incoming = tls_incoming(agent, agent_tls, stop.clone());
        let routes = self.runtime.agent_routes();
        let shutdown = stop.clone().cancelled_owned();
        tasks.push((AGENT_LISTENER, supervise(AGENT_LISTENER, async move {
            tonic::transport::Server::builder()
                .http2_keepalive_interval(Some(KEEPALIVE_INTERVAL))
                .http2_keepalive_timeout(Some(KEEPALIVE_TIMEOUT))
                .add_routes(routes)
                .serve_with_incoming_shutdown(incoming, shutdown)
                .await
        })));

        Ok(TunnelListeners {
            master: endpoint,
            agent: agent_addr,
            tasks,
        })
    }

    fn serve_master(
        &self,
        master: BoundMaster,
        tls: Arc<rustls::ServerConfig>,
        stop: &CancellationToken,
        grace: Duration,
        tasks: &mut Vec<(&'static str, JoinHandle<()>)>,
    ) -> Result<MasterEndpoint, ListenerError> {
        let router = self.runtime.master_router();
        match master {
            BoundMaster::Tcp(listener) => {
                let address = listener.local_addr().map_err(|source| ListenerError::Bind {
                    address: "master".to_string(),
                    source,
                })?;
                tracing::info!(address = %address, "Handling HTTPS requests from master");

                let handle = Handle::new();
                tasks.push((DRAIN_TASK, drain_on_stop(handle.clone(), stop.clone(), grace)));
                tasks.push((MASTER_LISTENER, supervise(MASTER_LISTENER, async move {
                    axum_server::from_tcp_rustls(listener, RustlsConfig::from_config(tls))
                        .handle(handle)
                        .serve(router.into_make_service())
                        .await
                })));
                Ok(MasterEndpoint::Tcp(address))
            }
            BoundMaster::Socket(listener, path) => {
                tracing::info!(path = %path.display(), "Handling requests from master on local socket");
                let shutdown = stop.clone().cancelled_owned();
                tasks.push((MASTER_LISTENER, supervise(MASTER_LISTENER, async move {
                    axum::serve(listener, router)
                        .with_graceful_shutdown(shutdown)
                        .await
                })));
                Ok(MasterEndpoint::LocalSocket(path))
            }
        }
    }
}

enum BoundMaster {
    Tcp(std::net::TcpListener),
    Socket(tokio::net::UnixListener, PathBuf),
}

/// Start a graceful shutdown of an `axum-server` listener when `stop` fires.
pub fn drain_on_stop(handle: Handle, stop: CancellationToken, grace: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        stop.cancelled().await;
        handle.graceful_shutdown(Some(grace));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::net::tls::{server_config, ListenerRole, RootPool, SharedCertificate};
    use crate::tunnel::{DetachedRuntime, RuntimeOptions};

    fn tls() -> Arc<rustls::ServerConfig> {
        let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let key = rcgen::KeyPair::generate().unwrap();
        let ca = params.self_signed(&key).unwrap();
        let roots = RootPool::from_pem(ca.pem().as_bytes()).unwrap();
        server_config(Arc::new(SharedCertificate::new()), &roots, ListenerRole::MasterFacing).unwrap()
    }

    fn runtime() -> Arc<dyn TunnelRuntime> {
        Arc::new(DetachedRuntime::new(RuntimeOptions::from_config(&ServerConfig::default())))
    }

    #[tokio::test]
    async fn agent_bind_failure_is_returned() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken_addr = taken.local_addr().unwrap().to_string();

        let server = TunnelServer::new(
            MasterTransport::Tcp { address: "127.0.0.1:0".into() },
            taken_addr.clone(),
            runtime(),
        );
        let result = server
            .start(tls(), tls(), CancellationToken::new(), Duration::from_secs(1))
            .await;
        match result {
            Err(ListenerError::Bind { address, .. }) => assert_eq!(address, taken_addr),
            other => panic!("expected bind error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn local_socket_master_serves_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tunnel-server.sock");
        let stop = CancellationToken::new();

        let listeners = TunnelServer::new(
            MasterTransport::LocalSocket { path: path.clone() },
            "127.0.0.1:0",
            runtime(),
        )
        .start(tls(), tls(), stop.clone(), Duration::from_secs(1))
        .await
        .unwrap();
        assert_eq!(listeners.master, MasterEndpoint::LocalSocket(path.clone()));

        let mut stream = tokio::net::UnixStream::connect(&path).await.unwrap();
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        stream
            .write_all(b"GET /x HTTP/1.1\r\nhost: local\r\nconnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 503"));

        stop.cancel();
        for (_, task) in listeners.tasks {
            task.await.unwrap();
        }
    }
}
