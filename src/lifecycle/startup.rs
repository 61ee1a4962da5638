//! Startup orchestration.
//!
//! # Responsibilities
//! - Bootstrap the component's certificate and gate listeners on it
//! - Run the CSR approver on the cloud side
//! - Bind the three server listeners, then serve them independently
//! - Hand the edge side over to the agent runtime once signed
//! - Drain on shutdown within a bounded grace period
//!
//! # Design Decisions
//! - Fail fast: configuration, bootstrap and bind errors are fatal
//! - Serve-loop failures after bind are logged, never fatal
//! - A stop signal while waiting for the certificate ends startup cleanly
//!   without starting any listener
//!
//! # Data Flow
//! ```text
//! Idle ──bootstrap──▶ CertPending ──signed──▶ Listening ──stop──▶ Draining
//!                          │
//!                          └──stop before signed──▶ Draining
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::shutdown::Shutdown;
use crate::cluster::{ClusterAccess, DiscoveryError, ServiceDiscovery};
use crate::config::schema::{PkiConfig, AGENT_COMPONENT, AGENT_TOKEN_FILE, SERVER_COMPONENT};
use crate::config::{AgentConfig, ConfigError, ServerConfig};
use crate::hook::{HookError, TunnelHook};
use crate::http::{ProxyError, ProxyService, ReverseProxyServer};
use crate::identifiers::{AgentIdentifiers, IdentifierError};
use crate::net::listener::{bind_tcp, into_std, supervise, ListenerError};
use crate::net::tls::{client_config, server_config, CertificateSource, ListenerRole, RootPool, TlsError};
use crate::pki::{
    self, request::pod_ip_from_env, CertificateRequest, CsrApprover, KubeSigner, ManagerOptions, PkiError,
    SigningBackend, SubjectAltNames,
};
use crate::routing::{RoutingError, UpstreamRouter};
use crate::tunnel::agent::AgentSession;
use crate::tunnel::server::{drain_on_stop, DRAIN_TASK, MasterEndpoint, MasterTransport, TunnelServer};
use crate::tunnel::{AgentRuntime, TunnelRuntime};

pub const REVERSE_PROXY_LISTENER: &str = "reverse-proxy";

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid agent identifiers: {0}")]
    Identifiers(#[from] IdentifierError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Pki(#[from] PkiError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Hook(#[from] HookError),
}

/// Lifecycle phase of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    CertPending,
    Listening,
    Draining,
}

fn manager_options(pki: &PkiConfig) -> ManagerOptions {
    ManagerOptions {
        signer_name: pki.signer_name.clone(),
        poll_interval: Duration::from_secs(pki.poll_interval_secs),
        ..ManagerOptions::default()
    }
}

/// Server TLS configs for the three listeners, all reading one source.
pub struct ServerTls {
    pub master: Arc<rustls::ServerConfig>,
    pub agent: Arc<rustls::ServerConfig>,
    pub proxy: Arc<rustls::ServerConfig>,
}

impl ServerTls {
    pub fn build(source: Arc<dyn CertificateSource>, roots: &RootPool) -> Result<Self, TlsError> {
        Ok(Self {
            master: server_config(source.clone(), roots, ListenerRole::MasterFacing)?,
            agent: server_config(source.clone(), roots, ListenerRole::AgentFacing)?,
            proxy: server_config(source, roots, ListenerRole::ReverseProxy)?,
        })
    }
}

/// Addresses and transports of the server listeners.
#[derive(Debug, Clone)]
pub struct ListenerPlan {
    pub master: MasterTransport,
    pub agent_address: String,
    pub proxy_address: String,
    pub grace: Duration,
}

impl ListenerPlan {
    pub fn from_config(config: &ServerConfig) -> Self {
        let master = match &config.local_socket_path {
            Some(path) => MasterTransport::LocalSocket { path: path.clone() },
            None => MasterTransport::Tcp {
                address: config.master_address(),
            },
        };
        Self {
            master,
            agent_address: config.agent_address(),
            proxy_address: config.reverse_proxy_address(),
            grace: Duration::from_secs(config.shutdown_grace_secs),
        }
    }
}

/// Starts the reverse-proxy, master and agent listeners.
pub struct ListenerOrchestrator {
    plan: ListenerPlan,
    runtime: Arc<dyn TunnelRuntime>,
    proxy: Box<dyn ProxyService>,
}

/// The three listeners, serving.
#[derive(Debug)]
pub struct RunningListeners {
    pub proxy: SocketAddr,
    pub master: MasterEndpoint,
    pub agent: SocketAddr,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    grace: Duration,
}

impl ListenerOrchestrator {
    pub fn new(plan: ListenerPlan, runtime: Arc<dyn TunnelRuntime>, proxy: impl ProxyService) -> Self {
        Self {
            plan,
            runtime,
            proxy: Box::new(proxy),
        }
    }

    /// Bind every listener, then serve each on its own task.
    ///
    /// Any bind error is returned before the reverse proxy serves a request.
    pub async fn start(self, tls: ServerTls, stop: CancellationToken) -> Result<RunningListeners, ListenerError> {
        let proxy_listener = into_std(bind_tcp(&self.plan.proxy_address).await?)?;
        let proxy_addr = proxy_listener.local_addr().map_err(|source| ListenerError::Bind {
            address: self.plan.proxy_address.clone(),
            source,
        })?;

        let tunnel = TunnelServer::new(self.plan.master, self.plan.agent_address, self.runtime)
            .start(tls.master, tls.agent, stop.clone(), self.plan.grace)
            .await?;

        let mut tasks = tunnel.tasks;
        let handle = axum_server::Handle::new();
        tasks.push((DRAIN_TASK, drain_on_stop(handle.clone(), stop, self.plan.grace)));
        tasks.push((
            REVERSE_PROXY_LISTENER,
            supervise(REVERSE_PROXY_LISTENER, self.proxy.serve(proxy_listener, tls.proxy, handle)),
        ));

        Ok(RunningListeners {
            proxy: proxy_addr,
            master: tunnel.master,
            agent: tunnel.agent,
            tasks,
            grace: self.plan.grace,
        })
    }
}

impl RunningListeners {
    /// Whether any task of `listener` is still running.
    pub fn is_serving(&self, listener: &str) -> bool {
        self.tasks
            .iter()
            .any(|(name, task)| *name == listener && !task.is_finished())
    }

    /// Wait for the listeners to finish after the stop token fired.
    ///
    /// Gives up after the grace period plus one second.
    pub async fn drain(self) {
        let deadline = self.grace + Duration::from_secs(1);
        let join = futures_util::future::join_all(self.tasks.into_iter().map(|(_, task)| task));
        if tokio::time::timeout(deadline, join).await.is_err() {
            tracing::warn!(grace_secs = self.grace.as_secs(), "Listeners did not stop within the grace period");
        }
    }
}

/// Cloud-side startup.
pub struct ServerBootstrap {
    config: ServerConfig,
    runtime: Arc<dyn TunnelRuntime>,
    phase: watch::Sender<Phase>,
}

impl ServerBootstrap {
    pub fn new(config: ServerConfig, runtime: Arc<dyn TunnelRuntime>) -> Self {
        let (phase, _) = watch::channel(Phase::Idle);
        Self { config, runtime, phase }
    }

    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    fn enter(&self, phase: Phase) {
        tracing::info!(phase = ?phase, "Server phase changed");
        self.phase.send_replace(phase);
    }

    /// Connect to the cluster, discover the certificate's SANs and run.
    pub async fn run(&self, shutdown: &Shutdown) -> Result<(), StartupError> {
        let access = match &self.config.kube_config {
            Some(path) => ClusterAccess::from_kubeconfig(path).await?,
            None => ClusterAccess::infer().await?,
        };
        let roots = access.root_pool(&self.config.pki.ca_file)?;

        let discovery = ServiceDiscovery::new(access.client());
        let Some(discovered) = discovery.subject_alt_names_until(&shutdown.token()).await else {
            tracing::info!("Stopped before the tunnel-server service was discovered");
            self.enter(Phase::Draining);
            return Ok(());
        };

        let backend: Arc<dyn SigningBackend> = Arc::new(KubeSigner::new(access.client()));
        self.run_with(backend, discovered, roots, shutdown).await
    }

    /// Run against an explicit signing backend and trust anchors.
    pub async fn run_with(
        &self,
        backend: Arc<dyn SigningBackend>,
        discovered: SubjectAltNames,
        roots: RootPool,
        shutdown: &Shutdown,
    ) -> Result<(), StartupError> {
        let config = &self.config;
        let stop = shutdown.token();

        let router = UpstreamRouter::from_config(&config.upstreams)?;
        let proxy = ReverseProxyServer::new(router)?;

        let extra_ips: Vec<IpAddr> = config.cert_ips.iter().filter_map(|ip| ip.parse().ok()).collect();
        let request = CertificateRequest::cloud_identity(
            SERVER_COMPONENT,
            &config.pki.cert_dir,
            discovered,
            &config.cert_dns_names,
            &extra_ips,
        );
        let manager = pki::bootstrap(request, backend.clone(), manager_options(&config.pki))?;
        self.enter(Phase::CertPending);

        let approver = Arc::new(CsrApprover::new(
            backend,
            Duration::from_secs(config.approver.resync_secs),
        ));
        tokio::spawn(approver.run(config.approver.threadiness, stop.clone()));

        let source: Arc<dyn CertificateSource> = Arc::new(manager.clone());
        let tls = ServerTls::build(source, &roots)?;

        let poll = Duration::from_secs(config.pki.poll_interval_secs);
        if !pki::wait_until_signed(&manager, poll, &stop).await.is_signed() {
            tracing::info!("Stopped before the server certificate was signed");
            self.enter(Phase::Draining);
            return Ok(());
        }

        let listeners = ListenerOrchestrator::new(ListenerPlan::from_config(config), self.runtime.clone(), proxy)
            .start(tls, stop.clone())
            .await?;
        tracing::info!(
            proxy = %listeners.proxy,
            master = ?listeners.master,
            agent = %listeners.agent,
            "Tunnel server listening"
        );
        self.enter(Phase::Listening);

        shutdown.wait().await;
        self.enter(Phase::Draining);
        listeners.drain().await;
        Ok(())
    }
}

/// Edge-side startup.
pub struct AgentBootstrap {
    config: AgentConfig,
    runtime: Arc<dyn AgentRuntime>,
    hook: Box<dyn TunnelHook>,
    phase: watch::Sender<Phase>,
}

impl AgentBootstrap {
    pub fn new(config: AgentConfig, runtime: Arc<dyn AgentRuntime>) -> Self {
        let hook = config.hook_provider.build();
        let (phase, _) = watch::channel(Phase::Idle);
        Self {
            config,
            runtime,
            hook,
            phase,
        }
    }

    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    fn enter(&self, phase: Phase) {
        tracing::info!(phase = ?phase, "Agent phase changed");
        self.phase.send_replace(phase);
    }

    async fn cluster_access(&self) -> Result<ClusterAccess, DiscoveryError> {
        match (&self.config.kube_config, &self.config.apiserver_address) {
            (Some(path), _) => ClusterAccess::from_kubeconfig(path).await,
            (None, Some(address)) => {
                ClusterAccess::from_apiserver(address, &self.config.pki.ca_file, Path::new(AGENT_TOKEN_FILE))
            }
            (None, None) => ClusterAccess::infer().await,
        }
    }

    /// Connect to the cluster, resolve the server address and run.
    pub async fn run(&self, shutdown: &Shutdown) -> Result<(), StartupError> {
        let identifiers = AgentIdentifiers::parse(&self.config.agent_identifiers)?;
        let pod_ip = pod_ip_from_env()?;

        tracing::info!(hook = self.hook.name(), "Running before-start hook");
        self.hook.before_start(&self.config).await?;

        let access = self.cluster_access().await?;
        let roots = access.root_pool(&self.config.pki.ca_file)?;

        let server_address = match &self.config.tunnel_server_address {
            Some(address) => address.clone(),
            None => {
                let discovery = ServiceDiscovery::new(access.client());
                match discovery.tunnel_server_address_until(&shutdown.token()).await {
                    Some(address) => address,
                    None => {
                        self.enter(Phase::Draining);
                        return Ok(());
                    }
                }
            }
        };
        tracing::info!(address = %server_address, "Resolved tunnel server address");

        let request = CertificateRequest::edge_identity(
            AGENT_COMPONENT,
            &self.config.pki.cert_dir,
            &self.config.cluster_name,
            pod_ip,
        );
        let backend: Arc<dyn SigningBackend> = Arc::new(KubeSigner::new(access.client()));
        self.run_with(backend, request, server_address, identifiers, roots, shutdown)
            .await
    }

    /// Run against an explicit signing backend, identity and server address.
    pub async fn run_with(
        &self,
        backend: Arc<dyn SigningBackend>,
        request: CertificateRequest,
        server_address: String,
        identifiers: AgentIdentifiers,
        roots: RootPool,
        shutdown: &Shutdown,
    ) -> Result<(), StartupError> {
        let stop = shutdown.token();
        let manager = pki::bootstrap(request, backend, manager_options(&self.config.pki))?;
        self.enter(Phase::CertPending);

        let tls = client_config(Arc::new(manager.clone()), &roots)?;
        let poll = Duration::from_secs(self.config.pki.poll_interval_secs);
        if !pki::wait_until_signed(&manager, poll, &stop).await.is_signed() {
            tracing::info!("Stopped before the agent certificate was signed");
            self.enter(Phase::Draining);
            return Ok(());
        }

        let session = AgentSession {
            server_address,
            identifiers,
            tls,
        };
        let runtime = self.runtime.clone();
        let agent_stop = stop.clone();
        let agent = tokio::spawn(async move { runtime.run(session, agent_stop).await });
        self.enter(Phase::Listening);

        self.hook.after_start(&self.config).await?;

        shutdown.wait().await;
        self.enter(Phase::Draining);
        if let Err(e) = agent.await {
            tracing::warn!(error = %e, "Agent runtime task ended abnormally");
        }
        Ok(())
    }
}
