//! TLS configuration built on a live certificate source.
//!
//! # Responsibilities
//! - Load the root trust pool (CA file or kubeconfig CA data)
//! - Build per-listener server configs and the agent's client config
//! - Resolve the serving certificate on every handshake
//!
//! # Design Decisions
//! - Configs hold a resolver, never a certificate snapshot, so rotation is
//!   seen by listeners that are already running
//! - Master- and agent-facing listeners require a verified client
//!   certificate; the reverse proxy asks for one but accepts anonymous peers
//! - The ring provider is used explicitly for every config

use arc_swap::ArcSwapOption;
use rustls::client::ResolvesClientCert;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::CertificateDer;
use rustls::server::{ClientHello, ResolvesServerCert, WebPkiClientVerifier};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, RootCertStore, ServerConfig, SignatureScheme};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Idle period after which an agent connection is pinged.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Time to wait for a ping acknowledgment before dropping the connection.
pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised while assembling TLS material.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid PEM data: {0}")]
    Pem(String),

    #[error("no usable CA certificates found")]
    EmptyRootPool,

    #[error("failed to build client verifier: {0}")]
    Verifier(String),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

/// Pull-based accessor for the current leaf certificate.
pub trait CertificateSource: Send + Sync {
    fn current(&self) -> Option<Arc<CertifiedKey>>;
}

impl<T: CertificateSource + ?Sized> CertificateSource for Arc<T> {
    fn current(&self) -> Option<Arc<CertifiedKey>> {
        (**self).current()
    }
}

/// Single-writer, many-reader certificate slot.
#[derive(Default)]
pub struct SharedCertificate {
    slot: ArcSwapOption<CertifiedKey>,
}

impl SharedCertificate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current certificate.
    pub fn set(&self, key: Arc<CertifiedKey>) {
        self.slot.store(Some(key));
    }
}

impl CertificateSource for SharedCertificate {
    fn current(&self) -> Option<Arc<CertifiedKey>> {
        self.slot.load_full()
    }
}

/// Trusted CA certificates used to verify peers.
#[derive(Clone)]
pub struct RootPool {
    roots: Arc<RootCertStore>,
}

impl RootPool {
    /// Load every certificate in a PEM file.
    pub fn from_pem_file(path: &Path) -> Result<Self, TlsError> {
        let pem = std::fs::read(path).map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_pem(&pem)
    }

    /// Load every certificate in a PEM buffer.
    pub fn from_pem(pem: &[u8]) -> Result<Self, TlsError> {
        let certs = rustls_pemfile::certs(&mut &pem[..])
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TlsError::Pem(e.to_string()))?;
        Self::from_der(certs)
    }

    /// Build a pool from DER certificates.
    pub fn from_der(
        certs: impl IntoIterator<Item = CertificateDer<'static>>,
    ) -> Result<Self, TlsError> {
        let mut store = RootCertStore::empty();
        let (added, ignored) = store.add_parsable_certificates(certs);
        if ignored > 0 {
            tracing::warn!(ignored, "Skipped unparsable CA certificates");
        }
        if added == 0 {
            return Err(TlsError::EmptyRootPool);
        }
        Ok(Self {
            roots: Arc::new(store),
        })
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn store(&self) -> Arc<RootCertStore> {
        self.roots.clone()
    }
}

/// Which listener a server config is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerRole {
    MasterFacing,
    AgentFacing,
    ReverseProxy,
}

impl ListenerRole {
    /// Whether a verified client certificate is mandatory.
    pub fn requires_client_cert(&self) -> bool {
        !matches!(self, ListenerRole::ReverseProxy)
    }

    fn alpn_protocols(&self) -> Vec<Vec<u8>> {
        match self {
            ListenerRole::AgentFacing => vec![b"h2".to_vec()],
            ListenerRole::MasterFacing | ListenerRole::ReverseProxy => vec![b"http/1.1".to_vec()],
        }
    }
}

/// Resolves the source's current certificate for each handshake.
struct LiveCertResolver {
    source: Arc<dyn CertificateSource>,
}

impl fmt::Debug for LiveCertResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveCertResolver").finish_non_exhaustive()
    }
}

impl ResolvesServerCert for LiveCertResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.source.current()
    }
}

impl ResolvesClientCert for LiveCertResolver {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        self.source.current()
    }

    fn has_certs(&self) -> bool {
        self.source.current().is_some()
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Install ring as the process-wide default provider.
///
/// Crates that build their own rustls configs (HTTP clients, the
/// Kubernetes client) pick it up from here.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Server config for one listener role.
pub fn server_config(
    source: Arc<dyn CertificateSource>,
    roots: &RootPool,
    role: ListenerRole,
) -> Result<Arc<ServerConfig>, TlsError> {
    let provider = provider();
    let verifier = WebPkiClientVerifier::builder_with_provider(roots.store(), provider.clone());
    let verifier = if role.requires_client_cert() {
        verifier.build()
    } else {
        verifier.allow_unauthenticated().build()
    }
    .map_err(|e| TlsError::Verifier(e.to_string()))?;

    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_client_cert_verifier(verifier)
        .with_cert_resolver(Arc::new(LiveCertResolver { source }));
    config.alpn_protocols = role.alpn_protocols();

    Ok(Arc::new(config))
}

/// Client config for the edge agent dialing the agent-facing listener.
pub fn client_config(
    source: Arc<dyn CertificateSource>,
    roots: &RootPool,
) -> Result<Arc<ClientConfig>, TlsError> {
    let mut config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots.store())
        .with_client_cert_resolver(Arc::new(LiveCertResolver { source }));
    config.alpn_protocols = vec![b"h2".to_vec()];

    Ok(Arc::new(config))
}
