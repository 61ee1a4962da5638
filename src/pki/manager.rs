//! Certificate manager and background renewal.
//!
//! # States
//! ```text
//! Requested ──submit──▶ Pending ⇄ (poll) ──issued──▶ Signed
//!     ▲                    │
//!     │                    ├── denied ──▶ Denied
//!     └──── backoff ───────┴── store failure ──▶ StoreError
//! ```
//!
//! Denied and StoreError end the current request; the loop starts a fresh
//! one after a backoff. Once a certificate has been signed the state stays
//! Signed: renewals replace it in place and failed renewals keep serving
//! the previous certificate.

use rcgen::KeyPair;
use rustls::sign::CertifiedKey;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::info::CertificateInfo;
use super::request::CertificateRequest;
use super::signer::{SignerError, SigningBackend, SigningRequest, SigningStatus, ANY_USAGE};
use super::store::{CertificateStore, StoredIdentity};
use super::PkiError;
use crate::net::tls::{CertificateSource, SharedCertificate};
use crate::observability::metrics;
use crate::resilience::backoff::Backoff;

/// Lifecycle of the managed certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateState {
    /// A new request is being prepared.
    Requested,
    /// Submitted and waiting for the backend.
    Pending { request: String },
    /// A signed certificate is being served.
    Signed { not_after: i64 },
    /// The backend denied the last request.
    Denied { reason: String },
    /// The issued certificate could not be persisted.
    StoreError { message: String },
}

impl CertificateState {
    pub fn is_signed(&self) -> bool {
        matches!(self, CertificateState::Signed { .. })
    }
}

/// Tunables for a [`CertManager`].
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Signer name placed on submitted requests.
    pub signer_name: String,
    /// Interval between status polls of a submitted request.
    pub poll_interval: Duration,
    /// First retry delay after a failed rotation.
    pub retry_base: Duration,
    /// Upper bound on the retry delay.
    pub retry_max: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            signer_name: "kubernetes.io/legacy-unknown".to_string(),
            poll_interval: Duration::from_secs(5),
            retry_base: Duration::from_secs(1),
            retry_max: Duration::from_secs(300),
        }
    }
}

struct Inner {
    request: CertificateRequest,
    store: CertificateStore,
    backend: Arc<dyn SigningBackend>,
    options: ManagerOptions,
    current: SharedCertificate,
    leaf: std::sync::Mutex<Option<CertificateInfo>>,
    state: watch::Sender<CertificateState>,
}

/// Handle to a component's certificate.
///
/// Cheap to clone; all clones observe the same certificate.
#[derive(Clone)]
pub struct CertManager {
    inner: Arc<Inner>,
}

impl CertManager {
    /// Construct a manager, adopting a previously stored certificate if it
    /// has not expired and carries exactly the request's subject and SANs.
    ///
    /// A stored certificate that does not is left unused, so the renewal
    /// loop requests a replacement on its first iteration.
    pub fn new(
        request: CertificateRequest,
        store: CertificateStore,
        backend: Arc<dyn SigningBackend>,
        options: ManagerOptions,
    ) -> Result<Self, PkiError> {
        let (state, _) = watch::channel(CertificateState::Requested);
        let inner = Arc::new(Inner {
            request,
            store,
            backend,
            options,
            current: SharedCertificate::new(),
            leaf: std::sync::Mutex::new(None),
            state,
        });

        match inner.store.load() {
            Ok(Some(stored)) if inner.reusable(stored.info()) => {
                inner.install(&stored)?;
                tracing::info!(
                    component = %inner.request.component(),
                    path = %inner.store.current_path().display(),
                    "Loaded stored certificate"
                );
            }
            Ok(Some(_)) => {
                tracing::info!(
                    component = %inner.request.component(),
                    "Stored certificate is expired or does not match, requesting a new one"
                );
            }
            Ok(None) => {}
            Err(e @ PkiError::Store { .. }) => return Err(e),
            Err(e) => {
                tracing::warn!(
                    component = %inner.request.component(),
                    error = %e,
                    "Ignoring unreadable stored certificate"
                );
            }
        }

        Ok(Self { inner })
    }

    /// Spawn the renewal loop. It runs for the life of the process.
    pub fn start(&self) -> JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.renewal_loop().await })
    }

    /// The certificate currently being served, if any.
    pub fn current(&self) -> Option<Arc<CertifiedKey>> {
        self.inner.current.current()
    }

    /// Watch the certificate state.
    pub fn state(&self) -> watch::Receiver<CertificateState> {
        self.inner.state.subscribe()
    }

    pub fn request(&self) -> &CertificateRequest {
        &self.inner.request
    }
}

impl CertificateSource for CertManager {
    fn current(&self) -> Option<Arc<CertifiedKey>> {
        CertManager::current(self)
    }
}

/// Create the store, register the request template and start renewing.
///
/// Returns without waiting for a signed certificate; use
/// [`wait_until_signed`](super::wait::wait_until_signed) for that.
pub fn bootstrap(
    request: CertificateRequest,
    backend: Arc<dyn SigningBackend>,
    options: ManagerOptions,
) -> Result<CertManager, PkiError> {
    let store = CertificateStore::open(request.store_dir(), request.component())?;
    let manager = CertManager::new(request, store, backend, options)?;
    manager.start();
    Ok(manager)
}

impl Inner {
    fn reusable(&self, info: &CertificateInfo) -> bool {
        !info.is_expired() && self.request.is_satisfied_by(info)
    }

    fn install(&self, stored: &StoredIdentity) -> Result<(), PkiError> {
        let key = stored.certified_key()?;
        let info = stored.info().clone();
        self.current.set(key);
        self.state.send_replace(CertificateState::Signed {
            not_after: info.not_after,
        });
        if let Ok(mut leaf) = self.leaf.lock() {
            *leaf = Some(info);
        }
        Ok(())
    }

    /// Time until the next rotation is due.
    fn renewal_delay(&self) -> Duration {
        match self.leaf.lock() {
            Ok(leaf) => leaf.as_ref().map(CertificateInfo::renewal_delay).unwrap_or_default(),
            Err(_) => Duration::ZERO,
        }
    }

    fn record_failure(&self, err: &PkiError) {
        if self.state.borrow().is_signed() {
            return;
        }
        let state = match err {
            PkiError::Denied { reason, .. } => CertificateState::Denied {
                reason: reason.clone(),
            },
            PkiError::Store { .. } => CertificateState::StoreError {
                message: err.to_string(),
            },
            _ => CertificateState::Requested,
        };
        self.state.send_replace(state);
    }

    async fn renewal_loop(self: Arc<Self>) {
        let component = self.request.component().to_string();
        let mut backoff = Backoff::new(self.options.retry_base, self.options.retry_max);

        loop {
            let delay = self.renewal_delay();
            if !delay.is_zero() {
                tracing::debug!(component = %component, delay_secs = delay.as_secs(), "Next certificate rotation scheduled");
                tokio::time::sleep(delay).await;
            }

            match self.rotate().await {
                Ok(info) => {
                    backoff.reset();
                    metrics::record_certificate_rotation(&component);
                    tracing::info!(
                        component = %component,
                        common_name = %info.common_name,
                        not_after = info.not_after,
                        "Certificate rotated"
                    );
                }
                Err(e) => {
                    self.record_failure(&e);
                    let wait = backoff.next_delay();
                    tracing::warn!(
                        component = %component,
                        error = %e,
                        retry_in_ms = wait.as_millis() as u64,
                        "Certificate rotation failed"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Request, await, persist and install one new certificate.
    async fn rotate(&self) -> Result<CertificateInfo, PkiError> {
        if !self.state.borrow().is_signed() {
            self.state.send_replace(CertificateState::Requested);
        }

        let key = KeyPair::generate().map_err(|e| PkiError::generation("private key", e))?;
        let csr = self
            .request
            .csr_params()?
            .serialize_request(&key)
            .map_err(|e| PkiError::generation("certificate signing request", e))?;
        let csr_pem = csr
            .pem()
            .map_err(|e| PkiError::generation("certificate signing request", e))?;

        let name = self
            .backend
            .submit(SigningRequest {
                component: self.request.component().to_string(),
                csr_pem,
                signer_name: self.options.signer_name.clone(),
                usages: vec![ANY_USAGE.to_string()],
            })
            .await?;
        tracing::info!(component = %self.request.component(), csr = %name, "Submitted certificate signing request");
        if !self.state.borrow().is_signed() {
            self.state.send_replace(CertificateState::Pending {
                request: name.clone(),
            });
        }

        let chain_pem = self.await_issued(&name).await?;

        let key_pem = key.serialize_pem();
        let bundle = format!("{}\n{}", chain_pem.trim_end(), key_pem);
        let stored = StoredIdentity::from_pem(bundle.as_bytes())?;
        if stored.info().public_key != key.public_key_der() {
            return Err(PkiError::KeyMismatch { name });
        }

        self.store.save(&chain_pem, &key_pem)?;
        self.install(&stored)?;
        Ok(stored.info().clone())
    }

    /// Poll the backend until the request is issued or rejected.
    async fn await_issued(&self, name: &str) -> Result<String, PkiError> {
        let mut ticker = tokio::time::interval(self.options.poll_interval);
        loop {
            ticker.tick().await;
            match self.backend.status(name).await {
                Ok(SigningStatus::Pending) => {
                    tracing::debug!(csr = %name, "Certificate signing request still pending");
                }
                Ok(SigningStatus::Issued(pem)) => return Ok(pem),
                Ok(SigningStatus::Denied(reason)) => {
                    return Err(PkiError::Denied {
                        name: name.to_string(),
                        reason,
                    })
                }
                Ok(SigningStatus::Failed(reason)) => {
                    return Err(PkiError::IssueFailed {
                        name: name.to_string(),
                        reason,
                    })
                }
                Err(e @ SignerError::NotFound(_)) => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(csr = %name, error = %e, "Failed to poll certificate signing request");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::local_signer::LocalSigner;
    use std::path::Path;

    fn options() -> ManagerOptions {
        ManagerOptions {
            signer_name: "test".into(),
            poll_interval: Duration::from_millis(10),
            retry_base: Duration::from_millis(10),
            retry_max: Duration::from_millis(50),
        }
    }

    fn edge_request(dir: &Path) -> CertificateRequest {
        CertificateRequest::edge_identity("tunnel-agent", dir, "edge-1", "10.0.0.9".parse().unwrap())
    }

    async fn approve_all(signer: &LocalSigner) {
        for csr in signer.list_pending().await.unwrap() {
            signer.approve(&csr.name, "test").await.unwrap();
        }
    }

    #[tokio::test]
    async fn signs_persists_and_reloads() {
        let tmp = tempfile::tempdir().unwrap();
        let signer = Arc::new(LocalSigner::new("test-ca").unwrap());
        let manager = bootstrap(edge_request(tmp.path()), signer.clone(), options()).unwrap();
        assert!(manager.current().is_none());

        let mut state = manager.state();
        loop {
            approve_all(&signer).await;
            if manager.current().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        state.wait_for(CertificateState::is_signed).await.unwrap();

        let store = CertificateStore::open(tmp.path(), "tunnel-agent").unwrap();
        let stored = store.load().unwrap().unwrap();
        assert_eq!(stored.info().common_name, "edge-1");

        // A second manager adopts the stored certificate without a new request.
        let before = signer.submitted();
        let reloaded = CertManager::new(edge_request(tmp.path()), store, signer.clone(), options()).unwrap();
        assert!(reloaded.current().is_some());
        assert!(reloaded.state().borrow().is_signed());
        assert_eq!(signer.submitted(), before);
    }

    #[tokio::test]
    async fn denial_is_recorded_and_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let signer = Arc::new(LocalSigner::new("test-ca").unwrap());
        let manager = bootstrap(edge_request(tmp.path()), signer.clone(), options()).unwrap();

        let mut state = manager.state();
        loop {
            if let Some(csr) = signer.list_pending().await.unwrap().first() {
                signer.deny(&csr.name, "policy").unwrap();
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        state
            .wait_for(|s| matches!(s, CertificateState::Denied { .. }))
            .await
            .unwrap();
        assert!(manager.current().is_none());

        // The loop submits a fresh request after backing off.
        loop {
            if signer.submitted() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn cloud_request(dir: &Path, extra_dns: &str) -> CertificateRequest {
        CertificateRequest::cloud_identity(
            "tunnel-server",
            dir,
            crate::pki::SubjectAltNames {
                dns_names: vec!["x-tunnel-server-svc".into()],
                ip_addresses: vec!["10.96.0.10".parse().unwrap()],
            },
            &[extra_dns.to_string()],
            &[],
        )
    }

    fn store_self_signed(store: &CertificateStore, request: &CertificateRequest) {
        let key = KeyPair::generate().unwrap();
        let cert = request.csr_params().unwrap().self_signed(&key).unwrap();
        store.save(&cert.pem(), &key.serialize_pem()).unwrap();
    }

    #[tokio::test]
    async fn stored_certificate_with_same_template_is_reused() {
        let tmp = tempfile::tempdir().unwrap();
        let signer = Arc::new(LocalSigner::new("test-ca").unwrap());
        let store = CertificateStore::open(tmp.path(), "tunnel-server").unwrap();
        store_self_signed(&store, &cloud_request(tmp.path(), "tunnel.example"));

        let manager = CertManager::new(cloud_request(tmp.path(), "tunnel.example"), store, signer.clone(), options()).unwrap();
        assert!(manager.current().is_some());
        assert!(manager.state().borrow().is_signed());
        assert_eq!(signer.submitted(), 0);
    }

    #[tokio::test]
    async fn stored_certificate_with_stale_sans_is_replaced() {
        let tmp = tempfile::tempdir().unwrap();
        let signer = Arc::new(LocalSigner::new("test-ca").unwrap());
        let store = CertificateStore::open(tmp.path(), "tunnel-server").unwrap();
        store_self_signed(&store, &cloud_request(tmp.path(), "old.example"));

        let manager = CertManager::new(cloud_request(tmp.path(), "new.example"), store, signer.clone(), options()).unwrap();
        assert!(manager.current().is_none());
        assert_eq!(*manager.state().borrow(), CertificateState::Requested);

        manager.start();
        while manager.current().is_none() {
            approve_all(&signer).await;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(signer.submitted(), 1);

        let info = CertificateInfo::from_der(&manager.current().unwrap().cert[0]).unwrap();
        assert!(info.dns_names.contains(&"new.example".to_string()));
        assert!(!info.dns_names.contains(&"old.example".to_string()));
    }

    #[tokio::test]
    async fn stored_certificate_for_other_identity_is_not_reused() {
        let tmp = tempfile::tempdir().unwrap();
        let signer = Arc::new(LocalSigner::new("test-ca").unwrap());
        let store = CertificateStore::open(tmp.path(), "tunnel-agent").unwrap();

        let params = rcgen::CertificateParams::new(vec!["other".to_string()]).unwrap();
        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        store.save(&cert.pem(), &key.serialize_pem()).unwrap();

        let manager = CertManager::new(edge_request(tmp.path()), store, signer, options()).unwrap();
        assert!(manager.current().is_none());
        assert_eq!(*manager.state().borrow(), CertificateState::Requested);
    }
}
