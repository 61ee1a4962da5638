//! In-process signing backend.
//!
//! Holds a self-signed CA and keeps submitted requests in memory. Requests
//! are issued when approved, so the full submit → approve → issue loop runs
//! without a cluster.

use async_trait::async_trait;
use dashmap::DashMap;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CertificateSigningRequestParams,
    DistinguishedName, DnType, DnValue, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use rustls::pki_types::CertificateDer;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::approver::CsrSubject;
use super::request::subject_name;
use super::signer::{PendingCsr, SignerError, SigningBackend, SigningRequest, SigningStatus};
use super::PkiError;

/// Validity period for certificates issued by the local CA.
pub const DEFAULT_LEAF_VALIDITY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

struct Entry {
    request: SigningRequest,
    status: SigningStatus,
}

/// Self-signed CA answering the [`SigningBackend`] operations.
pub struct LocalSigner {
    ca_cert: Certificate,
    ca_key: KeyPair,
    requests: DashMap<String, Entry>,
    counter: AtomicU64,
    leaf_validity: Duration,
}

impl LocalSigner {
    /// Create a new CA with the given common name.
    pub fn new(common_name: &str) -> Result<Self, PkiError> {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let now = time::OffsetDateTime::now_utc();
        params.not_before = now - time::Duration::minutes(5);
        params.not_after = now + time::Duration::days(3650);

        let ca_key = KeyPair::generate().map_err(|e| PkiError::generation("CA key", e))?;
        let ca_cert = params
            .self_signed(&ca_key)
            .map_err(|e| PkiError::generation("CA certificate", e))?;

        Ok(Self {
            ca_cert,
            ca_key,
            requests: DashMap::new(),
            counter: AtomicU64::new(0),
            leaf_validity: DEFAULT_LEAF_VALIDITY,
        })
    }

    /// Override the validity of issued leaves.
    pub fn with_leaf_validity(mut self, validity: Duration) -> Self {
        self.leaf_validity = validity;
        self
    }

    /// CA certificate in PEM format.
    pub fn ca_pem(&self) -> String {
        self.ca_cert.pem()
    }

    /// CA certificate in DER format, for building a root pool.
    pub fn ca_der(&self) -> CertificateDer<'static> {
        self.ca_cert.der().clone()
    }

    /// Deny a pending request.
    pub fn deny(&self, name: &str, reason: &str) -> Result<(), SignerError> {
        let mut entry = self
            .requests
            .get_mut(name)
            .ok_or_else(|| SignerError::NotFound(name.to_string()))?;
        entry.status = SigningStatus::Denied(reason.to_string());
        Ok(())
    }

    /// Number of requests submitted so far.
    pub fn submitted(&self) -> usize {
        self.requests.len()
    }

    fn issue(&self, request: &SigningRequest) -> Result<String, PkiError> {
        let subject = CsrSubject::from_pem(request.csr_pem.as_bytes(), request.usages.clone())?;
        let mut csr = CertificateSigningRequestParams::from_pem(&request.csr_pem)
            .map_err(|e| PkiError::parse("certificate signing request", e))?;

        // The CSR parser keeps one value per attribute type; rebuild the
        // subject from the full parse.
        csr.params.distinguished_name = subject_name(&subject.common_name, &subject.organizations)?;
        csr.params.is_ca = IsCa::NoCa;
        csr.params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        csr.params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        let now = time::OffsetDateTime::now_utc();
        csr.params.not_before = now - time::Duration::minutes(1);
        csr.params.not_after = now + self.leaf_validity;

        let cert = csr
            .signed_by(&self.ca_cert, &self.ca_key)
            .map_err(|e| PkiError::generation("certificate", e))?;
        Ok(cert.pem())
    }
}

#[async_trait]
impl SigningBackend for LocalSigner {
    async fn submit(&self, request: SigningRequest) -> Result<String, SignerError> {
        // Reject unparsable requests up front, as an API server would.
        CsrSubject::from_pem(request.csr_pem.as_bytes(), Vec::new())
            .map_err(|e| SignerError::Rejected(e.to_string()))?;

        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-csr-{}", request.component, id);
        self.requests.insert(
            name.clone(),
            Entry {
                request,
                status: SigningStatus::Pending,
            },
        );
        Ok(name)
    }

    async fn status(&self, name: &str) -> Result<SigningStatus, SignerError> {
        self.requests
            .get(name)
            .map(|entry| entry.status.clone())
            .ok_or_else(|| SignerError::NotFound(name.to_string()))
    }

    async fn list_pending(&self) -> Result<Vec<PendingCsr>, SignerError> {
        Ok(self
            .requests
            .iter()
            .filter(|entry| entry.status == SigningStatus::Pending)
            .map(|entry| PendingCsr {
                name: entry.key().clone(),
                csr_pem: entry.request.csr_pem.clone().into_bytes(),
                usages: entry.request.usages.clone(),
            })
            .collect())
    }

    async fn approve(&self, name: &str, _message: &str) -> Result<(), SignerError> {
        let mut entry = self
            .requests
            .get_mut(name)
            .ok_or_else(|| SignerError::NotFound(name.to_string()))?;
        if entry.status != SigningStatus::Pending {
            return Ok(());
        }
        entry.status = match self.issue(&entry.request) {
            Ok(pem) => SigningStatus::Issued(pem),
            Err(e) => SigningStatus::Failed(e.to_string()),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::info::CertificateInfo;
    use crate::pki::request::CertificateRequest;
    use crate::pki::signer::ANY_USAGE;
    use std::path::Path;

    fn edge_request() -> (SigningRequest, KeyPair) {
        let req = CertificateRequest::edge_identity(
            "tunnel-agent",
            Path::new("/tmp"),
            "edge-1",
            "10.0.0.9".parse().unwrap(),
        );
        let key = KeyPair::generate().unwrap();
        let csr = req.csr_params().unwrap().serialize_request(&key).unwrap();
        (
            SigningRequest {
                component: "tunnel-agent".into(),
                csr_pem: csr.pem().unwrap(),
                signer_name: "test".into(),
                usages: vec![ANY_USAGE.into()],
            },
            key,
        )
    }

    #[tokio::test]
    async fn issues_after_approval() {
        let signer = LocalSigner::new("test-ca").unwrap();
        let (request, key) = edge_request();
        let name = signer.submit(request).await.unwrap();

        assert_eq!(signer.status(&name).await.unwrap(), SigningStatus::Pending);
        assert_eq!(signer.list_pending().await.unwrap().len(), 1);

        signer.approve(&name, "ok").await.unwrap();
        let pem = match signer.status(&name).await.unwrap() {
            SigningStatus::Issued(pem) => pem,
            other => panic!("expected issued, got {:?}", other),
        };
        let der = rustls_pemfile::certs(&mut pem.as_bytes()).next().unwrap().unwrap();
        let info = CertificateInfo::from_der(&der).unwrap();
        assert_eq!(info.common_name, "edge-1");
        assert_eq!(info.public_key, key.public_key_der());
        assert!(signer.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn denied_requests_stay_denied() {
        let signer = LocalSigner::new("test-ca").unwrap();
        let (request, _) = edge_request();
        let name = signer.submit(request).await.unwrap();
        signer.deny(&name, "not allowed").unwrap();
        signer.approve(&name, "late").await.unwrap();
        assert_eq!(
            signer.status(&name).await.unwrap(),
            SigningStatus::Denied("not allowed".into())
        );
    }

    #[tokio::test]
    async fn unknown_request_is_not_found() {
        let signer = LocalSigner::new("test-ca").unwrap();
        assert!(matches!(signer.status("nope").await, Err(SignerError::NotFound(_))));
    }

    #[tokio::test]
    async fn garbage_csr_is_rejected() {
        let signer = LocalSigner::new("test-ca").unwrap();
        let result = signer
            .submit(SigningRequest {
                component: "x".into(),
                csr_pem: "garbage".into(),
                signer_name: "test".into(),
                usages: vec![],
            })
            .await;
        assert!(matches!(result, Err(SignerError::Rejected(_))));
    }
}
