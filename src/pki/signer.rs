//! Signing backend interface.
//!
//! The cluster's certificate API (or an in-process CA) behind four
//! operations: submit a request, poll its status, list pending requests,
//! approve one.

use async_trait::async_trait;
use thiserror::Error;

/// Key usage requested for every tunnel certificate.
pub const ANY_USAGE: &str = "any";

/// Errors returned by a signing backend.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("signing request {0} not found")]
    NotFound(String),

    #[error("signing request rejected by backend: {0}")]
    Rejected(String),

    #[error("signing backend error: {0}")]
    Backend(String),

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

/// A certificate signing request ready for submission.
#[derive(Debug, Clone)]
pub struct SigningRequest {
    /// Component the request is issued for; used to name the request.
    pub component: String,
    /// PEM-encoded PKCS#10 request.
    pub csr_pem: String,
    /// Signer expected to issue the certificate.
    pub signer_name: String,
    /// Requested key usages.
    pub usages: Vec<String>,
}

/// Current state of a submitted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningStatus {
    /// Not yet approved, or approved but not yet issued.
    Pending,
    /// Issued; PEM-encoded certificate chain, leaf first.
    Issued(String),
    /// Denied by an approver.
    Denied(String),
    /// The signer gave up on the request.
    Failed(String),
}

/// A request awaiting an approval decision.
#[derive(Debug, Clone)]
pub struct PendingCsr {
    pub name: String,
    pub csr_pem: Vec<u8>,
    pub usages: Vec<String>,
}

#[async_trait]
pub trait SigningBackend: Send + Sync {
    /// Submit a request, returning the name it is tracked under.
    async fn submit(&self, request: SigningRequest) -> Result<String, SignerError>;

    /// Poll the status of a submitted request.
    async fn status(&self, name: &str) -> Result<SigningStatus, SignerError>;

    /// Requests with no approval decision yet.
    async fn list_pending(&self) -> Result<Vec<PendingCsr>, SignerError>;

    /// Mark a request approved.
    async fn approve(&self, name: &str, message: &str) -> Result<(), SignerError>;
}
