//! Certificate bootstrap subsystem.
//!
//! # Responsibilities
//! - Describe the identity a component needs (`request`)
//! - Persist issued material per component (`store`)
//! - Submit, poll and approve signing requests through a backend (`signer`)
//! - Keep a current certificate and renew it in the background (`manager`)
//! - Block dependent startup until a certificate exists (`wait`)
//! - Auto-approve requests matching the two known templates (`approver`)
//!
//! # Data Flow
//! ```text
//! CertificateRequest ──▶ bootstrap() ──▶ CertManager ──spawn──▶ renewal loop
//!                                            │                      │
//!                                            │ current()            │ submit / status
//!                                            ▼                      ▼
//!                                   wait_until_signed()       SigningBackend
//!                                            │                      ▲
//!                                            ▼                      │ list_pending / approve
//!                                     TLS configs                CsrApprover
//! ```

pub mod approver;
pub mod info;
pub mod kube_signer;
pub mod local_signer;
pub mod manager;
pub mod request;
pub mod signer;
pub mod store;
pub mod wait;

use std::path::PathBuf;
use thiserror::Error;

pub use approver::{ApprovalDecision, ApprovalPolicy, CsrApprover, CsrSubject};
pub use info::CertificateInfo;
pub use kube_signer::KubeSigner;
pub use local_signer::LocalSigner;
pub use manager::{bootstrap, CertManager, CertificateState, ManagerOptions};
pub use request::{CertificateRequest, SubjectAltNames};
pub use signer::{PendingCsr, SignerError, SigningBackend, SigningRequest, SigningStatus};
pub use store::{CertificateStore, StoredIdentity};
pub use wait::{wait_until_signed, WaitOutcome};

/// Shared product organization carried by every tunnel identity.
pub const PRODUCT_ORG: &str = "openyurt:yurttunnel";

/// Role organization granting the cloud identity API server access.
pub const MASTERS_ORG: &str = "system:masters";

/// Common name of the cloud identity.
pub const CLOUD_COMMON_NAME: &str = "kube-apiserver-kubelet-client";

/// Environment variable holding the edge pod IP.
pub const POD_IP_ENV: &str = "POD_IP";

/// Errors raised while bootstrapping or renewing a certificate.
#[derive(Debug, Error)]
pub enum PkiError {
    /// Certificate store could not be created, read or written.
    #[error("certificate store error at {path}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Key or CSR generation failed.
    #[error("failed to generate {what}: {message}")]
    Generation { what: &'static str, message: String },

    /// Certificate material could not be parsed.
    #[error("failed to parse {what}: {message}")]
    Parse { what: &'static str, message: String },

    /// A required environment value is missing or invalid.
    #[error("environment variable {name} {problem}")]
    Environment { name: &'static str, problem: String },

    /// The signing backend denied the request.
    #[error("signing request {name} was denied: {reason}")]
    Denied { name: String, reason: String },

    /// The signing backend failed to issue the request.
    #[error("signing request {name} failed: {reason}")]
    IssueFailed { name: String, reason: String },

    /// The issued leaf does not carry the key that was generated for it.
    #[error("issued certificate for {name} does not match the requested key")]
    KeyMismatch { name: String },

    /// Backend call failed.
    #[error(transparent)]
    Signer(#[from] SignerError),
}

impl PkiError {
    pub(crate) fn generation(what: &'static str, err: impl std::fmt::Display) -> Self {
        PkiError::Generation {
            what,
            message: err.to_string(),
        }
    }

    pub(crate) fn parse(what: &'static str, err: impl std::fmt::Display) -> Self {
        PkiError::Parse {
            what,
            message: err.to_string(),
        }
    }
}
