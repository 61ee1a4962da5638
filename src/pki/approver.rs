//! Auto-approval of tunnel certificate signing requests.
//!
//! # Responsibilities
//! - Decide whether a pending request matches the cloud or edge template
//! - Periodically observe pending requests and approve the matching ones
//! - Leave everything else untouched for humans or other automation
//!
//! # Design Decisions
//! - The policy never denies; non-matching requests are ignored
//! - Approval failures are logged and retried on the next observation
//! - A request is queued at most once while a worker holds it

use dashmap::DashSet;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::prelude::FromDer;

use super::signer::{PendingCsr, SigningBackend};
use super::{PkiError, CLOUD_COMMON_NAME, MASTERS_ORG, PRODUCT_ORG};
use crate::observability::metrics;

/// Key usages a tunnel certificate may request.
pub const ALLOWED_USAGES: [&str; 5] = [
    "any",
    "digital signature",
    "key encipherment",
    "server auth",
    "client auth",
];

/// Subject and usages extracted from a pending request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrSubject {
    pub common_name: String,
    pub organizations: Vec<String>,
    pub usages: Vec<String>,
}

impl CsrSubject {
    /// Parse a PEM-encoded PKCS#10 request.
    pub fn from_pem(pem: &[u8], usages: Vec<String>) -> Result<Self, PkiError> {
        let (_, pem) = x509_parser::pem::parse_x509_pem(pem)
            .map_err(|e| PkiError::parse("certificate signing request", e))?;
        let (_, csr) = X509CertificationRequest::from_der(&pem.contents)
            .map_err(|e| PkiError::parse("certificate signing request", e))?;

        let subject = &csr.certification_request_info.subject;
        let common_name = subject
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or("")
            .to_string();
        let organizations = subject
            .iter_organization()
            .filter_map(|org| org.as_str().ok())
            .map(str::to_string)
            .collect();

        Ok(Self {
            common_name,
            organizations,
            usages,
        })
    }
}

/// Outcome of evaluating one pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    /// Matches a tunnel template; approve it.
    Approve,
    /// Unparsable request. Reported only, never submitted as a denial.
    Deny,
    /// Not ours; leave it alone.
    Ignore,
}

impl ApprovalDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalDecision::Approve => "approve",
            ApprovalDecision::Deny => "deny",
            ApprovalDecision::Ignore => "ignore",
        }
    }
}

/// Static table of the two identities this system issues.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApprovalPolicy;

impl ApprovalPolicy {
    /// Decide on an already parsed subject.
    pub fn decide(&self, subject: &CsrSubject) -> ApprovalDecision {
        let orgs: BTreeSet<&str> = subject.organizations.iter().map(String::as_str).collect();

        let cloud = subject.common_name == CLOUD_COMMON_NAME
            && orgs == BTreeSet::from([MASTERS_ORG, PRODUCT_ORG]);
        let edge = !subject.common_name.is_empty() && orgs == BTreeSet::from([PRODUCT_ORG]);
        let usages_ok = subject
            .usages
            .iter()
            .all(|usage| ALLOWED_USAGES.contains(&usage.as_str()));

        if (cloud || edge) && usages_ok {
            ApprovalDecision::Approve
        } else {
            ApprovalDecision::Ignore
        }
    }

    /// Parse and decide on a pending request.
    pub fn evaluate(&self, csr: &PendingCsr) -> ApprovalDecision {
        match CsrSubject::from_pem(&csr.csr_pem, csr.usages.clone()) {
            Ok(subject) => self.decide(&subject),
            Err(_) => ApprovalDecision::Deny,
        }
    }
}

/// Watches pending requests and approves the ones matching the policy.
pub struct CsrApprover {
    backend: Arc<dyn SigningBackend>,
    policy: ApprovalPolicy,
    resync: Duration,
    queued: DashSet<String>,
    settled: DashSet<String>,
}

impl CsrApprover {
    pub fn new(backend: Arc<dyn SigningBackend>, resync: Duration) -> Self {
        Self {
            backend,
            policy: ApprovalPolicy,
            resync,
            queued: DashSet::new(),
            settled: DashSet::new(),
        }
    }

    /// Run the observer and `threadiness` workers until `cancel` fires.
    pub async fn run(self: Arc<Self>, threadiness: usize, cancel: CancellationToken) {
        let (tx, rx) = mpsc::channel::<PendingCsr>(256);
        let rx = Arc::new(Mutex::new(rx));

        tracing::info!(threadiness, resync_secs = self.resync.as_secs(), "Starting CSR approver");

        let mut workers = Vec::with_capacity(threadiness);
        for worker in 0..threadiness.max(1) {
            let approver = self.clone();
            let rx = rx.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let next = { rx.lock().await.recv().await };
                    let Some(csr) = next else { break };
                    approver.process(worker, csr).await;
                }
            }));
        }

        loop {
            self.observe(&tx).await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.resync) => {}
            }
        }

        drop(tx);
        for worker in workers {
            let _ = worker.await;
        }
        tracing::info!("CSR approver stopped");
    }

    /// List pending requests once and enqueue the ones not already held.
    async fn observe(&self, tx: &mpsc::Sender<PendingCsr>) {
        let pending = match self.backend.list_pending().await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list pending certificate requests");
                return;
            }
        };

        let names: BTreeSet<&str> = pending.iter().map(|csr| csr.name.as_str()).collect();
        self.settled.retain(|name| names.contains(name.as_str()));

        for csr in pending {
            if self.settled.contains(&csr.name) || !self.queued.insert(csr.name.clone()) {
                continue;
            }
            if tx.send(csr).await.is_err() {
                break;
            }
        }
    }

    async fn process(&self, worker: usize, csr: PendingCsr) {
        let decision = self.policy.evaluate(&csr);
        match decision {
            ApprovalDecision::Approve => {
                match self
                    .backend
                    .approve(&csr.name, "Auto approving tunnel certificate")
                    .await
                {
                    Ok(()) => {
                        tracing::info!(worker, csr = %csr.name, "Approved certificate request");
                        metrics::record_csr_decision("approved");
                    }
                    Err(e) => {
                        tracing::warn!(worker, csr = %csr.name, error = %e, "Failed to approve certificate request, will retry");
                        metrics::record_csr_decision("error");
                    }
                }
            }
            ApprovalDecision::Ignore => {
                tracing::debug!(worker, csr = %csr.name, "Ignoring certificate request outside tunnel templates");
                self.settled.insert(csr.name.clone());
                metrics::record_csr_decision("ignored");
            }
            ApprovalDecision::Deny => {
                tracing::warn!(worker, csr = %csr.name, "Certificate request could not be parsed, leaving it untouched");
                self.settled.insert(csr.name.clone());
                metrics::record_csr_decision("unparsable");
            }
        }
        self.queued.remove(&csr.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(cn: &str, orgs: &[&str], usages: &[&str]) -> CsrSubject {
        CsrSubject {
            common_name: cn.to_string(),
            organizations: orgs.iter().map(|s| s.to_string()).collect(),
            usages: usages.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn approves_cloud_template() {
        let s = subject(CLOUD_COMMON_NAME, &[PRODUCT_ORG, MASTERS_ORG], &["any"]);
        assert_eq!(ApprovalPolicy.decide(&s), ApprovalDecision::Approve);
    }

    #[test]
    fn approves_edge_template() {
        let s = subject("edge-1", &[PRODUCT_ORG], &["digital signature", "client auth"]);
        assert_eq!(ApprovalPolicy.decide(&s), ApprovalDecision::Approve);
    }

    #[test]
    fn ignores_other_subjects() {
        // masters role without the product org
        let s = subject(CLOUD_COMMON_NAME, &[MASTERS_ORG], &["any"]);
        assert_eq!(ApprovalPolicy.decide(&s), ApprovalDecision::Ignore);

        // product org on a node identity plus an extra org
        let s = subject("system:node:n1", &[PRODUCT_ORG, "system:nodes"], &["any"]);
        assert_eq!(ApprovalPolicy.decide(&s), ApprovalDecision::Ignore);

        // empty common name
        let s = subject("", &[PRODUCT_ORG], &["any"]);
        assert_eq!(ApprovalPolicy.decide(&s), ApprovalDecision::Ignore);
    }

    #[test]
    fn ignores_unexpected_usages() {
        let s = subject("edge-1", &[PRODUCT_ORG], &["client auth", "code signing"]);
        assert_eq!(ApprovalPolicy.decide(&s), ApprovalDecision::Ignore);
    }

    #[test]
    fn unparsable_request_is_deny_not_ignore() {
        let csr = PendingCsr {
            name: "bad".into(),
            csr_pem: b"not a csr".to_vec(),
            usages: vec![],
        };
        assert_eq!(ApprovalPolicy.evaluate(&csr), ApprovalDecision::Deny);
    }
}
