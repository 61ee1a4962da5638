//! Kubernetes `certificates.k8s.io/v1` signing backend.

use async_trait::async_trait;
use k8s_openapi::api::certificates::v1::{
    CertificateSigningRequest, CertificateSigningRequestSpec, CertificateSigningRequestStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::Client;

use super::signer::{PendingCsr, SignerError, SigningBackend, SigningRequest, SigningStatus};

/// Signing backend driving the cluster's CertificateSigningRequest API.
#[derive(Clone)]
pub struct KubeSigner {
    api: Api<CertificateSigningRequest>,
}

impl KubeSigner {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

fn condition<'a>(status: &'a CertificateSigningRequestStatus, kind: &str) -> Option<&'a str> {
    status
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == kind && c.status != "False")
        .map(|c| c.message.as_deref().unwrap_or(""))
}

/// Map a CSR object onto the backend status model.
fn signing_status(csr: &CertificateSigningRequest) -> SigningStatus {
    let Some(status) = csr.status.as_ref() else {
        return SigningStatus::Pending;
    };
    if let Some(message) = condition(status, "Denied") {
        return SigningStatus::Denied(message.to_string());
    }
    if let Some(message) = condition(status, "Failed") {
        return SigningStatus::Failed(message.to_string());
    }
    match status.certificate.as_ref() {
        Some(ByteString(bytes)) if !bytes.is_empty() => {
            SigningStatus::Issued(String::from_utf8_lossy(bytes).into_owned())
        }
        _ => SigningStatus::Pending,
    }
}

/// True when no approver has decided on the request yet.
fn awaiting_decision(csr: &CertificateSigningRequest) -> bool {
    match csr.status.as_ref() {
        None => true,
        Some(status) => ["Approved", "Denied", "Failed"]
            .iter()
            .all(|kind| condition(status, kind).is_none()),
    }
}

#[async_trait]
impl SigningBackend for KubeSigner {
    async fn submit(&self, request: SigningRequest) -> Result<String, SignerError> {
        let csr = CertificateSigningRequest {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-csr-", request.component)),
                ..Default::default()
            },
            spec: CertificateSigningRequestSpec {
                request: ByteString(request.csr_pem.into_bytes()),
                signer_name: request.signer_name,
                usages: Some(request.usages),
                ..Default::default()
            },
            status: None,
        };

        let created = self.api.create(&PostParams::default(), &csr).await?;
        created
            .metadata
            .name
            .ok_or_else(|| SignerError::Backend("created request has no name".to_string()))
    }

    async fn status(&self, name: &str) -> Result<SigningStatus, SignerError> {
        match self.api.get(name).await {
            Ok(csr) => Ok(signing_status(&csr)),
            Err(kube::Error::Api(err)) if err.code == 404 => Err(SignerError::NotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_pending(&self) -> Result<Vec<PendingCsr>, SignerError> {
        let list = self.api.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter(awaiting_decision)
            .filter_map(|csr| {
                let name = csr.metadata.name?;
                Some(PendingCsr {
                    name,
                    csr_pem: csr.spec.request.0,
                    usages: csr.spec.usages.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn approve(&self, name: &str, message: &str) -> Result<(), SignerError> {
        let patch = serde_json::json!({
            "status": {
                "conditions": [{
                    "type": "Approved",
                    "status": "True",
                    "reason": "AutoApproved",
                    "message": message,
                }]
            }
        });
        self.api
            .patch_subresource("approval", name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
