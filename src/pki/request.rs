//! Identity templates for the cloud and edge components.

use rcgen::{CertificateParams, DistinguishedName, DnType, DnValue, SanType};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use super::info::CertificateInfo;
use super::{PkiError, CLOUD_COMMON_NAME, MASTERS_ORG, POD_IP_ENV, PRODUCT_ORG};

const ORGANIZATION_OID: [u64; 4] = [2, 5, 4, 10];

/// DNS names and IP addresses placed in a certificate's SAN extension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectAltNames {
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
}

/// Immutable description of the identity a component requests.
///
/// Created once per process start. Every renewal reproduces exactly these
/// subject and SAN fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    component: String,
    common_name: String,
    organizations: Vec<String>,
    dns_names: BTreeSet<String>,
    ip_addresses: BTreeSet<IpAddr>,
    store_dir: PathBuf,
}

impl CertificateRequest {
    /// Identity of the cloud-side server: fixed kubelet-client common name,
    /// masters role plus product organization, SANs from discovery merged
    /// with the caller's extras.
    pub fn cloud_identity(
        component: &str,
        store_dir: &Path,
        discovered: SubjectAltNames,
        extra_dns: &[String],
        extra_ips: &[IpAddr],
    ) -> Self {
        let dns_names = discovered
            .dns_names
            .into_iter()
            .chain(extra_dns.iter().cloned())
            .filter(|name| !name.is_empty())
            .collect();
        let ip_addresses = discovered
            .ip_addresses
            .into_iter()
            .chain(extra_ips.iter().copied())
            .collect();

        Self {
            component: component.to_string(),
            common_name: CLOUD_COMMON_NAME.to_string(),
            organizations: vec![MASTERS_ORG.to_string(), PRODUCT_ORG.to_string()],
            dns_names,
            ip_addresses,
            store_dir: store_dir.to_path_buf(),
        }
    }

    /// Identity of an edge agent: the cluster name as common name and DNS
    /// SAN, the pod IP as IP SAN, product organization only.
    pub fn edge_identity(component: &str, store_dir: &Path, cluster_name: &str, pod_ip: IpAddr) -> Self {
        Self {
            component: component.to_string(),
            common_name: cluster_name.to_string(),
            organizations: vec![PRODUCT_ORG.to_string()],
            dns_names: BTreeSet::from([cluster_name.to_string()]),
            ip_addresses: BTreeSet::from([pod_ip]),
            store_dir: store_dir.to_path_buf(),
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    pub fn organizations(&self) -> &[String] {
        &self.organizations
    }

    pub fn dns_names(&self) -> impl Iterator<Item = &String> {
        self.dns_names.iter()
    }

    pub fn ip_addresses(&self) -> impl Iterator<Item = &IpAddr> {
        self.ip_addresses.iter()
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    /// Whether `info` carries exactly this request's subject and SANs.
    ///
    /// Organizations and SANs are compared as sets.
    pub fn is_satisfied_by(&self, info: &CertificateInfo) -> bool {
        let organizations: BTreeSet<&str> = info.organizations.iter().map(String::as_str).collect();
        let wanted_organizations: BTreeSet<&str> = self.organizations.iter().map(String::as_str).collect();
        let dns_names: BTreeSet<String> = info.dns_names.iter().cloned().collect();
        let ip_addresses: BTreeSet<IpAddr> = info.ip_addresses.iter().copied().collect();

        info.common_name == self.common_name
            && organizations == wanted_organizations
            && dns_names == self.dns_names
            && ip_addresses == self.ip_addresses
    }

    /// CSR parameters carrying this request's subject and SANs.
    pub fn csr_params(&self) -> Result<CertificateParams, PkiError> {
        let mut params = CertificateParams::new(self.dns_names.iter().cloned().collect::<Vec<_>>())
            .map_err(|e| PkiError::generation("CSR parameters", e))?;
        params
            .subject_alt_names
            .extend(self.ip_addresses.iter().map(|ip| SanType::IpAddress(*ip)));
        params.distinguished_name = subject_name(&self.common_name, &self.organizations)?;
        Ok(params)
    }
}

/// Build a subject with one common name and up to two organizations.
///
/// rcgen keys name entries by attribute type, so the second organization is
/// pushed under the organization OID spelled as a custom type.
pub(crate) fn subject_name(
    common_name: &str,
    organizations: &[String],
) -> Result<DistinguishedName, PkiError> {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
    match organizations {
        [] => {}
        [org] => dn.push(DnType::OrganizationName, DnValue::Utf8String(org.clone())),
        [first, second] => {
            dn.push(DnType::OrganizationName, DnValue::Utf8String(first.clone()));
            dn.push(
                DnType::CustomDnType(ORGANIZATION_OID.to_vec()),
                DnValue::Utf8String(second.clone()),
            );
        }
        _ => {
            return Err(PkiError::generation(
                "subject",
                "at most two organizations are supported",
            ))
        }
    }
    Ok(dn)
}

/// Read the edge pod IP from `POD_IP`.
pub fn pod_ip_from_env() -> Result<IpAddr, PkiError> {
    parse_pod_ip(std::env::var(POD_IP_ENV).ok())
}

fn parse_pod_ip(value: Option<String>) -> Result<IpAddr, PkiError> {
    let raw = value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| PkiError::Environment {
            name: POD_IP_ENV,
            problem: "is not set".to_string(),
        })?;
    raw.trim().parse().map_err(|_| PkiError::Environment {
        name: POD_IP_ENV,
        problem: format!("is not an IP address: {:?}", raw),
    })
}
