//! Leaf certificate inspection.

use std::net::IpAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use x509_parser::prelude::*;

use super::PkiError;

/// Rotation threshold as a fraction of a leaf's lifetime.
pub const ROTATION_THRESHOLD: f64 = 0.80;

/// Validity window and subject of a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    /// When the certificate becomes valid (Unix timestamp)
    pub not_before: i64,
    /// When the certificate expires (Unix timestamp)
    pub not_after: i64,
    /// Subject common name
    pub common_name: String,
    /// Subject organizations, in certificate order
    pub organizations: Vec<String>,
    /// DNS subject alternative names
    pub dns_names: Vec<String>,
    /// IP subject alternative names
    pub ip_addresses: Vec<IpAddr>,
    /// DER-encoded SubjectPublicKeyInfo
    pub public_key: Vec<u8>,
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn ip_from_octets(raw: &[u8]) -> Option<IpAddr> {
    match raw.len() {
        4 => <[u8; 4]>::try_from(raw).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(raw).ok().map(IpAddr::from),
        _ => None,
    }
}

impl CertificateInfo {
    /// Parse certificate info from a DER-encoded certificate.
    pub fn from_der(der: &[u8]) -> Result<Self, PkiError> {
        let (_, cert) = X509Certificate::from_der(der).map_err(|e| PkiError::parse("certificate", e))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or("")
            .to_string();

        let organizations = cert
            .subject()
            .iter_organization()
            .filter_map(|org| org.as_str().ok())
            .map(str::to_string)
            .collect();

        let mut dns_names = Vec::new();
        let mut ip_addresses = Vec::new();
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in &san.value.general_names {
                match name {
                    GeneralName::DNSName(dns) => dns_names.push(dns.to_string()),
                    GeneralName::IPAddress(raw) => ip_addresses.extend(ip_from_octets(raw)),
                    _ => {}
                }
            }
        }

        Ok(Self {
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
            common_name,
            organizations,
            dns_names,
            ip_addresses,
            public_key: cert.public_key().raw.to_vec(),
        })
    }

    /// Total lifetime of the certificate in seconds
    pub fn lifetime_secs(&self) -> i64 {
        self.not_after - self.not_before
    }

    /// Check if certificate has expired
    pub fn is_expired(&self) -> bool {
        self.not_after <= now_secs()
    }

    /// Time left until the certificate should be renewed (zero when due).
    pub fn renewal_delay(&self) -> Duration {
        let renew_at = self.not_before + (self.lifetime_secs() as f64 * ROTATION_THRESHOLD) as i64;
        Duration::from_secs((renew_at - now_secs()).max(0) as u64)
    }

    /// Check if certificate needs rotation (past 80% of TTL)
    pub fn needs_rotation(&self) -> bool {
        self.renewal_delay().is_zero()
    }
}
