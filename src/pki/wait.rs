//! Blocking wait for a signed certificate.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::net::tls::CertificateSource;
use crate::resilience::poll::{poll_until, PollOutcome};

/// How a wait for a certificate ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A certificate is available.
    Signed,
    /// The stop signal fired first; no certificate is available.
    Canceled,
}

impl WaitOutcome {
    pub fn is_signed(&self) -> bool {
        matches!(self, WaitOutcome::Signed)
    }
}

/// Wait until `source` holds a certificate or `cancel` fires.
///
/// Checks immediately, then once per `poll_interval`, logging each
/// unsuccessful check.
pub async fn wait_until_signed<S>(
    source: &S,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> WaitOutcome
where
    S: CertificateSource + ?Sized,
{
    let outcome = poll_until(poll_interval, cancel, || {
        let ready = source.current().is_some();
        if !ready {
            tracing::info!("waiting for the certificate to be signed");
        }
        async move { ready }
    })
    .await;

    match outcome {
        PollOutcome::Done => WaitOutcome::Signed,
        PollOutcome::Canceled => WaitOutcome::Canceled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::tls::SharedCertificate;
    use rustls::sign::CertifiedKey;
    use std::sync::Arc;

    fn certified_key() -> Arc<CertifiedKey> {
        let params = rcgen::CertificateParams::new(vec!["wait".to_string()]).unwrap();
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        let der = rustls::pki_types::PrivateKeyDer::Pkcs8(key.serialize_der().into());
        let signing = rustls::crypto::ring::sign::any_supported_type(&der).unwrap();
        Arc::new(CertifiedKey::new(vec![cert.der().clone()], signing))
    }

    #[tokio::test(start_paused = true)]
    async fn returns_signed_once_certificate_appears() {
        let source = Arc::new(SharedCertificate::new());
        let writer = source.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            writer.set(certified_key());
        });

        let started = tokio::time::Instant::now();
        let outcome = wait_until_signed(&*source, Duration::from_secs(5), &CancellationToken::new()).await;
        assert_eq!(outcome, WaitOutcome::Signed);
        // Never earlier than the certificate, at most one interval later.
        assert!(started.elapsed() >= Duration::from_secs(12));
        assert!(started.elapsed() <= Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_returns_without_certificate() {
        let source = SharedCertificate::new();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let outcome = wait_until_signed(&source, Duration::from_secs(5), &cancel).await;
        assert_eq!(outcome, WaitOutcome::Canceled);
        assert!(!outcome.is_signed());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn already_signed_returns_immediately() {
        let source = SharedCertificate::new();
        source.set(certified_key());
        let outcome = wait_until_signed(&source, Duration::from_secs(3600), &CancellationToken::new()).await;
        assert!(outcome.is_signed());
    }
}
