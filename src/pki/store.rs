//! On-disk certificate store.
//!
//! One directory per component holding `<component>-current.pem`: the
//! certificate chain followed by the private key. Writes go through a
//! temporary file and a rename so readers never see a partial bundle.

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use std::fs;
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::info::CertificateInfo;
use super::PkiError;

/// File store keyed by component name.
#[derive(Debug, Clone)]
pub struct CertificateStore {
    dir: PathBuf,
    component: String,
}

impl CertificateStore {
    /// Create (or reuse) the store directory with owner-only permissions.
    pub fn open(dir: &Path, component: &str) -> Result<Self, PkiError> {
        let store_err = |source| PkiError::Store {
            path: dir.to_path_buf(),
            source,
        };
        fs::create_dir_all(dir).map_err(store_err)?;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).map_err(store_err)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            component: component.to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the current certificate bundle.
    pub fn current_path(&self) -> PathBuf {
        self.dir.join(format!("{}-current.pem", self.component))
    }

    /// Load the current bundle, if one has been stored.
    pub fn load(&self) -> Result<Option<StoredIdentity>, PkiError> {
        let path = self.current_path();
        match fs::read(&path) {
            Ok(bytes) => StoredIdentity::from_pem(&bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PkiError::Store { path, source }),
        }
    }

    /// Atomically replace the current bundle.
    pub fn save(&self, chain_pem: &str, key_pem: &str) -> Result<(), PkiError> {
        let path = self.current_path();
        let tmp = self.dir.join(format!(".{}-current.pem.tmp", self.component));
        let store_err = |source| PkiError::Store {
            path: path.clone(),
            source,
        };

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&tmp)
            .map_err(store_err)?;
        file.write_all(chain_pem.as_bytes()).map_err(store_err)?;
        if !chain_pem.ends_with('\n') {
            file.write_all(b"\n").map_err(store_err)?;
        }
        file.write_all(key_pem.as_bytes()).map_err(store_err)?;
        file.sync_all().map_err(store_err)?;
        drop(file);

        fs::rename(&tmp, &path).map_err(store_err)?;
        Ok(())
    }
}

/// Parsed certificate chain and private key.
#[derive(Debug)]
pub struct StoredIdentity {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    info: CertificateInfo,
}

impl StoredIdentity {
    /// Parse a PEM bundle holding a certificate chain and a private key.
    pub fn from_pem(bundle: &[u8]) -> Result<Self, PkiError> {
        let chain = rustls_pemfile::certs(&mut &bundle[..])
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| PkiError::parse("certificate chain", e))?;
        let leaf = chain
            .first()
            .ok_or_else(|| PkiError::parse("certificate chain", "no certificate found"))?;
        let info = CertificateInfo::from_der(leaf)?;

        let key = rustls_pemfile::private_key(&mut &bundle[..])
            .map_err(|e| PkiError::parse("private key", e))?
            .ok_or_else(|| PkiError::parse("private key", "no private key found"))?;

        Ok(Self { chain, key, info })
    }

    /// Leaf certificate details.
    pub fn info(&self) -> &CertificateInfo {
        &self.info
    }

    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// Signing material usable by rustls.
    pub fn certified_key(&self) -> Result<Arc<CertifiedKey>, PkiError> {
        let signing_key = rustls::crypto::ring::sign::any_supported_type(&self.key)
            .map_err(|e| PkiError::parse("private key", e))?;
        Ok(Arc::new(CertifiedKey::new(self.chain.clone(), signing_key)))
    }
}
