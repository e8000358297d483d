use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use super::ca::{ca_paths, generate_ca, load_or_generate_ca, remove_ca_files, write_ca_to_dir};
use super::cache::CertCache;
use super::cert::generate_leaf_cert;
use super::openssl::cert_fingerprint;
use super::types::{CaInfo, LeafCertificate, RootIdentity, TlsError, TlsErrorKind};

pub const DEFAULT_CA_COMMON_NAME: &str = "Tapline Proxy CA";

/// Root identity plus the per-host leaf certificates issued from it.
#[derive(Debug)]
pub struct CertificateAuthority {
    dir: PathBuf,
    common_name: String,
    root: RwLock<Option<Arc<RootIdentity>>>,
    leaves: CertCache,
}

impl CertificateAuthority {
    pub fn new(dir: impl AsRef<Path>, common_name: impl Into<String>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            common_name: common_name.into(),
            root: RwLock::new(None),
            leaves: CertCache::new(),
        }
    }

    /// Stores the root under the per-user data directory.
    pub fn with_default_dir(common_name: impl Into<String>) -> Result<Self, TlsError> {
        Ok(Self::new(default_ca_dir()?, common_name))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn cert_path(&self) -> PathBuf {
        ca_paths(&self.dir).0
    }

    pub fn initialize(&self) -> Result<CaInfo, TlsError> {
        let mut root = self.root.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(identity) = root.as_ref() {
            return Ok(self.info(identity));
        }

        let identity = load_or_generate_ca(&self.dir, &self.common_name)?;
        let info = self.info(&identity);
        *root = Some(Arc::new(identity));
        Ok(info)
    }

    pub fn root_pem(&self) -> Option<String> {
        self.root
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|identity| identity.cert_pem.clone())
    }

    pub fn generate_domain_cert(&self, host: &str) -> Result<LeafCertificate, TlsError> {
        if let Some(cert) = self.leaves.get(host) {
            return Ok(cert);
        }

        let root = self.root_identity()?;
        self.leaves.get_or_try_insert_with(host, || {
            debug!(host, "issuing leaf certificate");
            generate_leaf_cert(host, &root)
        })
    }

    pub fn cached_leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Replaces the persisted root and forgets every issued leaf.
    pub fn regenerate(&self) -> Result<CaInfo, TlsError> {
        let mut root = self.root.write().unwrap_or_else(PoisonError::into_inner);
        remove_ca_files(&self.dir)?;
        self.leaves.clear();

        let identity = generate_ca(&self.common_name)?;
        write_ca_to_dir(&self.dir, &identity)?;
        info!(dir = %self.dir.display(), "regenerated root certificate");

        let info = self.info(&identity);
        *root = Some(Arc::new(identity));
        Ok(info)
    }

    pub fn fingerprint(&self) -> Result<String, TlsError> {
        self.initialize()
            .and_then(|info| cert_fingerprint(info.cert_pem.as_bytes()))
    }

    fn root_identity(&self) -> Result<Arc<RootIdentity>, TlsError> {
        if let Some(identity) = self
            .root
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Ok(Arc::clone(identity));
        }
        self.initialize()?;
        self.root
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| TlsError::new(TlsErrorKind::Io, "root certificate unavailable"))
    }

    fn info(&self, identity: &RootIdentity) -> CaInfo {
        let (cert_path, key_path) = ca_paths(&self.dir);
        CaInfo {
            cert_path,
            key_path,
            cert_pem: identity.cert_pem.clone(),
        }
    }
}

pub fn default_ca_dir() -> Result<PathBuf, TlsError> {
    dirs::data_local_dir()
        .map(|dir| dir.join("tapline").join("certs"))
        .ok_or_else(|| TlsError::new(TlsErrorKind::Io, "no per-user data directory"))
}
