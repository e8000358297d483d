use std::fmt;
use std::path::PathBuf;

/// Root identity as it lives in memory once loaded or generated.
pub struct RootIdentity {
    pub cert_pem: String,
    pub key_pem: String,
    pub(crate) signer: rcgen::Certificate,
}

impl fmt::Debug for RootIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootIdentity")
            .field("cert_pem", &self.cert_pem)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaInfo {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub cert_pem: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafCertificate {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct TlsError {
    pub kind: TlsErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsErrorKind {
    Rcgen,
    Io,
    OpenSsl,
    Parse,
}

impl TlsError {
    pub fn new(kind: TlsErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn rcgen(err: rcgen::Error) -> Self {
        Self::new(TlsErrorKind::Rcgen, err.to_string())
    }

    pub(crate) fn io(err: std::io::Error) -> Self {
        Self::new(TlsErrorKind::Io, err.to_string())
    }

    pub(crate) fn openssl(err: impl fmt::Display) -> Self {
        Self::new(TlsErrorKind::OpenSsl, err.to_string())
    }
}
