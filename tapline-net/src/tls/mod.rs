mod authority;
mod ca;
mod cache;
mod cert;
mod openssl;
mod types;

pub use authority::{CertificateAuthority, DEFAULT_CA_COMMON_NAME, default_ca_dir};
pub use ca::{
    CA_CERT_FILE, CA_KEY_FILE, generate_ca, load_ca, load_or_generate_ca, remove_ca_files,
    write_ca_to_dir,
};
pub use cache::CertCache;
pub use cert::{generate_leaf_cert, is_ip};
pub use openssl::{build_acceptor, build_connector, cert_fingerprint};
pub use types::{CaInfo, LeafCertificate, RootIdentity, TlsError, TlsErrorKind};
