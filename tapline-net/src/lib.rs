mod http1;
mod tls;

pub use http1::{
    Header, HttpVersion, Limits, ParseError, ParseErrorKind, ParseStatus, Request, RequestLine,
    RequestParser, Response, ResponseParser, StatusLine,
};

pub use tls::{
    CA_CERT_FILE, CA_KEY_FILE, CaInfo, CertCache, CertificateAuthority, DEFAULT_CA_COMMON_NAME,
    LeafCertificate, RootIdentity, TlsError, TlsErrorKind, build_acceptor, build_connector,
    cert_fingerprint, default_ca_dir, generate_ca, generate_leaf_cert, is_ip, load_ca,
    load_or_generate_ca, remove_ca_files, write_ca_to_dir,
};
