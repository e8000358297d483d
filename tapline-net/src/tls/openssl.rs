use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::ssl::{SslAcceptor, SslConnector, SslMethod, SslOptions, SslVerifyMode};
use openssl::x509::X509;

use super::types::{LeafCertificate, TlsError};

/// Server side of an intercepted tunnel. `chain_pem` is appended after the
/// leaf so clients that trust the root can build the path.
pub fn build_acceptor(
    leaf: &LeafCertificate,
    chain_pem: Option<&[u8]>,
) -> Result<SslAcceptor, TlsError> {
    let mut builder =
        SslAcceptor::mozilla_intermediate(SslMethod::tls()).map_err(TlsError::openssl)?;
    builder.set_options(SslOptions::NO_SSLV2 | SslOptions::NO_SSLV3);

    let cert = X509::from_pem(&leaf.cert_pem).map_err(TlsError::openssl)?;
    let key = PKey::private_key_from_pem(&leaf.key_pem).map_err(TlsError::openssl)?;

    builder.set_certificate(&cert).map_err(TlsError::openssl)?;
    builder.set_private_key(&key).map_err(TlsError::openssl)?;
    builder.check_private_key().map_err(TlsError::openssl)?;
    if let Some(chain_pem) = chain_pem {
        let root = X509::from_pem(chain_pem).map_err(TlsError::openssl)?;
        builder
            .add_extra_chain_cert(root)
            .map_err(TlsError::openssl)?;
    }

    builder.set_verify(SslVerifyMode::NONE);

    Ok(builder.build())
}

/// Client side towards the real origin. Origin certificates are not
/// verified: they are unrelated to the interception identity.
pub fn build_connector() -> Result<SslConnector, TlsError> {
    let mut builder = SslConnector::builder(SslMethod::tls()).map_err(TlsError::openssl)?;
    builder.set_verify(SslVerifyMode::NONE);
    Ok(builder.build())
}

pub fn cert_fingerprint(pem: &[u8]) -> Result<String, TlsError> {
    let cert = X509::from_pem(pem).map_err(TlsError::openssl)?;
    let digest = cert
        .digest(MessageDigest::sha256())
        .map_err(TlsError::openssl)?;
    Ok(digest
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(":"))
}
