use std::net::IpAddr;

use rcgen::{
    Certificate, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyUsagePurpose, SanType,
};

use super::ca::set_validity;
use super::types::{LeafCertificate, RootIdentity, TlsError};

const LEAF_VALIDITY_DAYS: i64 = 365;

pub fn generate_leaf_cert(host: &str, ca: &RootIdentity) -> Result<LeafCertificate, TlsError> {
    let mut params = CertificateParams::new(Vec::new());
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, host);
    params.distinguished_name = dn;

    params
        .subject_alt_names
        .push(SanType::DnsName(host.to_string()));
    if let Some(ip) = parse_ip(host) {
        params.subject_alt_names.push(SanType::IpAddress(ip));
    }
    set_validity(&mut params, LEAF_VALIDITY_DAYS);

    let cert = Certificate::from_params(params).map_err(TlsError::rcgen)?;
    let cert_pem = cert
        .serialize_pem_with_signer(&ca.signer)
        .map_err(TlsError::rcgen)?
        .into_bytes();
    let key_pem = cert.serialize_private_key_pem().into_bytes();

    Ok(LeafCertificate { cert_pem, key_pem })
}

pub fn is_ip(value: &str) -> bool {
    parse_ip(value).is_some()
}

fn parse_ip(value: &str) -> Option<IpAddr> {
    let value = value
        .strip_prefix('[')
        .and_then(|inner| inner.strip_suffix(']'))
        .unwrap_or(value);
    value.parse::<IpAddr>().ok()
}
