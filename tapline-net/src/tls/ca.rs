use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Duration, Utc};
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose,
};
use tracing::{info, warn};

use super::types::{RootIdentity, TlsError, TlsErrorKind};

pub const CA_CERT_FILE: &str = "tapline-ca.pem";
pub const CA_KEY_FILE: &str = "tapline-ca-key.pem";

const ROOT_KEY_BITS: u32 = 2048;
const ROOT_VALIDITY_DAYS: i64 = 3650;

pub(crate) fn ca_paths(dir: &Path) -> (PathBuf, PathBuf) {
    (dir.join(CA_CERT_FILE), dir.join(CA_KEY_FILE))
}

pub(crate) fn set_validity(params: &mut CertificateParams, valid_days: i64) {
    let now = Utc::now();
    let not_before = now - Duration::days(1);
    let not_after = now + Duration::days(valid_days);
    params.not_before = rcgen::date_time_ymd(
        not_before.year(),
        not_before.month() as u8,
        not_before.day() as u8,
    );
    params.not_after = rcgen::date_time_ymd(
        not_after.year(),
        not_after.month() as u8,
        not_after.day() as u8,
    );
}

pub fn generate_ca(common_name: &str) -> Result<RootIdentity, TlsError> {
    let rsa = Rsa::generate(ROOT_KEY_BITS).map_err(TlsError::openssl)?;
    let key_pem = PKey::from_rsa(rsa)
        .and_then(|key| key.private_key_to_pem_pkcs8())
        .map_err(TlsError::openssl)?;
    let key_pem = String::from_utf8(key_pem)
        .map_err(|err| TlsError::new(TlsErrorKind::Parse, err.to_string()))?;
    let key_pair = KeyPair::from_pem(&key_pem).map_err(TlsError::rcgen)?;

    let mut params = CertificateParams::new(Vec::new());
    params.alg = &rcgen::PKCS_RSA_SHA256;
    params.key_pair = Some(key_pair);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::OrganizationName, "Tapline");
    params.distinguished_name = dn;
    set_validity(&mut params, ROOT_VALIDITY_DAYS);

    let signer = Certificate::from_params(params).map_err(TlsError::rcgen)?;
    let cert_pem = signer.serialize_pem().map_err(TlsError::rcgen)?;

    Ok(RootIdentity {
        cert_pem,
        key_pem,
        signer,
    })
}

pub fn load_ca(dir: &Path) -> Result<RootIdentity, TlsError> {
    let (cert_path, key_path) = ca_paths(dir);
    let cert_pem = fs::read_to_string(cert_path).map_err(TlsError::io)?;
    let key_pem = fs::read_to_string(key_path).map_err(TlsError::io)?;

    let key_pair = KeyPair::from_pem(&key_pem).map_err(TlsError::rcgen)?;
    let params = CertificateParams::from_ca_cert_pem(&cert_pem, key_pair)
        .map_err(|err| TlsError::new(TlsErrorKind::Parse, err.to_string()))?;
    let signer = Certificate::from_params(params).map_err(TlsError::rcgen)?;

    Ok(RootIdentity {
        cert_pem,
        key_pem,
        signer,
    })
}

/// Loads the root from `dir`, or generates and persists a new one when the
/// files are missing or unreadable.
pub fn load_or_generate_ca(dir: &Path, common_name: &str) -> Result<RootIdentity, TlsError> {
    fs::create_dir_all(dir).map_err(TlsError::io)?;

    let (cert_path, key_path) = ca_paths(dir);
    if cert_path.exists() && key_path.exists() {
        match load_ca(dir) {
            Ok(identity) => {
                info!(path = %cert_path.display(), "loaded root certificate");
                return Ok(identity);
            }
            Err(err) => {
                warn!(error = %err, "stored root certificate unusable, regenerating");
            }
        }
    }

    let identity = generate_ca(common_name)?;
    write_ca_to_dir(dir, &identity)?;
    info!(path = %cert_path.display(), "generated root certificate");
    Ok(identity)
}

pub fn write_ca_to_dir(dir: &Path, identity: &RootIdentity) -> Result<(), TlsError> {
    fs::create_dir_all(dir).map_err(TlsError::io)?;
    let (cert_path, key_path) = ca_paths(dir);

    fs::write(&cert_path, identity.cert_pem.as_bytes()).map_err(TlsError::io)?;
    write_private_file(&key_path, identity.key_pem.as_bytes()).map_err(TlsError::io)?;
    Ok(())
}

pub fn remove_ca_files(dir: &Path) -> Result<(), TlsError> {
    let (cert_path, key_path) = ca_paths(dir);
    for path in [cert_path, key_path] {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(TlsError::io(err)),
        }
    }
    Ok(())
}

#[cfg(unix)]
fn write_private_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies on creation
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(contents)
}
