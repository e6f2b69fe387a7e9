//! The signing authority behind every intercepted host certificate.

use super::identity::Identity;
use super::CertificateError;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::fmt;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use time::{Duration, OffsetDateTime};
use tracing::info;

const CA_VALIDITY_DAYS: i64 = 3650;

/// Key pair and certificate used only to sign leaf certificates.
pub struct CertificateAuthority {
    issuer: Issuer<'static, KeyPair>,
    cert_der: CertificateDer<'static>,
    cert_pem: String,
    key_pem: String,
}

impl fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("cert_der_len", &self.cert_der.len())
            .finish_non_exhaustive()
    }
}

impl CertificateAuthority {
    pub fn generate(common_name: &str) -> Result<Self, CertificateError> {
        let key = KeyPair::generate()?;
        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.use_authority_key_identifier_extension = true;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
        ];
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        dn.push(DnType::OrganizationName, "Mimic");
        params.distinguished_name = dn;
        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::days(1);
        params.not_after = now + Duration::days(CA_VALIDITY_DAYS);

        let cert = params.self_signed(&key)?;
        Ok(Self {
            cert_der: cert.der().clone(),
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
            issuer: Issuer::new(params, key),
        })
    }

    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, CertificateError> {
        let cert_der = CertificateDer::from_pem_slice(cert_pem.as_bytes())
            .map_err(|e| CertificateError::Invalid(format!("CA certificate PEM: {e}")))?;
        let key = KeyPair::from_pem(key_pem)?;
        let issuer = Issuer::from_ca_cert_der(&cert_der, key)?;
        Ok(Self {
            issuer,
            cert_der,
            cert_pem: cert_pem.to_string(),
            key_pem: key_pem.to_string(),
        })
    }

    /// Load from PEM files, or generate and persist when both are missing.
    /// With no paths the authority lives in memory only.
    pub fn load_or_generate(
        cert_path: Option<&Path>,
        key_path: Option<&Path>,
        common_name: &str,
    ) -> Result<Self, CertificateError> {
        match (cert_path, key_path) {
            (Some(cert_path), Some(key_path)) => match (cert_path.exists(), key_path.exists()) {
                (true, true) => {
                    let cert_pem = read(cert_path)?;
                    let key_pem = read(key_path)?;
                    info!("Loaded CA certificate from {}", cert_path.display());
                    Self::from_pem(&cert_pem, &key_pem)
                }
                (false, false) => {
                    let authority = Self::generate(common_name)?;
                    write(cert_path, &authority.cert_pem)?;
                    write(key_path, &authority.key_pem)?;
                    info!("Generated CA certificate at {}", cert_path.display());
                    Ok(authority)
                }
                _ => Err(CertificateError::Invalid(
                    "CA certificate and key files must both exist or both be absent".to_string(),
                )),
            },
            (None, None) => {
                info!("Generated in-memory CA certificate '{common_name}'");
                Self::generate(common_name)
            }
            _ => Err(CertificateError::Invalid(
                "CA cert_path and key_path must be set together".to_string(),
            )),
        }
    }

    pub fn cert_der(&self) -> &CertificateDer<'static> {
        &self.cert_der
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// Mint a fresh leaf for `host`, chained `[leaf, ca]`.
    pub fn issue(&self, host: &str, validity_days: u32) -> Result<Identity, CertificateError> {
        let mut params = CertificateParams::new(Vec::<String>::new())?;
        params.use_authority_key_identifier_extension = true;
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, host);
        params.distinguished_name = dn;
        match host.parse::<IpAddr>() {
            Ok(ip) => params.subject_alt_names.push(SanType::IpAddress(ip)),
            Err(_) => params
                .subject_alt_names
                .push(SanType::DnsName(host.try_into()?)),
        }
        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::days(1);
        params.not_after = now + Duration::days(i64::from(validity_days));

        let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)?;
        let cert = params.signed_by(&key, &self.issuer)?;
        let key_der = PrivateKeyDer::from(PrivatePkcs8KeyDer::from(key.serialize_der()));
        Identity::new(vec![cert.der().clone(), self.cert_der.clone()], key_der)
    }
}

fn read(path: &Path) -> Result<String, CertificateError> {
    fs::read_to_string(path).map_err(|source| CertificateError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write(path: &Path, contents: &str) -> Result<(), CertificateError> {
    let io_err = |source| CertificateError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, contents).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_then_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("ca/cert.pem");
        let key = dir.path().join("ca/key.pem");

        let first = CertificateAuthority::load_or_generate(Some(&cert), Some(&key), "Test CA").unwrap();
        assert!(cert.exists() && key.exists());
        let second = CertificateAuthority::load_or_generate(Some(&cert), Some(&key), "Test CA").unwrap();
        assert_eq!(first.cert_der(), second.cert_der());
    }

    #[test]
    fn test_half_configured_paths_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        assert!(matches!(
            CertificateAuthority::load_or_generate(Some(&cert), None, "x"),
            Err(CertificateError::Invalid(_))
        ));
    }

    #[test]
    fn test_one_file_missing_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        std::fs::write(&cert, "not used").unwrap();
        assert!(matches!(
            CertificateAuthority::load_or_generate(Some(&cert), Some(&key), "x"),
            Err(CertificateError::Invalid(_))
        ));
    }

    #[test]
    fn test_issued_leaf_names_host_and_chains_to_ca() {
        let ca = CertificateAuthority::generate("Test CA").unwrap();
        let leaf = ca.issue("api.example.test", 30).unwrap();
        assert!(leaf.matches_host("api.example.test"));
        assert!(!leaf.matches_host("other.example.test"));
        assert_eq!(leaf.chain().len(), 2);
        assert_eq!(&leaf.chain()[1], ca.cert_der());

        let ip_leaf = ca.issue("127.0.0.1", 30).unwrap();
        assert!(ip_leaf.matches_host("127.0.0.1"));
    }
}
