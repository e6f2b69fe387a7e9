//! Server identities and the handshake-time selection hook.

use super::CertificateError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use x509_parser::extensions::GeneralName;
use x509_parser::parse_x509_certificate;

/// A certificate chain plus signing key, ready to present in a handshake.
#[derive(Clone)]
pub struct Identity {
    certified_key: Arc<CertifiedKey>,
    /// Lowercased subject CN and SAN entries of the leaf.
    names: Arc<Vec<String>>,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity").field("names", &self.names).finish()
    }
}

impl Identity {
    pub fn new(
        chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> Result<Self, CertificateError> {
        let leaf = chain
            .first()
            .ok_or_else(|| CertificateError::Invalid("empty certificate chain".to_string()))?;
        let names = subject_names(leaf);
        let signing_key = rustls::crypto::ring::sign::any_supported_type(&key)?;
        Ok(Self {
            certified_key: Arc::new(CertifiedKey::new(chain, signing_key)),
            names: Arc::new(names),
        })
    }

    /// Load a PEM certificate chain and private key.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self, CertificateError> {
        let open = |path: &Path| {
            File::open(path)
                .map(BufReader::new)
                .map_err(|source| CertificateError::Io {
                    path: path.to_path_buf(),
                    source,
                })
        };
        let chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut open(cert_path)?)
            .collect::<Result<_, _>>()
            .map_err(|source| CertificateError::Io {
                path: cert_path.to_path_buf(),
                source,
            })?;
        if chain.is_empty() {
            return Err(CertificateError::Invalid(format!(
                "no certificates found in {}",
                cert_path.display()
            )));
        }
        let key = rustls_pemfile::private_key(&mut open(key_path)?)
            .map_err(|source| CertificateError::Io {
                path: key_path.to_path_buf(),
                source,
            })?
            .ok_or_else(|| {
                CertificateError::Invalid(format!("no private key found in {}", key_path.display()))
            })?;
        Self::new(chain, key)
    }

    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        self.certified_key.clone()
    }

    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.certified_key.cert
    }

    pub fn leaf(&self) -> &CertificateDer<'static> {
        &self.certified_key.cert[0]
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Whether the leaf's subject or SANs cover `host` (single-label wildcards allowed).
    pub fn matches_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.names.iter().any(|name| {
            if name == &host {
                return true;
            }
            match name.strip_prefix("*.") {
                Some(suffix) => host
                    .split_once('.')
                    .is_some_and(|(label, rest)| !label.is_empty() && rest == suffix),
                None => false,
            }
        })
    }
}

fn subject_names(leaf: &CertificateDer<'_>) -> Vec<String> {
    let Ok((_, cert)) = parse_x509_certificate(leaf.as_ref()) else {
        return Vec::new();
    };
    let mut names: Vec<String> = cert
        .subject()
        .iter_common_name()
        .filter_map(|cn| cn.as_str().ok())
        .map(|cn| cn.to_ascii_lowercase())
        .collect();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            match name {
                GeneralName::DNSName(dns) => names.push(dns.to_ascii_lowercase()),
                GeneralName::IPAddress(bytes) => names.extend(ip_from_bytes(bytes)),
                _ => {}
            }
        }
    }
    names.sort();
    names.dedup();
    names
}

fn ip_from_bytes(bytes: &[u8]) -> Option<String> {
    let ip = match bytes.len() {
        4 => IpAddr::from(<[u8; 4]>::try_from(bytes).ok()?),
        16 => IpAddr::from(<[u8; 16]>::try_from(bytes).ok()?),
        _ => return None,
    };
    Some(ip.to_string())
}

/// Hook consulted during each handshake to pick the certificate to present.
pub trait IdentitySelector: Send + Sync {
    /// `hostname_hint` is the SNI name, if the client sent one. Returns `None`
    /// only when `default` is `None`.
    fn choose_identity(&self, hostname_hint: Option<&str>, default: Option<&Identity>)
        -> Option<Identity>;
}

/// Adapts an [`IdentitySelector`] to rustls' certificate resolution.
pub struct SniCertResolver {
    selector: Arc<dyn IdentitySelector>,
    default: Option<Identity>,
}

impl SniCertResolver {
    pub fn new(selector: Arc<dyn IdentitySelector>, default: Option<Identity>) -> Self {
        Self { selector, default }
    }
}

impl fmt::Debug for SniCertResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SniCertResolver")
            .field("default", &self.default)
            .finish_non_exhaustive()
    }
}

impl ResolvesServerCert for SniCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.selector
            .choose_identity(client_hello.server_name(), self.default.as_ref())
            .map(|identity| identity.certified_key())
    }
}
