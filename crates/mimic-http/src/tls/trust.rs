//! Upstream certificate trust for proxying and recording.
//!
//! A chain is accepted when any configured validator accepts it. When every
//! validator rejects, the error from the last one is reported.

use super::crypto_provider;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, DistinguishedName, RootCertStore, SignatureScheme};
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum TrustError {
    #[error("no trust validators configured")]
    NoValidators,
    #[error("upstream certificate rejected: {0}")]
    Rejected(rustls::Error),
    #[error("could not read trust store {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid trust store: {0}")]
    InvalidStore(String),
}

#[derive(Debug, Clone)]
pub enum TrustValidator {
    /// Accept any chain.
    TrustAll,
    /// Accept any chain presented for one of these hosts.
    TrustNamedHosts(Vec<String>),
    /// Full chain validation against a root store.
    Store {
        roots: Arc<RootCertStore>,
        verifier: Arc<WebPkiServerVerifier>,
    },
}

impl TrustValidator {
    pub fn named_hosts<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TrustValidator::TrustNamedHosts(
            hosts
                .into_iter()
                .map(|h| h.into().to_ascii_lowercase())
                .collect(),
        )
    }

    pub fn store(roots: RootCertStore) -> Result<Self, TrustError> {
        let roots = Arc::new(roots);
        let verifier = WebPkiServerVerifier::builder_with_provider(roots.clone(), crypto_provider())
            .build()
            .map_err(|e| TrustError::InvalidStore(e.to_string()))?;
        Ok(TrustValidator::Store { roots, verifier })
    }

    pub fn from_certificates(certs: Vec<CertificateDer<'static>>) -> Result<Self, TrustError> {
        let mut roots = RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(certs);
        if ignored > 0 {
            warn!("Ignored {ignored} unparsable trust anchors");
        }
        if added == 0 {
            return Err(TrustError::InvalidStore(
                "no usable certificates in trust store".to_string(),
            ));
        }
        Self::store(roots)
    }

    /// A PEM bundle of trust anchors.
    pub fn from_pem_file(path: &Path) -> Result<Self, TrustError> {
        let io_err = |source| TrustError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = BufReader::new(File::open(path).map_err(io_err)?);
        let certs = rustls_pemfile::certs(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(io_err)?;
        Self::from_certificates(certs)
    }

    /// The platform's native root store.
    pub fn system_roots() -> Result<Self, TrustError> {
        let loaded = rustls_native_certs::load_native_certs();
        for error in &loaded.errors {
            warn!("Problem loading a system root certificate: {error}");
        }
        Self::from_certificates(loaded.certs)
    }

    fn verify(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<(), rustls::Error> {
        match self {
            TrustValidator::TrustAll => Ok(()),
            TrustValidator::TrustNamedHosts(hosts) => {
                let name = server_name.to_str().to_ascii_lowercase();
                if hosts.iter().any(|h| *h == name) {
                    Ok(())
                } else {
                    Err(rustls::Error::InvalidCertificate(
                        rustls::CertificateError::NotValidForName,
                    ))
                }
            }
            TrustValidator::Store { verifier, .. } => verifier
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
                .map(|_| ()),
        }
    }

    fn accepted_issuers(&self) -> Vec<DistinguishedName> {
        match self {
            TrustValidator::Store { roots, .. } => roots.subjects(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct TrustDecisionMaker {
    validators: Vec<TrustValidator>,
    provider: Arc<CryptoProvider>,
}

impl TrustDecisionMaker {
    pub fn new(validators: Vec<TrustValidator>) -> Result<Self, TrustError> {
        if validators.is_empty() {
            return Err(TrustError::NoValidators);
        }
        Ok(Self {
            validators,
            provider: crypto_provider(),
        })
    }

    pub fn trust_all() -> Self {
        Self {
            validators: vec![TrustValidator::TrustAll],
            provider: crypto_provider(),
        }
    }

    pub fn validators(&self) -> &[TrustValidator] {
        &self.validators
    }

    /// Accept if any validator accepts; otherwise fail with the last rejection.
    pub fn check(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<(), TrustError> {
        let mut last_rejection = None;
        for validator in &self.validators {
            match validator.verify(end_entity, intermediates, server_name, ocsp_response, now) {
                Ok(()) => return Ok(()),
                Err(e) => last_rejection = Some(e),
            }
        }
        Err(last_rejection.map_or(TrustError::NoValidators, TrustError::Rejected))
    }

    /// Union of the trust anchors' subjects across validators, as a fresh copy.
    pub fn accepted_issuers(&self) -> Vec<DistinguishedName> {
        let mut seen = HashSet::new();
        self.validators
            .iter()
            .flat_map(TrustValidator::accepted_issuers)
            .filter(|dn| seen.insert(dn.as_ref().to_vec()))
            .collect()
    }
}

impl ServerCertVerifier for TrustDecisionMaker {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        self.check(end_entity, intermediates, server_name, ocsp_response, now)
            .map(|()| ServerCertVerified::assertion())
            .map_err(|e| match e {
                TrustError::Rejected(inner) => inner,
                other => rustls::Error::General(other.to_string()),
            })
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::CertificateAuthority;

    fn server_name(host: &str) -> ServerName<'static> {
        ServerName::try_from(host.to_string()).unwrap()
    }

    fn check(maker: &TrustDecisionMaker, leaf: &CertificateDer<'_>, chain: &[CertificateDer<'_>], host: &str) -> Result<(), TrustError> {
        maker.check(leaf, chain, &server_name(host), &[], UnixTime::now())
    }

    #[test]
    fn test_accepts_if_either_validator_accepts() {
        let trusted_ca = CertificateAuthority::generate("Trusted").unwrap();
        let leaf = trusted_ca.issue("store.test", 30).unwrap();
        let maker = TrustDecisionMaker::new(vec![
            TrustValidator::named_hosts(["named.test"]),
            TrustValidator::from_certificates(vec![trusted_ca.cert_der().clone()]).unwrap(),
        ])
        .unwrap();

        // Named-host validator rejects, store accepts.
        assert!(check(&maker, leaf.leaf(), &[], "store.test").is_ok());

        // Store rejects (untrusted CA), named-host validator accepts.
        let other_ca = CertificateAuthority::generate("Other").unwrap();
        let foreign = other_ca.issue("named.test", 30).unwrap();
        assert!(check(&maker, foreign.leaf(), &[], "named.test").is_ok());
    }

    #[test]
    fn test_rejects_only_if_all_reject() {
        let trusted_ca = CertificateAuthority::generate("Trusted").unwrap();
        let other_ca = CertificateAuthority::generate("Other").unwrap();
        let foreign = other_ca.issue("elsewhere.test", 30).unwrap();
        let maker = TrustDecisionMaker::new(vec![
            TrustValidator::named_hosts(["named.test"]),
            TrustValidator::from_certificates(vec![trusted_ca.cert_der().clone()]).unwrap(),
        ])
        .unwrap();

        let err = check(&maker, foreign.leaf(), &[], "elsewhere.test").unwrap_err();
        assert!(matches!(err, TrustError::Rejected(_)));
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn test_trust_all_accepts_anything() {
        let ca = CertificateAuthority::generate("Any").unwrap();
        let leaf = ca.issue("whatever.test", 1).unwrap();
        assert!(check(&TrustDecisionMaker::trust_all(), leaf.leaf(), &[], "other.test").is_ok());
    }

    #[test]
    fn test_no_validators_is_an_error() {
        assert!(matches!(TrustDecisionMaker::new(Vec::new()), Err(TrustError::NoValidators)));
    }

    #[test]
    fn test_accepted_issuers_is_union_without_duplicates() {
        let a = CertificateAuthority::generate("A").unwrap();
        let b = CertificateAuthority::generate("B").unwrap();
        let maker = TrustDecisionMaker::new(vec![
            TrustValidator::from_certificates(vec![a.cert_der().clone()]).unwrap(),
            TrustValidator::from_certificates(vec![a.cert_der().clone(), b.cert_der().clone()])
                .unwrap(),
            TrustValidator::TrustAll,
        ])
        .unwrap();
        let mut issuers = maker.accepted_issuers();
        assert_eq!(issuers.len(), 2);
        issuers.clear();
        assert_eq!(maker.accepted_issuers().len(), 2);
    }
}
