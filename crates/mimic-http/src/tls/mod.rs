//! TLS interception: the signing authority, per-host certificate issuance,
//! upstream trust decisions, and the MITM acceptor.

mod acceptor;
mod authority;
mod identity;
mod issuer;
mod trust;

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub use acceptor::{accept_with_timeout, mitm_acceptor, HTTP1_ALPN};
pub use authority::CertificateAuthority;
pub use identity::{Identity, IdentitySelector, SniCertResolver};
pub use issuer::DynamicCertificateIssuer;
pub use trust::{TrustDecisionMaker, TrustError, TrustValidator};

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("certificate generation failed: {0}")]
    Generation(#[from] rcgen::Error),
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid certificate material: {0}")]
    Invalid(String),
}

/// The one crypto provider every rustls config in this crate is built with.
pub fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}
