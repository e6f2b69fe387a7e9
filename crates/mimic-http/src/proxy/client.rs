//! HTTP client creation and configuration.
//!
//! Every upstream TLS session is verified by the [`TrustDecisionMaker`], so
//! the trust policy applies equally to stub proxying, recording, and browser
//! pass-through.

use crate::tls::{crypto_provider, TrustDecisionMaker};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Type alias for the HTTP client used for upstream requests.
pub type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Connection pool and timeout settings for upstream requests.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_idle_per_host: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(90),
            max_idle_per_host: 16,
        }
    }
}

/// Create a pooled HTTP/1.1 client whose TLS sessions are verified by `trust`.
pub fn create_http_client(
    trust: Arc<TrustDecisionMaker>,
    settings: &ClientSettings,
) -> Result<HttpClient, rustls::Error> {
    let mut http_connector = HttpConnector::new();
    http_connector.set_connect_timeout(Some(settings.connect_timeout));
    http_connector.enforce_http(false);

    let tls_config = rustls::ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(trust)
        .with_no_client_auth();

    let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(tls_config)
        .https_or_http()
        .enable_http1()
        .wrap_connector(http_connector);

    debug!(
        "Upstream client configured: max_idle={}, idle_timeout={:?}, connect_timeout={:?}",
        settings.max_idle_per_host, settings.idle_timeout, settings.connect_timeout
    );

    Ok(Client::builder(TokioExecutor::new())
        .pool_idle_timeout(settings.idle_timeout)
        .pool_max_idle_per_host(settings.max_idle_per_host)
        .build(https_connector))
}
