//! Request forwarding to an upstream URL.

use super::client::{create_http_client, ClientSettings, HttpClient};
use super::headers::{X_MIMIC_PROXIED, VALUE_TRUE};
use crate::http::{is_hop_by_hop, HttpResponse, LoggedRequest};
use crate::tls::TrustDecisionMaker;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Uri};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid upstream URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("could not build upstream request: {0}")]
    Request(#[from] hyper::http::Error),
    #[error("upstream request failed: {0}")]
    Upstream(String),
    #[error("could not read upstream response body: {0}")]
    Body(#[from] hyper::Error),
    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),
    #[error("could not configure upstream TLS: {0}")]
    Tls(#[from] rustls::Error),
}

/// Sends captured requests to real upstreams and buffers the reply.
pub struct Forwarder {
    client: HttpClient,
    trust: Arc<TrustDecisionMaker>,
    request_timeout: Duration,
}

impl Forwarder {
    pub fn new(trust: Arc<TrustDecisionMaker>) -> Result<Self, ForwardError> {
        Self::with_settings(trust, &ClientSettings::default())
    }

    pub fn with_settings(
        trust: Arc<TrustDecisionMaker>,
        settings: &ClientSettings,
    ) -> Result<Self, ForwardError> {
        Ok(Self {
            client: create_http_client(trust.clone(), settings)?,
            trust,
            request_timeout: settings.request_timeout,
        })
    }

    pub fn trust(&self) -> &Arc<TrustDecisionMaker> {
        &self.trust
    }

    /// Send `request` to `target_url`, with `extra_headers` added on top of the
    /// request's own end-to-end headers.
    pub async fn forward(
        &self,
        request: &LoggedRequest,
        target_url: &str,
        extra_headers: &BTreeMap<String, String>,
    ) -> Result<HttpResponse, ForwardError> {
        let uri: Uri = target_url.parse().map_err(|e: hyper::http::uri::InvalidUri| {
            ForwardError::InvalidUrl {
                url: target_url.to_string(),
                reason: e.to_string(),
            }
        })?;
        let authority = uri
            .authority()
            .map(|a| a.as_str().to_string())
            .ok_or_else(|| ForwardError::InvalidUrl {
                url: target_url.to_string(),
                reason: "missing host".to_string(),
            })?;

        debug!("Forwarding {} {} to {}", request.method, request.url, target_url);

        let mut builder = Request::builder()
            .method(request.method.as_str())
            .uri(uri)
            .header("host", authority);
        for (name, value) in request.headers.iter() {
            if is_hop_by_hop(name)
                || name.eq_ignore_ascii_case("host")
                || name.eq_ignore_ascii_case("content-length")
            {
                continue;
            }
            builder = builder.header(name, value);
        }
        for (name, value) in extra_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let upstream_request = builder.body(Full::new(request.body.clone()))?;

        let upstream_response =
            match tokio::time::timeout(self.request_timeout, self.client.request(upstream_request))
                .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => return Err(ForwardError::Upstream(error_chain(&e))),
                Err(_) => return Err(ForwardError::Timeout(self.request_timeout)),
            };

        let (parts, body) = upstream_response.into_parts();
        let body = body.collect().await?.to_bytes();

        let mut response = HttpResponse::new(parts.status.as_u16());
        for (name, value) in parts.headers.iter() {
            if is_hop_by_hop(name.as_str()) || name == hyper::header::CONTENT_LENGTH {
                continue;
            }
            response
                .headers
                .append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }
        response.headers.set(X_MIMIC_PROXIED, VALUE_TRUE);
        response.body = body;
        Ok(response)
    }
}

/// Render an error with its causes, so trust rejections show up in diagnostics.
fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
