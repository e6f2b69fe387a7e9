//! Server-side TLS for the MITM listener.

use super::identity::SniCertResolver;
use super::{crypto_provider, CertificateError};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

/// Only HTTP/1.1 is spoken on intercepted connections.
pub const HTTP1_ALPN: &[u8] = b"http/1.1";

/// Build an acceptor that picks its certificate per handshake from `resolver`.
pub fn mitm_acceptor(resolver: Arc<SniCertResolver>) -> Result<TlsAcceptor, CertificateError> {
    let mut config = rustls::ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(resolver);
    config.alpn_protocols = vec![HTTP1_ALPN.to_vec()];
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Run the server handshake, giving up after `timeout`.
pub async fn accept_with_timeout<IO>(
    acceptor: &TlsAcceptor,
    stream: IO,
    timeout: Duration,
) -> io::Result<TlsStream<IO>>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::time::timeout(timeout, acceptor.accept(stream)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "TLS handshake timed out",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::{CertificateAuthority, DynamicCertificateIssuer, IdentitySelector};
    use crate::notify::TracingNotifier;
    use rustls::pki_types::ServerName;
    use tokio_rustls::TlsConnector;

    #[tokio::test]
    async fn test_handshake_presents_minted_leaf_with_http1_alpn() {
        let ca = Arc::new(CertificateAuthority::generate("Acceptor CA").unwrap());
        let default = ca.issue("localhost", 30).unwrap();
        let issuer: Arc<dyn IdentitySelector> = Arc::new(DynamicCertificateIssuer::new(
            ca.clone(),
            30,
            Arc::new(TracingNotifier),
        ));
        let acceptor =
            mitm_acceptor(Arc::new(SniCertResolver::new(issuer, Some(default)))).unwrap();

        let mut roots = rustls::RootCertStore::empty();
        roots.add(ca.cert_der().clone()).unwrap();
        let mut client_config = rustls::ClientConfig::builder_with_provider(crypto_provider())
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();
        client_config.alpn_protocols = vec![b"h2".to_vec(), HTTP1_ALPN.to_vec()];
        let connector = TlsConnector::from(Arc::new(client_config));

        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(async move {
            accept_with_timeout(&acceptor, server_io, Duration::from_secs(5)).await
        });
        let client = connector
            .connect(ServerName::try_from("shop.test").unwrap(), client_io)
            .await
            .unwrap();
        let server = server.await.unwrap().unwrap();

        let (_, session) = client.get_ref();
        assert_eq!(session.alpn_protocol(), Some(HTTP1_ALPN));
        let chain = session.peer_certificates().unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(&chain[1], ca.cert_der());
        assert_eq!(server.get_ref().1.server_name(), Some("shop.test"));
    }

    #[tokio::test]
    async fn test_handshake_times_out_when_client_is_silent() {
        let ca = Arc::new(CertificateAuthority::generate("Timeout CA").unwrap());
        let default = ca.issue("localhost", 30).unwrap();
        let issuer: Arc<dyn IdentitySelector> =
            Arc::new(DynamicCertificateIssuer::new(ca, 30, Arc::new(TracingNotifier)));
        let acceptor =
            mitm_acceptor(Arc::new(SniCertResolver::new(issuer, Some(default)))).unwrap();

        let (_client_io, server_io) = tokio::io::duplex(1024);
        let err = accept_with_timeout(&acceptor, server_io, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
