//! The running server: a plain HTTP listener that also accepts proxy and
//! CONNECT traffic, and an internal MITM TLS listener that CONNECT tunnels
//! are spliced onto.

mod connection;
mod handler;
mod listener;

pub use connection::ClientConnection;
pub use listener::bind_listener;

use crate::admin::Admin;
use crate::config::Config;
use crate::journal::RequestJournal;
use crate::matching::MatchEngine;
use crate::notify::{Notifier, TracingNotifier};
use crate::proxy::{Forwarder, TunnelHandler, TunnelRegistry};
use crate::recording::Recorder;
use crate::response::ResponseRenderer;
use crate::stubs::{ScenarioTable, StubRegistry};
use crate::tls::{
    mitm_acceptor, CertificateAuthority, DynamicCertificateIssuer, Identity, IdentitySelector,
    SniCertResolver,
};
use anyhow::Context;
use handler::ServerState;
use listener::accept_loop;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct MockServer {
    admin: Admin,
    http_addr: SocketAddr,
    mitm_addr: SocketAddr,
    authority: Option<Arc<CertificateAuthority>>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl MockServer {
    pub async fn start(config: Config) -> Result<Self, anyhow::Error> {
        Self::start_with_notifier(config, Arc::new(TracingNotifier)).await
    }

    pub async fn start_with_notifier(
        config: Config,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, anyhow::Error> {
        config.validate()?;

        let registry = Arc::new(StubRegistry::new(Arc::new(ScenarioTable::new())));
        for stub in config.stubs.iter().cloned() {
            let id = stub.id;
            registry
                .add(stub)
                .with_context(|| format!("Failed to register configured stub {id}"))?;
        }
        let journal = Arc::new(RequestJournal::new(
            config.journal.max_entries,
            config.journal.enabled,
        ));
        let recorder = Arc::new(Recorder::new());
        let engine = MatchEngine::new(registry.clone(), config.journal.near_miss_limit);

        let trust = Arc::new(
            config
                .proxy
                .trust
                .build()
                .context("Failed to build upstream trust policy")?,
        );
        let forwarder = Arc::new(Forwarder::with_settings(
            trust,
            &config.proxy.connection_pool.client_settings(),
        )?);

        let (authority, acceptor) = build_mitm_tls(&config, notifier)?;

        let shutdown = CancellationToken::new();
        let http_bind = config.http_addr()?;
        let http_listener = bind_listener(http_bind)
            .with_context(|| format!("Failed to bind HTTP listener on {http_bind}"))?;
        let mitm_bind = config.mitm_addr()?;
        let mitm_listener = bind_listener(mitm_bind)
            .with_context(|| format!("Failed to bind MITM listener on {mitm_bind}"))?;
        let http_addr = http_listener.local_addr()?;
        let mitm_addr = mitm_listener.local_addr()?;

        let tunnel_registry = Arc::new(TunnelRegistry::new());
        let state = Arc::new(ServerState {
            engine: engine.clone(),
            renderer: ResponseRenderer::new(
                config.files_root.clone(),
                forwarder,
                shutdown.clone(),
            ),
            journal: journal.clone(),
            recorder: recorder.clone(),
            tunnels: TunnelHandler::new(dialable(mitm_addr), tunnel_registry.clone()),
            tunnel_registry,
            acceptor,
            handshake_timeout: Duration::from_millis(config.tls.handshake_timeout_ms),
            limits: config.listen.limits(),
            idle_timeout: config.listen.idle_timeout(),
            keep_alive: config.listen.keep_alive,
            browser_proxying: config.proxy.browser_proxying,
        });

        info!("Listening on http://{http_addr}");
        info!("MITM listener on {mitm_addr}");
        info!("Loaded {} stubs", registry.len());
        if config.proxy.browser_proxying {
            info!("Browser proxying enabled");
        }

        let max_connections = config.listen.max_connections;
        let plain_state = state.clone();
        let plain = tokio::spawn(accept_loop(
            "http",
            http_listener,
            max_connections,
            shutdown.clone(),
            move |stream, peer| handler::serve_plain(plain_state.clone(), stream, peer),
        ));
        let mitm_state = state;
        let mitm = tokio::spawn(accept_loop(
            "mitm",
            mitm_listener,
            max_connections,
            shutdown.clone(),
            move |stream, peer| handler::serve_mitm(mitm_state.clone(), stream, peer),
        ));

        Ok(Self {
            admin: Admin::new(registry, journal, recorder, engine.analyzer()),
            http_addr,
            mitm_addr,
            authority,
            shutdown,
            tasks: vec![plain, mitm],
        })
    }

    pub fn admin(&self) -> &Admin {
        &self.admin
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn mitm_addr(&self) -> SocketAddr {
        self.mitm_addr
    }

    /// `http://host:port` of the plain listener.
    pub fn base_url(&self) -> String {
        format!("http://{}", dialable(self.http_addr))
    }

    /// PEM certificate clients must trust to accept intercepted connections.
    pub fn ca_cert_pem(&self) -> Option<&str> {
        self.authority.as_ref().map(|ca| ca.cert_pem())
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop accepting, interrupt in-flight delays, and wait for the listeners.
    pub async fn stop(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        info!("Server stopped");
    }
}

/// Load or generate the CA and default identity, and build the MITM acceptor.
fn build_mitm_tls(
    config: &Config,
    notifier: Arc<dyn Notifier>,
) -> Result<(Option<Arc<CertificateAuthority>>, tokio_rustls::TlsAcceptor), anyhow::Error> {
    let authority = match CertificateAuthority::load_or_generate(
        config.ca.cert_path.as_deref(),
        config.ca.key_path.as_deref(),
        &config.ca.common_name,
    ) {
        Ok(ca) => Some(Arc::new(ca)),
        Err(e) if config.tls.cert_path.is_some() => {
            warn!(
                "Certificate authority unavailable, MITM listener will present the configured certificate only: {e}"
            );
            None
        }
        Err(e) => return Err(e).context("Failed to set up the certificate authority"),
    };

    let default_identity = match (&config.tls.cert_path, &config.tls.key_path, &authority) {
        (Some(cert), Some(key), _) => Identity::from_pem_files(cert, key)
            .context("Failed to load the MITM listener certificate")?,
        (_, _, Some(ca)) => ca
            .issue("localhost", config.ca.leaf_validity_days)
            .context("Failed to issue the default MITM certificate")?,
        _ => anyhow::bail!("No certificate available for the MITM listener"),
    };

    let selector: Arc<dyn IdentitySelector> = match &authority {
        Some(ca) => Arc::new(DynamicCertificateIssuer::new(
            ca.clone(),
            config.ca.leaf_validity_days,
            notifier,
        )),
        None => Arc::new(DynamicCertificateIssuer::degraded(notifier)),
    };
    let resolver = Arc::new(SniCertResolver::new(selector, Some(default_identity)));
    Ok((authority, mitm_acceptor(resolver)?))
}

/// Replace an unspecified bind address with loopback so it can be dialled.
fn dialable(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(Ipv4Addr::LOCALHOST.into(), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(Ipv6Addr::LOCALHOST.into(), addr.port())
        }
        _ => addr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialable_rewrites_unspecified_address() {
        let any: SocketAddr = "0.0.0.0:8080".parse().unwrap();
        assert_eq!(dialable(any).to_string(), "127.0.0.1:8080");
        let v6: SocketAddr = "[::]:9000".parse().unwrap();
        assert_eq!(dialable(v6).to_string(), "[::1]:9000");
        let fixed: SocketAddr = "10.1.2.3:80".parse().unwrap();
        assert_eq!(dialable(fixed), fixed);
    }

    #[tokio::test]
    async fn test_start_with_ephemeral_ports() {
        let mut config = Config::default();
        config.listen.port = 0;
        let server = MockServer::start(config).await.unwrap();
        assert_ne!(server.http_addr().port(), 0);
        assert_ne!(server.mitm_addr().port(), 0);
        assert!(server.ca_cert_pem().unwrap().contains("BEGIN CERTIFICATE"));
        assert!(server.base_url().starts_with("http://127.0.0.1:"));
        server.stop().await;
    }

    #[tokio::test]
    async fn test_start_rejects_missing_ca_key_without_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.listen.port = 0;
        config.ca.cert_path = Some(dir.path().join("ca.pem"));
        config.ca.key_path = Some(dir.path().join("ca.key"));
        std::fs::write(dir.path().join("ca.pem"), "not a certificate").unwrap();
        assert!(MockServer::start(config).await.is_err());
    }
}
