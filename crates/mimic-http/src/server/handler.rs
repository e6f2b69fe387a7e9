//! Per-connection exchange loop.
//!
//! One task owns a connection from accept to close: optional TLS handshake,
//! then read request, resolve, render, journal, repeated while keep-alive
//! holds.

use super::ClientConnection;
use crate::http::{
    read_request, BufferedConn, CodecLimits, HttpParseError, HttpResponse, ListenerKind,
    LoggedRequest, RawRequest, RequestContext,
};
use crate::journal::{LoggedResponse, RequestJournal, ServeEvent};
use crate::matching::{render_report, MatchEngine, Resolution};
use crate::proxy::headers::{VALUE_TRUE, X_MIMIC_RECORDED};
use crate::proxy::{TunnelHandler, TunnelRegistry};
use crate::recording::Recorder;
use crate::response::ResponseRenderer;
use crate::tls::accept_with_timeout;
use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

/// Everything a connection task needs, shared across both listeners.
pub(crate) struct ServerState {
    pub engine: MatchEngine,
    pub renderer: ResponseRenderer,
    pub journal: Arc<RequestJournal>,
    pub recorder: Arc<Recorder>,
    pub tunnels: TunnelHandler,
    pub tunnel_registry: Arc<TunnelRegistry>,
    pub acceptor: TlsAcceptor,
    pub handshake_timeout: Duration,
    pub limits: CodecLimits,
    /// How long a connection may sit without delivering a request; `None` waits forever.
    pub idle_timeout: Option<Duration>,
    pub keep_alive: bool,
    pub browser_proxying: bool,
}

/// How the connection continues after an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    KeepAlive,
    /// Orderly close.
    Close,
    /// Drop without shutdown; a fault has already dealt with the socket.
    Abandon,
}

pub(crate) async fn serve_plain(state: Arc<ServerState>, stream: TcpStream, peer: SocketAddr) {
    let _ = stream.set_nodelay(true);
    let local_addr = match stream.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            debug!("Dropping connection from {peer}: {e}");
            return;
        }
    };
    let ctx = RequestContext {
        listener: ListenerKind::Plain,
        local_addr,
        client_addr: peer,
        tunnel: None,
    };
    serve_connection(&state, BufferedConn::new(stream), ctx).await;
}

pub(crate) async fn serve_mitm(state: Arc<ServerState>, stream: TcpStream, peer: SocketAddr) {
    let _ = stream.set_nodelay(true);
    let local_addr = match stream.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            debug!("Dropping MITM connection from {peer}: {e}");
            return;
        }
    };
    let tls = match accept_with_timeout(&state.acceptor, stream, state.handshake_timeout).await {
        Ok(tls) => tls,
        Err(e) => {
            debug!("TLS handshake with {peer} failed: {e}");
            state.tunnel_registry.take(peer);
            return;
        }
    };
    // The tunnel registers itself before forwarding the ClientHello, so the
    // entry is in place once the handshake has completed.
    let tunnel = state.tunnel_registry.take(peer);
    let ctx = RequestContext {
        listener: ListenerKind::Mitm,
        local_addr,
        client_addr: peer,
        tunnel,
    };
    serve_connection(&state, BufferedConn::new(tls), ctx).await;
}

async fn serve_connection<C: ClientConnection>(
    state: &ServerState,
    mut conn: BufferedConn<C>,
    ctx: RequestContext,
) {
    loop {
        let read = read_request(&mut conn, &state.limits);
        let parsed = match state.idle_timeout {
            Some(idle) => match tokio::time::timeout(idle, read).await {
                Ok(parsed) => parsed,
                Err(_) => {
                    debug!("Closing idle connection from {}", ctx.client_addr);
                    break;
                }
            },
            None => read.await,
        };
        let raw = match parsed {
            Ok(Some(raw)) => raw,
            Ok(None) => break,
            Err(HttpParseError::Io(e)) => {
                debug!("Connection from {} closed: {e}", ctx.client_addr);
                return;
            }
            Err(HttpParseError::UnexpectedEof) => return,
            Err(e) => {
                debug!("Rejecting request from {}: {e}", ctx.client_addr);
                let _ = HttpResponse::text(400, e.to_string())
                    .write_to(&mut conn.stream, false)
                    .await;
                break;
            }
        };

        if raw.is_connect() {
            if ctx.listener == ListenerKind::Plain {
                let _ = state
                    .tunnels
                    .handle(conn, &raw.target, ctx.client_addr)
                    .await;
                return;
            }
            let _ = HttpResponse::text(400, "CONNECT is not supported inside a tunnel")
                .write_to(&mut conn.stream, false)
                .await;
            break;
        }

        let keep_alive = state.keep_alive && raw.keep_alive();
        match handle_exchange(state, &raw, &ctx, &mut conn, keep_alive).await {
            Ok(Next::KeepAlive) => continue,
            Ok(Next::Close) => break,
            Ok(Next::Abandon) => return,
            Err(e) => {
                debug!("Exchange with {} aborted: {e}", ctx.client_addr);
                return;
            }
        }
    }
    let _ = conn.stream.shutdown().await;
}

async fn handle_exchange<C: ClientConnection>(
    state: &ServerState,
    raw: &RawRequest,
    ctx: &RequestContext,
    conn: &mut BufferedConn<C>,
    keep_alive: bool,
) -> io::Result<Next> {
    let request = LoggedRequest::from_raw(raw, ctx);
    debug!(
        "Received {} {} (absolute {}) from {}",
        request.method, request.url, request.absolute_url, request.client_ip
    );
    let event_id = request.id;
    state.journal.begin(ServeEvent::received(request.clone()));

    let resolution = state.engine.resolve(&request);
    state.journal.record_resolution(
        event_id,
        resolution.stub.clone(),
        resolution.sub_events.clone(),
    );

    let (response, next) = match &resolution.stub {
        Some(stub) => {
            debug!("Matched stub {} for {} {}", stub.id, request.method, request.url);
            let outcome = state
                .renderer
                .render(&stub.response, &request, conn, keep_alive)
                .await?;
            state.engine.registry().scenarios().on_stub_served(stub);
            let next = if outcome.response.fault.is_some() {
                Next::Abandon
            } else if outcome.close_connection {
                Next::Close
            } else {
                Next::KeepAlive
            };
            (outcome.response, next)
        }
        None => {
            let response = serve_unmatched(state, &request, &resolution).await;
            response
                .write_for_method(&request.method, &mut conn.stream, keep_alive)
                .await?;
            let next = if keep_alive { Next::KeepAlive } else { Next::Close };
            (LoggedResponse::from_response(&response), next)
        }
    };

    state.journal.finalize(event_id, response);
    Ok(next)
}

/// Recording, browser pass-through, or the near-miss report, in that order.
async fn serve_unmatched(
    state: &ServerState,
    request: &LoggedRequest,
    resolution: &Resolution,
) -> HttpResponse {
    let pass_through = state.browser_proxying && request.is_browser_proxy_request;

    if state.recorder.is_recording() {
        let target = if pass_through {
            Some(request.absolute_url.clone())
        } else {
            state.recorder.target_for(request)
        };
        if let Some(target) = target {
            let response = forward(state, request, &target).await;
            if state.recorder.capture(request, &response) {
                return response.with_header(X_MIMIC_RECORDED, VALUE_TRUE);
            }
            return response;
        }
    }

    if pass_through {
        return forward(state, request, &request.absolute_url).await;
    }

    debug!("No stub matched {} {}", request.method, request.url);
    HttpResponse::text(404, render_report(request, &resolution.near_misses))
}

async fn forward(state: &ServerState, request: &LoggedRequest, target: &str) -> HttpResponse {
    state
        .renderer
        .forwarder()
        .forward(request, target, &BTreeMap::new())
        .await
        .unwrap_or_else(|e| {
            warn!("Forwarding {} {} to {target} failed: {e}", request.method, request.url);
            HttpResponse::text(502, format!("Upstream request to {target} failed: {e}"))
        })
}
