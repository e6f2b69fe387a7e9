//! CONNECT handling.
//!
//! A CONNECT on the plain listener is never dialled through to the host it
//! names. The tunnel is spliced onto the internal MITM listener instead, and
//! the original target is remembered under the tunnel's local address so the
//! MITM side can tell which host the client believes it is talking to.

use crate::http::{BufferedConn, TunnelInfo};
use crate::server::ClientConnection;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";
const BAD_GATEWAY: &[u8] =
    b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// Original CONNECT targets, keyed by the address the tunnel dials the MITM
/// listener from (which is the peer address the MITM listener sees).
#[derive(Debug, Default)]
pub struct TunnelRegistry {
    tunnels: Mutex<HashMap<SocketAddr, TunnelInfo>>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tunnel_addr: SocketAddr, info: TunnelInfo) {
        self.tunnels.lock().insert(tunnel_addr, info);
    }

    /// Claim the tunnel info for a connection accepted on the MITM listener.
    pub fn take(&self, peer_addr: SocketAddr) -> Option<TunnelInfo> {
        self.tunnels.lock().remove(&peer_addr)
    }

    pub fn len(&self) -> usize {
        self.tunnels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tunnels.lock().is_empty()
    }
}

pub struct TunnelHandler {
    mitm_addr: SocketAddr,
    registry: Arc<TunnelRegistry>,
}

impl TunnelHandler {
    pub fn new(mitm_addr: SocketAddr, registry: Arc<TunnelRegistry>) -> Self {
        Self {
            mitm_addr,
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<TunnelRegistry> {
        &self.registry
    }

    /// Answer a CONNECT for `authority` and pump bytes between the client and
    /// the MITM listener until either side closes.
    pub async fn handle<C: ClientConnection>(
        &self,
        conn: BufferedConn<C>,
        authority: &str,
        client_addr: SocketAddr,
    ) -> io::Result<()> {
        let (mut client, leftover) = conn.into_parts();

        let mut upstream = match TcpStream::connect(self.mitm_addr).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Could not reach MITM listener at {}: {e}", self.mitm_addr);
                let _ = client.write_all(BAD_GATEWAY).await;
                let _ = client.shutdown().await;
                return Err(e);
            }
        };
        upstream.set_nodelay(true)?;
        let tunnel_addr = upstream.local_addr()?;
        self.registry.register(
            tunnel_addr,
            TunnelInfo {
                authority: authority.to_string(),
                client_addr,
            },
        );
        debug!("CONNECT {authority} from {client_addr} tunnelled via {tunnel_addr}");

        let result = self.pump(&mut client, &mut upstream, &leftover).await;
        // Drop the entry if the MITM side never claimed it.
        self.registry.take(tunnel_addr);
        if let Err(e) = &result {
            debug!("Tunnel for {authority} ended with error: {e}");
            let _ = client.set_reset_on_close();
        }
        result
    }

    async fn pump<C: ClientConnection>(
        &self,
        client: &mut C,
        upstream: &mut TcpStream,
        leftover: &[u8],
    ) -> io::Result<()> {
        client.write_all(CONNECTION_ESTABLISHED).await?;
        client.flush().await?;
        if !leftover.is_empty() {
            upstream.write_all(leftover).await?;
        }
        let (from_client, from_upstream) = tokio::io::copy_bidirectional(client, upstream).await?;
        debug!("Tunnel closed: {from_client} bytes up, {from_upstream} bytes down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_is_spliced_onto_mitm_listener() {
        let mitm = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mitm_addr = mitm.local_addr().unwrap();
        let registry = Arc::new(TunnelRegistry::new());
        let handler = TunnelHandler::new(mitm_addr, registry.clone());

        let mitm_side = tokio::spawn(async move {
            let (mut stream, peer) = mitm.accept().await.unwrap();
            let mut buf = [0_u8; 5];
            stream.read_exact(&mut buf).await.unwrap();
            let info = registry.take(peer).unwrap();
            stream.write_all(b"pong").await.unwrap();
            (buf, info)
        });

        let (mut client, server) = tokio::io::duplex(4096);
        let client_addr: SocketAddr = "10.0.0.7:5555".parse().unwrap();
        let conn = BufferedConn::new(server);
        let pump = tokio::spawn(async move {
            handler.handle(conn, "shop.test:443", client_addr).await
        });

        let mut head = vec![0_u8; CONNECTION_ESTABLISHED.len()];
        client.read_exact(&mut head).await.unwrap();
        assert_eq!(head, CONNECTION_ESTABLISHED);
        client.write_all(b"hello").await.unwrap();

        let (seen, info) = mitm_side.await.unwrap();
        assert_eq!(&seen, b"hello");
        assert_eq!(info.authority, "shop.test:443");
        assert_eq!(info.client_addr, client_addr);

        let mut reply = [0_u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"pong");
        drop(client);
        pump.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_mitm_listener_gets_bad_gateway() {
        let gone = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mitm_addr = gone.local_addr().unwrap();
        drop(gone);
        let handler = TunnelHandler::new(mitm_addr, Arc::new(TunnelRegistry::new()));

        let (mut client, server) = tokio::io::duplex(4096);
        let result = handler
            .handle(BufferedConn::new(server), "shop.test:443", "127.0.0.1:1".parse().unwrap())
            .await;
        assert!(result.is_err());
        let mut seen = Vec::new();
        client.read_to_end(&mut seen).await.unwrap();
        assert!(seen.starts_with(b"HTTP/1.1 502"));
        assert!(handler.registry().is_empty());
    }
}
