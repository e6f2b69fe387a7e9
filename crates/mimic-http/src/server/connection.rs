//! The raw client connection, as seen by the exchange pipeline.
//!
//! Fault injection needs the socket itself rather than an HTTP response
//! writer, so the connection is passed explicitly down to the renderer.

use socket2::SockRef;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;

pub trait ClientConnection: AsyncRead + AsyncWrite + Unpin + Send {
    /// Arrange for the next close to be a hard reset (RST) rather than an
    /// orderly FIN. The caller must drop the connection without shutting it
    /// down afterwards.
    fn set_reset_on_close(&mut self) -> io::Result<()>;
}

impl ClientConnection for TcpStream {
    fn set_reset_on_close(&mut self) -> io::Result<()> {
        SockRef::from(&*self).set_linger(Some(Duration::ZERO))
    }
}

impl<C: ClientConnection> ClientConnection for tokio_rustls::server::TlsStream<C> {
    fn set_reset_on_close(&mut self) -> io::Result<()> {
        self.get_mut().0.set_reset_on_close()
    }
}

/// In-memory connections have no reset; closing them is an ordinary EOF.
impl ClientConnection for DuplexStream {
    fn set_reset_on_close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_reset_on_close_is_seen_as_reset_by_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        server.set_reset_on_close().unwrap();
        drop(server);

        let mut buf = [0_u8; 16];
        let err = client.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }
}
