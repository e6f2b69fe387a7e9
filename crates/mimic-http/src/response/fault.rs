//! Transport-level faults written straight onto the client connection.
//!
//! These bypass HTTP framing on purpose. After a fault the exchange is over
//! and the caller drops the connection.

use crate::server::ClientConnection;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::debug;

const MALFORMED_CHUNK_HEAD: &[u8] = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n";
const MALFORMED_CHUNK_BODY: &[u8] = b"zz;not-a-size\r\n\x00\x01garbage\r\n";
const GARBAGE_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Fault {
    /// Close with zero linger so the peer sees a reset.
    ConnectionResetByPeer,
    /// Close without writing anything.
    EmptyResponse,
    /// Valid status line and headers, then an unparseable chunk.
    MalformedResponseChunk,
    /// Random bytes with no framing, then close.
    RandomDataThenClose,
}

impl Fault {
    pub fn as_str(&self) -> &'static str {
        match self {
            Fault::ConnectionResetByPeer => "CONNECTION_RESET_BY_PEER",
            Fault::EmptyResponse => "EMPTY_RESPONSE",
            Fault::MalformedResponseChunk => "MALFORMED_RESPONSE_CHUNK",
            Fault::RandomDataThenClose => "RANDOM_DATA_THEN_CLOSE",
        }
    }
}

/// Corrupt the connection. I/O errors are swallowed.
pub async fn inject<C: ClientConnection>(fault: Fault, conn: &mut C) {
    debug!("Injecting fault {}", fault.as_str());
    let outcome = match fault {
        Fault::ConnectionResetByPeer => conn.set_reset_on_close(),
        Fault::EmptyResponse => conn.shutdown().await,
        Fault::MalformedResponseChunk => {
            write_then_close(conn, &[MALFORMED_CHUNK_HEAD, MALFORMED_CHUNK_BODY].concat()).await
        }
        Fault::RandomDataThenClose => {
            let mut garbage = vec![0_u8; GARBAGE_LEN];
            rand::thread_rng().fill_bytes(&mut garbage);
            write_then_close(conn, &garbage).await
        }
    };
    if let Err(e) = outcome {
        debug!("Ignoring I/O error while injecting {}: {e}", fault.as_str());
    }
}

async fn write_then_close<C: ClientConnection>(conn: &mut C, bytes: &[u8]) -> std::io::Result<()> {
    conn.write_all(bytes).await?;
    conn.flush().await?;
    conn.shutdown().await
}
