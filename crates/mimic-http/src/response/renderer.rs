//! Turns a response definition into bytes on the client connection.

use super::fault;
use crate::http::{encode_chunk, BufferedConn, Framing, HttpResponse, LoggedRequest, LAST_CHUNK};
use crate::journal::LoggedResponse;
use crate::proxy::Forwarder;
use crate::server::ClientConnection;
use crate::stubs::{ChunkedDribbleDelay, ResponseDefinition};
use base64::Engine;
use bytes::Bytes;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Bytes a client may pipeline behind a delayed request while it is still
/// watched for hang-up.
const MAX_PIPELINED_BYTES: usize = 64 * 1024;

/// What was sent, and whether the connection can carry another exchange.
#[derive(Debug)]
pub struct RenderOutcome {
    pub response: LoggedResponse,
    pub close_connection: bool,
}

pub struct ResponseRenderer {
    files_root: Option<PathBuf>,
    forwarder: Arc<Forwarder>,
    shutdown: CancellationToken,
}

impl ResponseRenderer {
    pub fn new(
        files_root: Option<PathBuf>,
        forwarder: Arc<Forwarder>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            files_root,
            forwarder,
            shutdown,
        }
    }

    pub fn forwarder(&self) -> &Arc<Forwarder> {
        &self.forwarder
    }

    /// Render `definition` for `request` onto `conn`.
    ///
    /// The configured delay runs before the first byte and is abandoned if
    /// the client hangs up or the server stops. A fault replaces the whole
    /// response and always closes the connection.
    pub async fn render<C: ClientConnection>(
        &self,
        definition: &ResponseDefinition,
        request: &LoggedRequest,
        conn: &mut BufferedConn<C>,
        keep_alive: bool,
    ) -> io::Result<RenderOutcome> {
        let delay_ms = definition.initial_delay_millis();
        if delay_ms > 0 {
            debug!("Delaying response by {delay_ms}ms");
            tokio::select! {
                completed = super::delay::delay(delay_ms, &self.shutdown) => {
                    if !completed {
                        return Err(io::Error::new(io::ErrorKind::Interrupted, "server shutting down"));
                    }
                }
                _ = conn.closed(MAX_PIPELINED_BYTES) => {
                    return Err(io::Error::new(
                        io::ErrorKind::ConnectionAborted,
                        "client closed the connection during the delay",
                    ));
                }
            }
        }

        let conn = &mut conn.stream;
        if let Some(fault) = definition.fault {
            fault::inject(fault, conn).await;
            return Ok(RenderOutcome {
                response: LoggedResponse::from_fault(fault),
                close_connection: true,
            });
        }

        let response = self.build(definition, request).await;
        let sends_body =
            response.status_allows_body() && !request.method.eq_ignore_ascii_case("HEAD");
        match &definition.chunked_dribble_delay {
            Some(dribble) if sends_body => {
                self.write_dribbled(&response, dribble, conn, keep_alive).await?
            }
            _ => {
                response
                    .write_for_method(&request.method, conn, keep_alive)
                    .await?
            }
        }
        Ok(RenderOutcome {
            response: LoggedResponse::from_response(&response),
            close_connection: !keep_alive,
        })
    }

    /// Build the response that a non-fault definition describes.
    pub async fn build(&self, definition: &ResponseDefinition, request: &LoggedRequest) -> HttpResponse {
        if let Some(base_url) = &definition.proxy_base_url {
            let target = format!("{}{}", base_url.trim_end_matches('/'), request.url);
            return self
                .forwarder
                .forward(request, &target, &definition.additional_proxy_request_headers)
                .await
                .unwrap_or_else(|e| {
                    warn!("Proxying to {target} failed: {e}");
                    HttpResponse::text(502, format!("Upstream request to {target} failed: {e}"))
                });
        }

        let mut response = HttpResponse::new(definition.status);
        response.reason = definition.status_message.clone();
        for (name, value) in &definition.headers {
            response.headers.append(name.as_str(), value.as_str());
        }

        let body = if let Some(text) = &definition.body {
            Ok(Bytes::from(text.clone()))
        } else if let Some(encoded) = &definition.base64_body {
            base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map(Bytes::from)
                .map_err(|e| format!("base64Body is not valid base64: {e}"))
        } else if let Some(json) = &definition.json_body {
            if !response.headers.contains("content-type") {
                response.headers.set("Content-Type", "application/json");
            }
            serde_json::to_vec(json)
                .map(Bytes::from)
                .map_err(|e| e.to_string())
        } else if let Some(file_name) = &definition.body_file_name {
            self.read_body_file(file_name).await
        } else {
            Ok(Bytes::new())
        };

        match body {
            Ok(body) => {
                response.body = body;
                response
            }
            Err(message) => {
                warn!("Could not render response body: {message}");
                HttpResponse::text(500, message)
            }
        }
    }

    async fn read_body_file(&self, file_name: &str) -> Result<Bytes, String> {
        let root = self
            .files_root
            .as_deref()
            .ok_or_else(|| format!("bodyFileName '{file_name}' set but no files_root configured"))?;
        let relative = Path::new(file_name);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(format!("bodyFileName '{file_name}' must stay inside files_root"));
        }
        tokio::fs::read(root.join(relative))
            .await
            .map(Bytes::from)
            .map_err(|e| format!("could not read body file '{file_name}': {e}"))
    }

    async fn write_dribbled<C: ClientConnection>(
        &self,
        response: &HttpResponse,
        dribble: &ChunkedDribbleDelay,
        conn: &mut C,
        keep_alive: bool,
    ) -> io::Result<()> {
        conn.write_all(&response.head_bytes(Framing::Chunked, keep_alive))
            .await?;
        conn.flush().await?;

        let chunks = split_evenly(&response.body, dribble.number_of_chunks.max(1) as usize);
        let pause = Duration::from_millis(dribble.total_duration / chunks.len().max(1) as u64);
        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 {
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = self.shutdown.cancelled() => {
                        return Err(io::Error::new(io::ErrorKind::Interrupted, "server shutting down"));
                    }
                }
            }
            conn.write_all(&encode_chunk(chunk)).await?;
            conn.flush().await?;
        }
        conn.write_all(LAST_CHUNK).await?;
        conn.flush().await
    }
}

/// Split into at most `parts` non-empty slices of near-equal size.
fn split_evenly(body: &[u8], parts: usize) -> Vec<&[u8]> {
    if body.is_empty() {
        return Vec::new();
    }
    let parts = parts.min(body.len());
    let base = body.len() / parts;
    let extra = body.len() % parts;
    let mut out = Vec::with_capacity(parts);
    let mut start = 0;
    for i in 0..parts {
        let len = base + usize::from(i < extra);
        out.push(&body[start..start + len]);
        start += len;
    }
    out
}
