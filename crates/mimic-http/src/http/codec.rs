//! HTTP/1.1 framing read directly off the client connection.
//!
//! The server owns the byte stream for the whole exchange so that fault
//! injection can bypass framing entirely. Request heads and chunk sizes are
//! parsed with `httparse`; the body is delimited by `Content-Length` or
//! chunked transfer coding.

use super::headers::HttpHeaders;
use bytes::Bytes;
use httparse::Status;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

const IO_CHUNK_SIZE: usize = 8 * 1024;
const MAX_HEADERS: usize = 128;

#[derive(Debug, Error)]
pub enum HttpParseError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("request head exceeded {0} bytes")]
    HeadTooLarge(usize),
    #[error("request body exceeded {0} bytes")]
    BodyTooLarge(usize),
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("connection closed mid-request")]
    UnexpectedEof,
}

impl From<httparse::Error> for HttpParseError {
    fn from(e: httparse::Error) -> Self {
        HttpParseError::Malformed(e.to_string())
    }
}

/// Size limits applied while reading a request.
#[derive(Debug, Clone, Copy)]
pub struct CodecLimits {
    pub max_head_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for CodecLimits {
    fn default() -> Self {
        Self {
            max_head_bytes: 64 * 1024,
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

/// A request exactly as it arrived on the wire.
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub method: String,
    /// The request-target: origin form, absolute form, or authority form (CONNECT).
    pub target: String,
    pub version: String,
    pub headers: HttpHeaders,
    pub body: Bytes,
}

impl RawRequest {
    fn from_parsed(req: &httparse::Request<'_, '_>) -> Result<Self, HttpParseError> {
        let (Some(method), Some(target), Some(minor)) = (req.method, req.path, req.version) else {
            return Err(HttpParseError::Malformed("incomplete request line".into()));
        };
        let headers = req
            .headers
            .iter()
            .map(|h| (h.name, String::from_utf8_lossy(h.value).trim().to_string()))
            .collect();
        Ok(Self {
            method: method.to_string(),
            target: target.to_string(),
            version: format!("HTTP/1.{minor}"),
            headers,
            body: Bytes::new(),
        })
    }

    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("CONNECT")
    }

    /// Whether the client expects the connection to stay open after this exchange.
    pub fn keep_alive(&self) -> bool {
        if self.headers.has_token("connection", "close") {
            return false;
        }
        if self.version.eq_ignore_ascii_case("HTTP/1.0") {
            return self.headers.has_token("connection", "keep-alive");
        }
        true
    }
}

/// Client stream plus bytes read past the end of the previous message.
pub struct BufferedConn<C> {
    pub stream: C,
    read_buf: Vec<u8>,
}

impl<C> BufferedConn<C> {
    pub fn new(stream: C) -> Self {
        Self {
            stream,
            read_buf: Vec::with_capacity(IO_CHUNK_SIZE),
        }
    }

    /// Split into the stream and any bytes already buffered but not consumed.
    pub fn into_parts(self) -> (C, Vec<u8>) {
        (self.stream, self.read_buf)
    }
}

impl<C: AsyncRead + Unpin> BufferedConn<C> {
    async fn fill(&mut self) -> std::io::Result<usize> {
        let mut chunk = [0_u8; IO_CHUNK_SIZE];
        let read = self.stream.read(&mut chunk).await?;
        self.read_buf.extend_from_slice(&chunk[..read]);
        Ok(read)
    }

    /// Read more bytes unless `max_bytes` are already buffered without a
    /// complete element; EOF here is always mid-message.
    async fn fill_within(
        &mut self,
        max_bytes: usize,
        on_limit: HttpParseError,
    ) -> Result<(), HttpParseError> {
        if self.read_buf.len() > max_bytes {
            return Err(on_limit);
        }
        if self.fill().await? == 0 {
            return Err(HttpParseError::UnexpectedEof);
        }
        Ok(())
    }

    /// Resolves once the peer has closed the connection or it failed.
    ///
    /// Bytes that arrive meanwhile, such as a pipelined request, stay buffered
    /// for the next read. Past `max_buffered` bytes the peer can no longer be
    /// watched and this never resolves.
    pub async fn closed(&mut self, max_buffered: usize) {
        while self.read_buf.len() <= max_buffered {
            match self.fill().await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        }
        std::future::pending::<()>().await
    }

    async fn read_head(&mut self, max_bytes: usize) -> Result<Option<RawRequest>, HttpParseError> {
        loop {
            if !self.read_buf.is_empty() {
                let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
                let mut req = httparse::Request::new(&mut headers);
                let parsed = match req.parse(&self.read_buf)? {
                    Status::Complete(len) if len > max_bytes => {
                        return Err(HttpParseError::HeadTooLarge(max_bytes));
                    }
                    Status::Complete(len) => Some((len, RawRequest::from_parsed(&req)?)),
                    Status::Partial => None,
                };
                if let Some((len, request)) = parsed {
                    self.read_buf.drain(..len);
                    return Ok(Some(request));
                }
            }
            if self.read_buf.len() > max_bytes {
                return Err(HttpParseError::HeadTooLarge(max_bytes));
            }
            if self.fill().await? == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None);
                }
                return Err(HttpParseError::UnexpectedEof);
            }
        }
    }

    async fn read_exact_bytes(&mut self, len: usize) -> Result<Vec<u8>, HttpParseError> {
        while self.read_buf.len() < len {
            if self.fill().await? == 0 {
                return Err(HttpParseError::UnexpectedEof);
            }
        }
        Ok(self.read_buf.drain(..len).collect())
    }

    async fn read_chunk_size(&mut self, max_line: usize) -> Result<u64, HttpParseError> {
        loop {
            let parsed = match httparse::parse_chunk_size(&self.read_buf) {
                Ok(Status::Complete(parsed)) => Some(parsed),
                Ok(Status::Partial) => None,
                Err(_) => return Err(HttpParseError::Malformed("invalid chunk size".into())),
            };
            if let Some((consumed, size)) = parsed {
                self.read_buf.drain(..consumed);
                return Ok(size);
            }
            self.fill_within(max_line, HttpParseError::Malformed("chunk size line too long".into()))
                .await?;
        }
    }

    /// Consume the trailer section that follows the last chunk.
    async fn skip_trailers(&mut self, max_bytes: usize) -> Result<(), HttpParseError> {
        loop {
            let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let parsed = match httparse::parse_headers(&self.read_buf, &mut headers)? {
                Status::Complete((len, _)) => Some(len),
                Status::Partial => None,
            };
            if let Some(len) = parsed {
                self.read_buf.drain(..len);
                return Ok(());
            }
            self.fill_within(max_bytes, HttpParseError::HeadTooLarge(max_bytes))
                .await?;
        }
    }

    async fn read_chunked_body(&mut self, limits: &CodecLimits) -> Result<Vec<u8>, HttpParseError> {
        let mut body = Vec::new();
        loop {
            let size = self.read_chunk_size(limits.max_head_bytes).await?;
            if size == 0 {
                self.skip_trailers(limits.max_head_bytes).await?;
                return Ok(body);
            }
            let remaining = limits.max_body_bytes.saturating_sub(body.len());
            let size = usize::try_from(size)
                .ok()
                .filter(|size| *size <= remaining)
                .ok_or(HttpParseError::BodyTooLarge(limits.max_body_bytes))?;
            body.extend_from_slice(&self.read_exact_bytes(size).await?);
            if self.read_exact_bytes(2).await? != b"\r\n" {
                return Err(HttpParseError::Malformed("chunk data not followed by CRLF".into()));
            }
        }
    }
}

/// Read the next request off the connection.
///
/// Returns `Ok(None)` when the peer closed cleanly between requests.
pub async fn read_request<C: AsyncRead + Unpin>(
    conn: &mut BufferedConn<C>,
    limits: &CodecLimits,
) -> Result<Option<RawRequest>, HttpParseError> {
    let Some(mut request) = conn.read_head(limits.max_head_bytes).await? else {
        return Ok(None);
    };

    if request.is_connect() {
        return Ok(Some(request));
    }

    let body = if request.headers.has_token("transfer-encoding", "chunked") {
        conn.read_chunked_body(limits).await?
    } else if let Some(length) = request.headers.get("content-length") {
        let length: usize = length
            .parse()
            .map_err(|_| HttpParseError::Malformed(format!("bad content-length '{length}'")))?;
        if length > limits.max_body_bytes {
            return Err(HttpParseError::BodyTooLarge(limits.max_body_bytes));
        }
        conn.read_exact_bytes(length).await?
    } else {
        Vec::new()
    };
    request.body = Bytes::from(body);
    Ok(Some(request))
}
