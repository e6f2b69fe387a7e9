//! Outbound response serialization.

use super::headers::HttpHeaders;
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: Option<String>,
    pub headers: HttpHeaders,
    pub body: Bytes,
}

/// How the body of a response is framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    ContentLength,
    Chunked,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: None,
            headers: HttpHeaders::new(),
            body: Bytes::new(),
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        let mut response = Self::new(status);
        response
            .headers
            .set("Content-Type", "text/plain; charset=utf-8");
        response.body = Bytes::from(body.into());
        response
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn reason_phrase(&self) -> &str {
        match &self.reason {
            Some(reason) => reason,
            None => hyper::StatusCode::from_u16(self.status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or(""),
        }
    }

    /// 1xx, 204 and 304 responses never carry a body.
    pub fn status_allows_body(&self) -> bool {
        !(100..200).contains(&self.status) && self.status != 204 && self.status != 304
    }

    /// Serialize the status line and headers, replacing any framing headers
    /// from the definition with ones that describe how the body will be sent.
    pub fn head_bytes(&self, framing: Framing, keep_alive: bool) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason_phrase());
        for (name, value) in self.headers.iter() {
            if name.eq_ignore_ascii_case("content-length")
                || name.eq_ignore_ascii_case("transfer-encoding")
                || name.eq_ignore_ascii_case("connection")
            {
                continue;
            }
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        if self.status_allows_body() {
            match framing {
                Framing::ContentLength => {
                    head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
                }
                Framing::Chunked => head.push_str("Transfer-Encoding: chunked\r\n"),
            }
        }
        if !keep_alive {
            head.push_str("Connection: close\r\n");
        }
        head.push_str("\r\n");
        head.into_bytes()
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
        keep_alive: bool,
    ) -> std::io::Result<()> {
        let mut bytes = self.head_bytes(Framing::ContentLength, keep_alive);
        if self.status_allows_body() {
            bytes.extend_from_slice(&self.body);
        }
        writer.write_all(&bytes).await?;
        writer.flush().await
    }

    /// Write the response to a request made with `method`. A HEAD reply
    /// keeps the `Content-Length` of the body it leaves out.
    pub async fn write_for_method<W: AsyncWrite + Unpin>(
        &self,
        method: &str,
        writer: &mut W,
        keep_alive: bool,
    ) -> std::io::Result<()> {
        if !method.eq_ignore_ascii_case("HEAD") {
            return self.write_to(writer, keep_alive).await;
        }
        writer
            .write_all(&self.head_bytes(Framing::ContentLength, keep_alive))
            .await?;
        writer.flush().await
    }
}

/// Encode one chunk of a chunked body.
pub fn encode_chunk(data: &[u8]) -> Vec<u8> {
    let mut out = format!("{:x}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_sets_content_length() {
        let response = HttpResponse::text(200, "hello").with_header("Content-Length", "999");
        let mut out = Vec::new();
        response.write_to(&mut out, true).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(!text.contains("999"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn test_custom_reason_and_close() {
        let mut response = HttpResponse::new(418);
        response.reason = Some("Short And Stout".to_string());
        let head = String::from_utf8(response.head_bytes(Framing::Chunked, false)).unwrap();
        assert!(head.starts_with("HTTP/1.1 418 Short And Stout\r\n"));
        assert!(head.contains("Transfer-Encoding: chunked\r\n"));
        assert!(head.contains("Connection: close\r\n"));
    }

    #[test]
    fn test_encode_chunk() {
        assert_eq!(encode_chunk(b"abcdefghijk"), b"b\r\nabcdefghijk\r\n".to_vec());
    }

    #[tokio::test]
    async fn test_head_reply_has_length_but_no_body() {
        let response = HttpResponse::text(200, "hello");
        let mut out = Vec::new();
        response.write_for_method("HEAD", &mut out, true).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_no_content_statuses_drop_body_and_framing() {
        for status in [101, 204, 304] {
            let mut response = HttpResponse::new(status);
            response.body = Bytes::from_static(b"ignored");
            let mut out = Vec::new();
            response.write_for_method("GET", &mut out, true).await.unwrap();
            let text = String::from_utf8(out).unwrap();
            assert!(!text.contains("Content-Length"), "{text}");
            assert!(text.ends_with("\r\n\r\n"), "{text}");
        }
    }
}
