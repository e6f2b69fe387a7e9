//! The request as seen by matching, recording and the journal.

use super::codec::RawRequest;
use super::headers::HttpHeaders;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::net::SocketAddr;
use uuid::Uuid;

/// Which listener a connection was accepted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerKind {
    /// Plain HTTP listener; also accepts CONNECT and absolute-URI proxy traffic.
    Plain,
    /// Internal TLS listener fed by CONNECT tunnels.
    Mitm,
}

/// Original CONNECT target for a connection arriving through a tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelInfo {
    /// `host:port` from the CONNECT request line.
    pub authority: String,
    /// Address of the client that sent the CONNECT.
    pub client_addr: SocketAddr,
}

/// Connection-level facts needed to interpret a request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub listener: ListenerKind,
    pub local_addr: SocketAddr,
    pub client_addr: SocketAddr,
    pub tunnel: Option<TunnelInfo>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedRequest {
    pub id: Uuid,
    pub method: String,
    /// Path and query as the client addressed them.
    pub url: String,
    /// Effective target URL, reflecting the original absolute target for proxy requests.
    pub absolute_url: String,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub client_ip: String,
    pub headers: HttpHeaders,
    pub cookies: Vec<(String, String)>,
    pub query_parameters: Vec<(String, String)>,
    #[serde(rename = "bodyAsBase64", serialize_with = "serialize_base64")]
    pub body: Bytes,
    pub is_browser_proxy_request: bool,
    pub logged_date: DateTime<Utc>,
}

fn serialize_base64<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(body))
}

impl LoggedRequest {
    pub fn from_raw(raw: &RawRequest, ctx: &RequestContext) -> Self {
        let host_header = raw.headers.get("host").map(str::to_string);

        let (scheme, authority, url, absolute_url, is_proxy) =
            if let Some((scheme, rest)) = split_absolute_uri(&raw.target) {
                let (authority, path) = match rest.find('/') {
                    Some(i) => (&rest[..i], &rest[i..]),
                    None => match rest.find('?') {
                        Some(i) => (&rest[..i], &rest[i..]),
                        None => (rest, "/"),
                    },
                };
                let url = if path.starts_with('?') {
                    format!("/{path}")
                } else {
                    path.to_string()
                };
                (
                    scheme.to_string(),
                    authority.to_string(),
                    url,
                    raw.target.clone(),
                    true,
                )
            } else if let Some(tunnel) = &ctx.tunnel {
                let authority = host_header.unwrap_or_else(|| tunnel.authority.clone());
                let absolute = format!("https://{authority}{}", raw.target);
                ("https".to_string(), authority, raw.target.clone(), absolute, true)
            } else {
                let scheme = match ctx.listener {
                    ListenerKind::Plain => "http",
                    ListenerKind::Mitm => "https",
                };
                let authority = host_header.unwrap_or_else(|| ctx.local_addr.to_string());
                let absolute = format!("{scheme}://{authority}{}", raw.target);
                (scheme.to_string(), authority, raw.target.clone(), absolute, false)
            };

        let default_port = if scheme == "https" { 443 } else { 80 };
        let (host, port) = split_authority(&authority, default_port);

        Self {
            id: Uuid::new_v4(),
            method: raw.method.to_ascii_uppercase(),
            query_parameters: parse_query(&url),
            url,
            absolute_url,
            scheme,
            host,
            port,
            client_ip: ctx
                .tunnel
                .as_ref()
                .map(|t| t.client_addr)
                .unwrap_or(ctx.client_addr)
                .ip()
                .to_string(),
            cookies: parse_cookies(&raw.headers),
            headers: raw.headers.clone(),
            body: raw.body.clone(),
            is_browser_proxy_request: is_proxy,
            logged_date: Utc::now(),
        }
    }

    /// A direct (non-proxy) request to `localhost`, for evaluating patterns
    /// outside of a live connection.
    pub fn new(method: &str, url: &str) -> Self {
        let local = SocketAddr::from(([127, 0, 0, 1], 80));
        let raw = RawRequest {
            method: method.to_string(),
            target: url.to_string(),
            version: "HTTP/1.1".to_string(),
            headers: [("Host", "localhost")].into_iter().collect(),
            body: Bytes::new(),
        };
        Self::from_raw(
            &raw,
            &RequestContext {
                listener: ListenerKind::Plain,
                local_addr: local,
                client_addr: local,
                tunnel: None,
            },
        )
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.append(name, value);
        if name.eq_ignore_ascii_case("cookie") {
            self.cookies = parse_cookies(&self.headers);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Path component of the url, without query string.
    pub fn path(&self) -> &str {
        self.url.split('?').next().unwrap_or("/")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn query_values(&self, name: &str) -> Vec<&str> {
        self.query_parameters
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn body_as_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn split_absolute_uri(target: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = target.split_once("://")?;
    if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https") {
        Some((scheme, rest))
    } else {
        None
    }
}

/// Split `host[:port]`, handling bracketed IPv6 literals.
pub fn split_authority(authority: &str, default_port: u16) -> (String, u16) {
    if let Some(rest) = authority.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail
                .strip_prefix(':')
                .and_then(|p| p.parse().ok())
                .unwrap_or(default_port);
            return (host.to_string(), port);
        }
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (authority.to_string(), default_port),
        },
        _ => (authority.to_string(), default_port),
    }
}

fn parse_query(url: &str) -> Vec<(String, String)> {
    let Some((_, query)) = url.split_once('?') else {
        return Vec::new();
    };
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(k), decode(v))
        })
        .collect()
}

fn decode(component: &str) -> String {
    let plus_decoded = component.replace('+', " ");
    urlencoding::decode(&plus_decoded)
        .map(|s| s.into_owned())
        .unwrap_or(plus_decoded)
}

fn parse_cookies(headers: &HttpHeaders) -> Vec<(String, String)> {
    headers
        .get_all("cookie")
        .iter()
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| {
            let (k, v) = pair.trim().split_once('=')?;
            Some((k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(method: &str, target: &str, headers: &[(&str, &str)]) -> RawRequest {
        RawRequest {
            method: method.to_string(),
            target: target.to_string(),
            version: "HTTP/1.1".to_string(),
            headers: headers.iter().copied().collect(),
            body: Bytes::new(),
        }
    }

    fn ctx(listener: ListenerKind, tunnel: Option<TunnelInfo>) -> RequestContext {
        RequestContext {
            listener,
            local_addr: "127.0.0.1:9000".parse().unwrap(),
            client_addr: "127.0.0.1:50000".parse().unwrap(),
            tunnel,
        }
    }

    #[test]
    fn test_direct_request_uses_host_header() {
        let request = LoggedRequest::from_raw(
            &raw("get", "/widget?colour=red&size=big+one", &[("Host", "api.local:8080")]),
            &ctx(ListenerKind::Plain, None),
        );
        assert_eq!(request.method, "GET");
        assert_eq!(request.absolute_url, "http://api.local:8080/widget?colour=red&size=big+one");
        assert_eq!(request.host, "api.local");
        assert_eq!(request.port, 8080);
        assert_eq!(request.path(), "/widget");
        assert_eq!(request.query_values("size"), vec!["big one"]);
        assert!(!request.is_browser_proxy_request);
    }

    #[test]
    fn test_direct_request_without_host_uses_listener_address() {
        let request =
            LoggedRequest::from_raw(&raw("GET", "/", &[]), &ctx(ListenerKind::Plain, None));
        assert_eq!(request.absolute_url, "http://127.0.0.1:9000/");
    }

    #[test]
    fn test_absolute_uri_is_a_proxy_request() {
        let request = LoggedRequest::from_raw(
            &raw("GET", "http://upstream.test/a/b?x=1", &[("Host", "upstream.test")]),
            &ctx(ListenerKind::Plain, None),
        );
        assert!(request.is_browser_proxy_request);
        assert_eq!(request.absolute_url, "http://upstream.test/a/b?x=1");
        assert_eq!(request.url, "/a/b?x=1");
        assert_eq!(request.port, 80);
    }

    #[test]
    fn test_tunnelled_request_reflects_original_target() {
        let tunnel = TunnelInfo {
            authority: "secure.test:443".to_string(),
            client_addr: "10.0.0.7:41000".parse().unwrap(),
        };
        let request = LoggedRequest::from_raw(
            &raw("GET", "/login", &[("Host", "secure.test")]),
            &ctx(ListenerKind::Mitm, Some(tunnel)),
        );
        assert!(request.is_browser_proxy_request);
        assert_eq!(request.absolute_url, "https://secure.test/login");
        assert_eq!(request.port, 443);
        assert_eq!(request.client_ip, "10.0.0.7");
    }

    #[test]
    fn test_cookies_are_parsed() {
        let request = LoggedRequest::from_raw(
            &raw("GET", "/", &[("Cookie", "session=abc; theme=dark")]),
            &ctx(ListenerKind::Plain, None),
        );
        assert_eq!(request.cookie("session"), Some("abc"));
        assert_eq!(request.cookie("theme"), Some("dark"));
        assert_eq!(request.cookie("missing"), None);
    }

    #[test]
    fn test_split_authority_ipv6() {
        assert_eq!(split_authority("[::1]:8443", 443), ("::1".to_string(), 8443));
        assert_eq!(split_authority("example.com", 443), ("example.com".to_string(), 443));
    }
}
