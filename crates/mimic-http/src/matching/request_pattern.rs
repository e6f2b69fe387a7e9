//! The request side of a stub mapping.

use super::body::BodyPattern;
use super::match_result::MatchResult;
use super::string_pattern::{MultiValuePattern, RegexPattern, StringPattern};
use super::url_pattern::UrlPattern;
use crate::http::LoggedRequest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ANY_METHOD: &str = "ANY";

/// A request matches iff every declared sub-matcher matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RequestPatternRaw", into = "RequestPatternRaw")]
pub struct RequestPattern {
    pub method: String,
    pub url: UrlPattern,
    pub scheme: Option<String>,
    pub host: Option<StringPattern>,
    pub port: Option<u16>,
    pub headers: BTreeMap<String, MultiValuePattern>,
    pub query_parameters: BTreeMap<String, MultiValuePattern>,
    pub cookies: BTreeMap<String, MultiValuePattern>,
    pub body_patterns: Vec<BodyPattern>,
}

impl Default for RequestPattern {
    fn default() -> Self {
        Self::new(ANY_METHOD, UrlPattern::Any)
    }
}

impl RequestPattern {
    pub fn new(method: &str, url: UrlPattern) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url,
            scheme: None,
            host: None,
            port: None,
            headers: BTreeMap::new(),
            query_parameters: BTreeMap::new(),
            cookies: BTreeMap::new(),
            body_patterns: Vec::new(),
        }
    }

    pub fn get(url: &str) -> Self {
        Self::new("GET", UrlPattern::Url(url.to_string()))
    }

    pub fn put(url: &str) -> Self {
        Self::new("PUT", UrlPattern::Url(url.to_string()))
    }

    pub fn post(url: &str) -> Self {
        Self::new("POST", UrlPattern::Url(url.to_string()))
    }

    pub fn with_header(mut self, name: &str, pattern: impl Into<MultiValuePattern>) -> Self {
        self.headers.insert(name.to_string(), pattern.into());
        self
    }

    pub fn with_query_param(mut self, name: &str, pattern: impl Into<MultiValuePattern>) -> Self {
        self.query_parameters.insert(name.to_string(), pattern.into());
        self
    }

    pub fn with_cookie(mut self, name: &str, pattern: impl Into<MultiValuePattern>) -> Self {
        self.cookies.insert(name.to_string(), pattern.into());
        self
    }

    pub fn with_body(mut self, pattern: BodyPattern) -> Self {
        self.body_patterns.push(pattern);
        self
    }

    pub fn with_host(mut self, pattern: StringPattern) -> Self {
        self.host = Some(pattern);
        self
    }

    /// One result per declared matcher, in a fixed order.
    pub fn evaluate(&self, request: &LoggedRequest) -> Vec<MatchResult> {
        let mut results = Vec::new();

        if self.method != ANY_METHOD {
            results.push(MatchResult::from_bool(
                self.method.eq_ignore_ascii_case(&request.method),
            ));
        }
        if !self.url.is_any() {
            results.push(self.url.match_request(request));
        }
        if let Some(scheme) = &self.scheme {
            results.push(MatchResult::from_bool(scheme.eq_ignore_ascii_case(&request.scheme)));
        }
        if let Some(host) = &self.host {
            results.push(host.match_value(Some(&request.host)));
        }
        if let Some(port) = self.port {
            results.push(MatchResult::from_bool(port == request.port));
        }
        for (name, pattern) in &self.headers {
            results.push(pattern.match_values(&request.headers.get_all(name)));
        }
        for (name, pattern) in &self.query_parameters {
            results.push(pattern.match_values(&request.query_values(name)));
        }
        for (name, pattern) in &self.cookies {
            let values: Vec<&str> = request.cookie(name).into_iter().collect();
            results.push(pattern.match_values(&values));
        }
        for pattern in &self.body_patterns {
            results.push(pattern.match_body(&request.body));
        }

        results
    }

    pub fn match_request(&self, request: &LoggedRequest) -> MatchResult {
        MatchResult::aggregate(self.evaluate(request))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestPatternRaw {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url_path_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    host: Option<StringPattern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, MultiValuePattern>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    query_parameters: BTreeMap<String, MultiValuePattern>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    cookies: BTreeMap<String, MultiValuePattern>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    body_patterns: Vec<BodyPattern>,
}

impl TryFrom<RequestPatternRaw> for RequestPattern {
    type Error = String;

    fn try_from(raw: RequestPatternRaw) -> Result<Self, Self::Error> {
        let mut urls = Vec::new();
        if let Some(u) = raw.url {
            urls.push(UrlPattern::Url(u));
        }
        if let Some(u) = raw.url_path {
            urls.push(UrlPattern::UrlPath(u));
        }
        if let Some(u) = raw.url_pattern {
            urls.push(UrlPattern::UrlPattern(RegexPattern::new(u)));
        }
        if let Some(u) = raw.url_path_pattern {
            urls.push(UrlPattern::UrlPathPattern(RegexPattern::new(u)));
        }
        if urls.len() > 1 {
            return Err(
                "only one of url, urlPath, urlPattern, urlPathPattern may be set".to_string(),
            );
        }

        let mut pattern = RequestPattern::new(
            raw.method.as_deref().unwrap_or(ANY_METHOD),
            urls.pop().unwrap_or_default(),
        );
        pattern.scheme = raw.scheme;
        pattern.host = raw.host;
        pattern.port = raw.port;
        pattern.headers = raw.headers;
        pattern.query_parameters = raw.query_parameters;
        pattern.cookies = raw.cookies;
        pattern.body_patterns = raw.body_patterns;
        Ok(pattern)
    }
}

impl From<RequestPattern> for RequestPatternRaw {
    fn from(pattern: RequestPattern) -> Self {
        let mut raw = RequestPatternRaw {
            method: Some(pattern.method),
            scheme: pattern.scheme,
            host: pattern.host,
            port: pattern.port,
            headers: pattern.headers,
            query_parameters: pattern.query_parameters,
            cookies: pattern.cookies,
            body_patterns: pattern.body_patterns,
            ..Default::default()
        };
        match pattern.url {
            UrlPattern::Url(u) => raw.url = Some(u),
            UrlPattern::UrlPath(u) => raw.url_path = Some(u),
            UrlPattern::UrlPattern(r) => raw.url_pattern = Some(r.source().to_string()),
            UrlPattern::UrlPathPattern(r) => raw.url_path_pattern = Some(r.source().to_string()),
            UrlPattern::Any => {}
        }
        raw
    }
}
