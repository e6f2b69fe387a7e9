use super::match_result::{string_distance, MatchResult};
use super::string_pattern::RegexPattern;
use crate::http::LoggedRequest;

/// How a stub addresses the request URL.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum UrlPattern {
    /// Exact path and query.
    Url(String),
    /// Exact path, query ignored.
    UrlPath(String),
    /// Regex over path and query.
    UrlPattern(RegexPattern),
    /// Regex over path only.
    UrlPathPattern(RegexPattern),
    #[default]
    Any,
}

impl UrlPattern {
    pub fn is_any(&self) -> bool {
        matches!(self, UrlPattern::Any)
    }

    pub fn match_request(&self, request: &LoggedRequest) -> MatchResult {
        match self {
            UrlPattern::Any => MatchResult::exact(),
            UrlPattern::Url(expected) => exact_or_distance(expected, &request.url),
            UrlPattern::UrlPath(expected) => exact_or_distance(expected, request.path()),
            UrlPattern::UrlPattern(regex) => regex_match(regex, &request.url),
            UrlPattern::UrlPathPattern(regex) => regex_match(regex, request.path()),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            UrlPattern::Any => "<any url>".to_string(),
            UrlPattern::Url(u) | UrlPattern::UrlPath(u) => u.clone(),
            UrlPattern::UrlPattern(r) | UrlPattern::UrlPathPattern(r) => r.source().to_string(),
        }
    }
}

fn exact_or_distance(expected: &str, actual: &str) -> MatchResult {
    if expected == actual {
        MatchResult::exact()
    } else {
        MatchResult::mismatch(string_distance(expected, actual))
    }
}

fn regex_match(pattern: &RegexPattern, actual: &str) -> MatchResult {
    match pattern.regex() {
        Err(message) => MatchResult::failed(message),
        Ok(regex) if regex.is_match(actual) => MatchResult::exact(),
        Ok(_) => MatchResult::mismatch(string_distance(pattern.source(), actual)),
    }
}
