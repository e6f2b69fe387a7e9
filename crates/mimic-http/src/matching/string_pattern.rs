//! String value patterns used by URL, header, cookie, query and body matchers.
//!
//! Regular expressions are compiled on first use. An expression that fails to
//! compile turns into a non-match carrying a diagnostic instead of rejecting the
//! stub, so one broken matcher cannot take down resolution for the others.

use super::match_result::{string_distance, MatchResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Regex that must match the whole value.
#[derive(Debug, Clone)]
pub struct RegexPattern {
    source: String,
    compiled: OnceLock<Result<Regex, String>>,
}

impl RegexPattern {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            compiled: OnceLock::new(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn regex(&self) -> Result<&Regex, &str> {
        self.compiled
            .get_or_init(|| {
                Regex::new(&format!("^(?:{})$", self.source))
                    .map_err(|e| format!("invalid regex '{}': {e}", self.source))
            })
            .as_ref()
            .map_err(String::as_str)
    }
}

impl PartialEq for RegexPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StringPatternRaw", into = "StringPatternRaw")]
pub enum StringPattern {
    EqualTo {
        value: String,
        case_insensitive: bool,
    },
    Contains(String),
    DoesNotContain(String),
    Matches(RegexPattern),
    DoesNotMatch(RegexPattern),
    Absent,
    Anything,
}

impl StringPattern {
    pub fn equal_to(value: impl Into<String>) -> Self {
        Self::EqualTo {
            value: value.into(),
            case_insensitive: false,
        }
    }

    pub fn equal_to_ignore_case(value: impl Into<String>) -> Self {
        Self::EqualTo {
            value: value.into(),
            case_insensitive: true,
        }
    }

    pub fn contains(value: impl Into<String>) -> Self {
        Self::Contains(value.into())
    }

    pub fn matching(regex: impl Into<String>) -> Self {
        Self::Matches(RegexPattern::new(regex))
    }

    pub fn not_matching(regex: impl Into<String>) -> Self {
        Self::DoesNotMatch(RegexPattern::new(regex))
    }

    /// Evaluate against a value, `None` meaning the value is not present.
    pub fn match_value(&self, value: Option<&str>) -> MatchResult {
        match self {
            StringPattern::Anything => MatchResult::exact(),
            StringPattern::Absent => MatchResult::from_bool(value.is_none()),
            StringPattern::EqualTo {
                value: expected,
                case_insensitive,
            } => match value {
                None => MatchResult::mismatch(1.0),
                Some(actual) => {
                    let equal = if *case_insensitive {
                        expected.eq_ignore_ascii_case(actual)
                    } else {
                        expected == actual
                    };
                    if equal {
                        MatchResult::exact()
                    } else if *case_insensitive {
                        MatchResult::mismatch(string_distance(
                            &expected.to_lowercase(),
                            &actual.to_lowercase(),
                        ))
                    } else {
                        MatchResult::mismatch(string_distance(expected, actual))
                    }
                }
            },
            StringPattern::Contains(needle) => match value {
                None => MatchResult::mismatch(1.0),
                Some(actual) if actual.contains(needle.as_str()) => MatchResult::exact(),
                Some(actual) => MatchResult::mismatch(string_distance(needle, actual)),
            },
            StringPattern::DoesNotContain(needle) => match value {
                None => MatchResult::mismatch(1.0),
                Some(actual) => MatchResult::from_bool(!actual.contains(needle.as_str())),
            },
            StringPattern::Matches(pattern) => match pattern.regex() {
                Err(message) => MatchResult::failed(message),
                Ok(regex) => MatchResult::from_bool(value.is_some_and(|v| regex.is_match(v))),
            },
            StringPattern::DoesNotMatch(pattern) => match pattern.regex() {
                Err(message) => MatchResult::failed(message),
                Ok(regex) => match value {
                    None => MatchResult::mismatch(1.0),
                    Some(v) => MatchResult::from_bool(!regex.is_match(v)),
                },
            },
        }
    }

    /// The literal value this pattern expects, when it has one.
    pub fn expected(&self) -> Option<&str> {
        match self {
            StringPattern::EqualTo { value, .. }
            | StringPattern::Contains(value)
            | StringPattern::DoesNotContain(value) => Some(value),
            StringPattern::Matches(p) | StringPattern::DoesNotMatch(p) => Some(p.source()),
            StringPattern::Absent | StringPattern::Anything => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StringPatternRaw {
    #[serde(skip_serializing_if = "Option::is_none")]
    equal_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    case_insensitive: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    contains: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    does_not_contain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    matches: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    does_not_match: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    absent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    anything: Option<bool>,
}

impl TryFrom<StringPatternRaw> for StringPattern {
    type Error = String;

    fn try_from(raw: StringPatternRaw) -> Result<Self, Self::Error> {
        let mut found = Vec::new();
        if let Some(value) = raw.equal_to {
            found.push(StringPattern::EqualTo {
                value,
                case_insensitive: raw.case_insensitive.unwrap_or(false),
            });
        }
        if let Some(value) = raw.contains {
            found.push(StringPattern::Contains(value));
        }
        if let Some(value) = raw.does_not_contain {
            found.push(StringPattern::DoesNotContain(value));
        }
        if let Some(value) = raw.matches {
            found.push(StringPattern::Matches(RegexPattern::new(value)));
        }
        if let Some(value) = raw.does_not_match {
            found.push(StringPattern::DoesNotMatch(RegexPattern::new(value)));
        }
        if raw.absent == Some(true) {
            found.push(StringPattern::Absent);
        }
        if raw.anything == Some(true) {
            found.push(StringPattern::Anything);
        }
        match found.len() {
            1 => Ok(found.remove(0)),
            0 => Err("string pattern needs one of equalTo, contains, doesNotContain, \
                      matches, doesNotMatch, absent, anything"
                .to_string()),
            _ => Err("string pattern must declare exactly one operator".to_string()),
        }
    }
}

impl From<StringPattern> for StringPatternRaw {
    fn from(pattern: StringPattern) -> Self {
        let mut raw = StringPatternRaw::default();
        match pattern {
            StringPattern::EqualTo {
                value,
                case_insensitive,
            } => {
                raw.equal_to = Some(value);
                raw.case_insensitive = case_insensitive.then_some(true);
            }
            StringPattern::Contains(v) => raw.contains = Some(v),
            StringPattern::DoesNotContain(v) => raw.does_not_contain = Some(v),
            StringPattern::Matches(p) => raw.matches = Some(p.source),
            StringPattern::DoesNotMatch(p) => raw.does_not_match = Some(p.source),
            StringPattern::Absent => raw.absent = Some(true),
            StringPattern::Anything => raw.anything = Some(true),
        }
        raw
    }
}

/// Pattern over a field that may repeat or be missing (headers, cookies, query).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiValuePattern {
    #[serde(flatten)]
    pub pattern: StringPattern,
    /// Treat a missing field as a match.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub or_absent: bool,
}

impl MultiValuePattern {
    pub fn new(pattern: StringPattern) -> Self {
        Self {
            pattern,
            or_absent: false,
        }
    }

    pub fn or_absent(pattern: StringPattern) -> Self {
        Self {
            pattern,
            or_absent: true,
        }
    }

    /// Best result across all present values.
    pub fn match_values(&self, values: &[&str]) -> MatchResult {
        if values.is_empty() {
            if self.or_absent {
                return MatchResult::exact();
            }
            return self.pattern.match_value(None);
        }
        values
            .iter()
            .map(|v| self.pattern.match_value(Some(v)))
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
            .unwrap_or_else(|| MatchResult::mismatch(1.0))
    }
}

impl From<StringPattern> for MultiValuePattern {
    fn from(pattern: StringPattern) -> Self {
        Self::new(pattern)
    }
}
