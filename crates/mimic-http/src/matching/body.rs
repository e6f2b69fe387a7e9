//! Pluggable body predicates.
//!
//! The engine only knows the [`BodyMatcher`] trait. Structured grammars
//! (JSON, XML, path expressions) plug in from outside through
//! [`BodyPattern::Custom`].

use super::match_result::MatchResult;
use super::string_pattern::StringPattern;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub trait BodyMatcher: Send + Sync {
    /// Short name used when the pattern is serialized or reported.
    fn name(&self) -> &str;

    fn match_body(&self, body: &[u8]) -> MatchResult;
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub enum BodyPattern {
    /// A string pattern applied to the body decoded as UTF-8.
    Text(StringPattern),
    BinaryEqualTo(Bytes),
    Custom(Arc<dyn BodyMatcher>),
}

impl BodyPattern {
    pub fn match_body(&self, body: &[u8]) -> MatchResult {
        match self {
            BodyPattern::Text(pattern) => {
                let text = String::from_utf8_lossy(body);
                pattern.match_value(Some(&text))
            }
            BodyPattern::BinaryEqualTo(expected) => MatchResult::from_bool(expected[..] == *body),
            BodyPattern::Custom(matcher) => matcher.match_body(body),
        }
    }
}

impl fmt::Debug for BodyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyPattern::Text(p) => f.debug_tuple("Text").field(p).finish(),
            BodyPattern::BinaryEqualTo(b) => f.debug_tuple("BinaryEqualTo").field(b).finish(),
            BodyPattern::Custom(m) => f.debug_tuple("Custom").field(&m.name()).finish(),
        }
    }
}

impl PartialEq for BodyPattern {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (BodyPattern::Text(a), BodyPattern::Text(b)) => a == b,
            (BodyPattern::BinaryEqualTo(a), BodyPattern::BinaryEqualTo(b)) => a == b,
            (BodyPattern::Custom(a), BodyPattern::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl TryFrom<serde_json::Value> for BodyPattern {
    type Error = String;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        if let Some(encoded) = value.get("binaryEqualTo") {
            let encoded = encoded
                .as_str()
                .ok_or_else(|| "binaryEqualTo must be a base64 string".to_string())?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| format!("binaryEqualTo is not valid base64: {e}"))?;
            return Ok(BodyPattern::BinaryEqualTo(Bytes::from(bytes)));
        }
        if value.get("custom").is_some() {
            return Err("custom body matchers can only be registered programmatically".to_string());
        }
        serde_json::from_value::<StringPattern>(value)
            .map(BodyPattern::Text)
            .map_err(|e| e.to_string())
    }
}

impl From<BodyPattern> for serde_json::Value {
    fn from(pattern: BodyPattern) -> Self {
        match pattern {
            BodyPattern::Text(p) => serde_json::to_value(p).unwrap_or(serde_json::Value::Null),
            BodyPattern::BinaryEqualTo(bytes) => serde_json::json!({
                "binaryEqualTo": base64::engine::general_purpose::STANDARD.encode(&bytes)
            }),
            BodyPattern::Custom(m) => serde_json::json!({ "custom": m.name() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StartsWithBrace;

    impl BodyMatcher for StartsWithBrace {
        fn name(&self) -> &str {
            "startsWithBrace"
        }

        fn match_body(&self, body: &[u8]) -> MatchResult {
            MatchResult::from_bool(body.first() == Some(&b'{'))
        }
    }

    #[test]
    fn test_text_pattern_on_body() {
        let pattern = BodyPattern::Text(StringPattern::contains("\"id\": 7"));
        assert!(pattern.match_body(br#"{"id": 7}"#).is_exact());
        assert!(!pattern.match_body(br#"{"id": 8}"#).is_exact());
    }

    #[test]
    fn test_binary_equal_to_from_json() {
        let pattern: BodyPattern = serde_json::from_str(r#"{"binaryEqualTo": "AQID"}"#).unwrap();
        assert!(pattern.match_body(&[1, 2, 3]).is_exact());
        assert!(!pattern.match_body(&[1, 2]).is_exact());
    }

    #[test]
    fn test_custom_matcher_is_consulted() {
        let pattern = BodyPattern::Custom(Arc::new(StartsWithBrace));
        assert!(pattern.match_body(b"{}").is_exact());
        assert!(!pattern.match_body(b"[]").is_exact());
        assert_eq!(
            serde_json::to_value(&pattern).unwrap(),
            serde_json::json!({"custom": "startsWithBrace"})
        );
    }
}
