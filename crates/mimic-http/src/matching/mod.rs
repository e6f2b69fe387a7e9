//! Request matching: patterns, the resolution engine, and near-miss ranking.

mod body;
mod engine;
mod match_result;
mod near_miss;
mod request_pattern;
mod string_pattern;
mod url_pattern;

#[cfg(test)]
mod tests;

pub use body::{BodyMatcher, BodyPattern};
pub use engine::{stub_match, MatchEngine, Resolution};
pub use match_result::{string_distance, MatchResult, SubEvent, SubEventKind, MIN_MISMATCH_DISTANCE};
pub use near_miss::{render_report, NearMiss, NearMissAnalyzer};
pub use request_pattern::{RequestPattern, ANY_METHOD};
pub use string_pattern::{MultiValuePattern, RegexPattern, StringPattern};
pub use url_pattern::UrlPattern;
