use serde::Serialize;

/// Smallest distance a mismatch may report, so that 0.0 always means an exact match.
pub const MIN_MISMATCH_DISTANCE: f64 = 0.01;

const MISMATCH_COUNT_WEIGHT: f64 = 0.75;
const MISMATCH_DEPTH_WEIGHT: f64 = 0.25;

/// Diagnostic attached to a serve event, e.g. a matcher that failed to evaluate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubEvent {
    #[serde(rename = "type")]
    pub kind: SubEventKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubEventKind {
    Error,
    Warning,
}

impl SubEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: SubEventKind::Error,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            kind: SubEventKind::Warning,
            message: message.into(),
        }
    }
}

/// Outcome of evaluating one matcher (or an aggregate of several).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub distance: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sub_events: Vec<SubEvent>,
}

impl MatchResult {
    pub fn exact() -> Self {
        Self {
            distance: 0.0,
            sub_events: Vec::new(),
        }
    }

    /// A non-match, with the distance clamped into `[MIN_MISMATCH_DISTANCE, 1.0]`.
    pub fn mismatch(distance: f64) -> Self {
        let distance = if distance.is_nan() { 1.0 } else { distance };
        Self {
            distance: distance.clamp(MIN_MISMATCH_DISTANCE, 1.0),
            sub_events: Vec::new(),
        }
    }

    pub fn from_bool(matched: bool) -> Self {
        if matched {
            Self::exact()
        } else {
            Self::mismatch(1.0)
        }
    }

    /// Non-match caused by a matcher that could not be evaluated.
    pub fn failed(message: impl Into<String>) -> Self {
        let mut result = Self::mismatch(1.0);
        result.sub_events.push(SubEvent::error(message));
        result
    }

    pub fn is_exact(&self) -> bool {
        self.distance == 0.0
    }

    /// Combine per-dimension results:
    /// `0.75 * (mismatched / total) + 0.25 * mean(distance)`.
    pub fn aggregate(results: Vec<MatchResult>) -> Self {
        let total = results.len();
        if total == 0 {
            return Self::exact();
        }
        let mismatched = results.iter().filter(|r| !r.is_exact()).count();
        let mean = results.iter().map(|r| r.distance).sum::<f64>() / total as f64;
        let sub_events = results.into_iter().flat_map(|r| r.sub_events).collect();
        let distance = if mismatched == 0 {
            0.0
        } else {
            MISMATCH_COUNT_WEIGHT * (mismatched as f64 / total as f64)
                + MISMATCH_DEPTH_WEIGHT * mean
        };
        Self {
            distance,
            sub_events,
        }
    }
}

/// Character-level dissimilarity in `[0, 1]`.
pub fn string_distance(expected: &str, actual: &str) -> f64 {
    let ratio = similar::TextDiff::from_chars(expected, actual).ratio();
    1.0 - f64::from(ratio)
}
