//! Request journal configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JournalConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Oldest entries are evicted beyond this many. Unset = unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<usize>,
    /// Candidates reported for an unmatched request.
    #[serde(default = "default_near_miss_limit")]
    pub near_miss_limit: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_entries: None,
            near_miss_limit: default_near_miss_limit(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_near_miss_limit() -> usize {
    3
}
