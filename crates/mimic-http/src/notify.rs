//! Out-of-band reporting for conditions that must not fail a request.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};

/// Sink for operational notices raised from deep inside request handling.
pub trait Notifier: Send + Sync {
    fn info(&self, message: &str);
    fn error(&self, message: &str);
}

/// Default notifier that forwards to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn info(&self, message: &str) {
        info!(target: "mimic_http::notify", "{message}");
    }

    fn error(&self, message: &str) {
        error!(target: "mimic_http::notify", "{message}");
    }
}

/// Latch that lets a notice through the first time only.
#[derive(Debug, Default)]
pub struct Once {
    fired: AtomicBool,
}

impl Once {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true exactly once across all callers.
    pub fn first(&self) -> bool {
        !self.fired.swap(true, Ordering::AcqRel)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_once_fires_a_single_time() {
        let once = Once::new();
        assert!(once.first());
        assert!(!once.first());
        assert!(!once.first());
    }
}
