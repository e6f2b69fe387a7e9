//! Listener configuration.

use crate::http::CodecLimits;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    /// Address both listeners bind to.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Plain HTTP listener port (0 = ephemeral).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Internal MITM TLS listener port (0 = ephemeral). CONNECT tunnels are
    /// spliced onto this listener.
    #[serde(default)]
    pub mitm_port: u16,
    /// Connections served concurrently per listener; further accepts wait.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_head_bytes")]
    pub max_head_bytes: usize,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_keep_alive")]
    pub keep_alive: bool,
    /// Close a connection that delivers no request for this long (0 = never).
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

impl ListenConfig {
    pub fn limits(&self) -> CodecLimits {
        CodecLimits {
            max_head_bytes: self.max_head_bytes,
            max_body_bytes: self.max_body_bytes,
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            mitm_port: 0,
            max_connections: default_max_connections(),
            max_head_bytes: default_max_head_bytes(),
            max_body_bytes: default_max_body_bytes(),
            keep_alive: default_keep_alive(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_connections() -> usize {
    256
}

fn default_max_head_bytes() -> usize {
    64 * 1024
}

fn default_max_body_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_keep_alive() -> bool {
    true
}

fn default_idle_timeout_ms() -> u64 {
    60_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_timeout_zero_disables() {
        let mut config = ListenConfig::default();
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(60)));
        config.idle_timeout_ms = 0;
        assert_eq!(config.idle_timeout(), None);
    }
}
