//! Upstream proxying: browser pass-through, trust policy, connection pool.

use crate::proxy::ClientSettings;
use crate::tls::{TrustDecisionMaker, TrustError, TrustValidator};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Pass unmatched proxy requests through to their original target.
    #[serde(default)]
    pub browser_proxying: bool,
    #[serde(default)]
    pub trust: TrustConfig,
    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,
}

/// Each enabled element becomes one validator; a chain is trusted if any
/// validator accepts it. With nothing enabled the system roots are used.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TrustConfig {
    #[serde(default)]
    pub trust_all: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trusted_hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trust_store_paths: Vec<PathBuf>,
    #[serde(default)]
    pub system_roots: bool,
}

impl TrustConfig {
    pub fn build(&self) -> Result<TrustDecisionMaker, TrustError> {
        let mut validators = Vec::new();
        if self.trust_all {
            validators.push(TrustValidator::TrustAll);
        }
        if !self.trusted_hosts.is_empty() {
            validators.push(TrustValidator::named_hosts(self.trusted_hosts.iter().cloned()));
        }
        for path in &self.trust_store_paths {
            validators.push(TrustValidator::from_pem_file(path)?);
        }
        if self.system_roots {
            validators.push(TrustValidator::system_roots()?);
        } else if validators.is_empty() {
            match TrustValidator::system_roots() {
                Ok(validator) => validators.push(validator),
                Err(e) => {
                    warn!("No system trust anchors ({e}); upstream TLS certificates will be rejected");
                    validators.push(TrustValidator::named_hosts(Vec::<String>::new()));
                }
            }
        }
        TrustDecisionMaker::new(validators)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionPoolConfig {
    #[serde(default = "default_pool_max_idle_per_host")]
    pub max_idle_per_host: usize,

    #[serde(default = "default_pool_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl ConnectionPoolConfig {
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            max_idle_per_host: self.max_idle_per_host,
        }
    }
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: default_pool_max_idle_per_host(),
            idle_timeout_secs: default_pool_idle_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_pool_max_idle_per_host() -> usize {
    16
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    30
}
