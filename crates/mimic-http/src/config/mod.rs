//! Configuration types for the Mimic server.

mod journal;
mod listen;
mod proxy;
mod tls;

use crate::stubs::StubMapping;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

pub use journal::JournalConfig;
pub use listen::ListenConfig;
pub use proxy::{ConnectionPoolConfig, ProxyConfig, TrustConfig};
pub use tls::{CaConfig, TlsConfig};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub ca: CaConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub journal: JournalConfig,
    /// Directory that `bodyFileName` is resolved against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_root: Option<PathBuf>,
    /// Stubs registered at startup.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stubs: Vec<StubMapping>,
}

impl Config {
    /// Load from a `.json` file, or YAML for any other extension.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config: Config = if is_json {
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config '{}'", path.display()))?
        } else {
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config '{}'", path.display()))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.bind_ip()?;

        if self.listen.max_connections == 0 {
            anyhow::bail!("'listen.max_connections' must be at least 1");
        }
        if self.listen.port != 0 && self.listen.port == self.listen.mitm_port {
            anyhow::bail!(
                "'listen.port' and 'listen.mitm_port' must differ (both are {})",
                self.listen.port
            );
        }
        if self.tls.cert_path.is_some() != self.tls.key_path.is_some() {
            anyhow::bail!("'tls.cert_path' and 'tls.key_path' must be set together");
        }
        if self.tls.handshake_timeout_ms == 0 {
            anyhow::bail!("'tls.handshake_timeout_ms' must be greater than 0");
        }
        if self.ca.cert_path.is_some() != self.ca.key_path.is_some() {
            anyhow::bail!(
                "'ca.cert_path' and 'ca.key_path' must be set together. \
                 Leave both unset for an in-memory CA"
            );
        }
        if self.ca.leaf_validity_days == 0 {
            anyhow::bail!("'ca.leaf_validity_days' must be greater than 0");
        }
        if self.journal.max_entries == Some(0) {
            anyhow::bail!(
                "'journal.max_entries' must be at least 1. Set 'journal.enabled: false' to disable the journal"
            );
        }
        if let Some(root) = &self.files_root {
            if !root.is_dir() {
                anyhow::bail!("'files_root' {} is not a directory", root.display());
            }
        }

        let mut ids = HashSet::new();
        for stub in &self.stubs {
            if !ids.insert(stub.id) {
                anyhow::bail!("Duplicate stub id {} in 'stubs'", stub.id);
            }
            stub.validate()
                .map_err(|e| anyhow::anyhow!("Invalid stub {}: {e}", stub.id))?;
        }

        Ok(())
    }

    fn bind_ip(&self) -> Result<IpAddr, anyhow::Error> {
        self.listen.bind.parse().map_err(|_| {
            anyhow::anyhow!(
                "'listen.bind' must be an IP address, got '{}'",
                self.listen.bind
            )
        })
    }

    pub fn http_addr(&self) -> Result<SocketAddr, anyhow::Error> {
        Ok(SocketAddr::new(self.bind_ip()?, self.listen.port))
    }

    pub fn mitm_addr(&self) -> Result<SocketAddr, anyhow::Error> {
        Ok(SocketAddr::new(self.bind_ip()?, self.listen.mitm_port))
    }
}
