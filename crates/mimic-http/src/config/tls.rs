//! Certificate authority and MITM listener TLS configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identity presented by the MITM listener when no per-host leaf applies.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// PEM certificate chain. When unset, a `localhost` leaf is minted by the CA.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_path: None,
            key_path: None,
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaConfig {
    /// PEM files for the signing authority. Both set and present: loaded.
    /// Both set and absent: generated and written. Neither set: in memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,
    #[serde(default = "default_common_name")]
    pub common_name: String,
    #[serde(default = "default_leaf_validity_days")]
    pub leaf_validity_days: u32,
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            cert_path: None,
            key_path: None,
            common_name: default_common_name(),
            leaf_validity_days: default_leaf_validity_days(),
        }
    }
}

fn default_common_name() -> String {
    "Mimic Interception CA".to_string()
}

fn default_leaf_validity_days() -> u32 {
    365
}
