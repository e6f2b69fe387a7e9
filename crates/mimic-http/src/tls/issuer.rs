//! On-demand per-host certificates for the MITM listener.
//!
//! Entries are keyed by the exact SNI hostname and never evicted. Two
//! handshakes racing on the same unseen host may both mint a certificate; the
//! later insert wins and both handshakes still present a valid CA-chained leaf.

use super::authority::CertificateAuthority;
use super::identity::{Identity, IdentitySelector};
use crate::notify::{Notifier, Once};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub struct DynamicCertificateIssuer {
    authority: Option<Arc<CertificateAuthority>>,
    issued: RwLock<HashMap<String, Identity>>,
    validity_days: u32,
    notifier: Arc<dyn Notifier>,
    issue_failure: Once,
    degraded: Once,
}

impl DynamicCertificateIssuer {
    pub fn new(
        authority: Arc<CertificateAuthority>,
        validity_days: u32,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self::build(Some(authority), validity_days, notifier)
    }

    /// An issuer that cannot mint and always presents the default identity.
    pub fn degraded(notifier: Arc<dyn Notifier>) -> Self {
        Self::build(None, 0, notifier)
    }

    fn build(
        authority: Option<Arc<CertificateAuthority>>,
        validity_days: u32,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            authority,
            issued: RwLock::new(HashMap::new()),
            validity_days,
            notifier,
            issue_failure: Once::new(),
            degraded: Once::new(),
        }
    }

    pub fn authority(&self) -> Option<&Arc<CertificateAuthority>> {
        self.authority.as_ref()
    }

    pub fn cached(&self, host: &str) -> Option<Identity> {
        self.issued.read().get(host).cloned()
    }

    pub fn cached_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.issued.read().keys().cloned().collect();
        hosts.sort();
        hosts
    }
}

impl IdentitySelector for DynamicCertificateIssuer {
    fn choose_identity(
        &self,
        hostname_hint: Option<&str>,
        default: Option<&Identity>,
    ) -> Option<Identity> {
        let default = default?;
        let Some(host) = hostname_hint else {
            return Some(default.clone());
        };
        if default.matches_host(host) {
            return Some(default.clone());
        }
        let Some(authority) = &self.authority else {
            if self.degraded.first() {
                self.notifier.info(
                    "No certificate authority available; MITM connections will use the default certificate",
                );
            }
            return Some(default.clone());
        };
        if let Some(identity) = self.issued.read().get(host) {
            return Some(identity.clone());
        }

        match authority.issue(host, self.validity_days) {
            Ok(identity) => {
                debug!("Issued certificate for {host}");
                self.issued.write().insert(host.to_string(), identity.clone());
                Some(identity)
            }
            Err(e) => {
                if self.issue_failure.first() {
                    self.notifier.error(&format!(
                        "Could not issue certificate for {host}, presenting default certificate: {e}"
                    ));
                }
                Some(default.clone())
            }
        }
    }
}
