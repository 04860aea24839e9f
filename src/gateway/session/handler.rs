//! russh client handler with host key verification.

use std::sync::{Arc, OnceLock};

use russh::{client, keys};

use crate::gateway::session::SessionTarget;
use crate::gateway::session::known_hosts::{HostKeyDecision, HostKeyPolicy, KnownHostsStore};

/// Client handler that checks the server key against the pin on the record
/// and the known-hosts store.
///
/// When a key is refused the reason is left in a shared slot so the
/// connector can report it instead of russh's generic error.
pub struct GatewayClientHandler {
    host: String,
    port: u16,
    pinned: Option<String>,
    policy: HostKeyPolicy,
    known_hosts: Arc<KnownHostsStore>,
    rejection: Arc<OnceLock<String>>,
}

impl GatewayClientHandler {
    pub fn new(
        target: &SessionTarget,
        policy: HostKeyPolicy,
        known_hosts: Arc<KnownHostsStore>,
    ) -> Self {
        Self {
            host: target.host.clone(),
            port: target.port,
            pinned: target.host_key_fingerprint.clone(),
            policy,
            known_hosts,
            rejection: Arc::new(OnceLock::new()),
        }
    }

    pub fn rejection_slot(&self) -> Arc<OnceLock<String>> {
        Arc::clone(&self.rejection)
    }
}

impl client::Handler for GatewayClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key
            .fingerprint(keys::HashAlg::Sha256)
            .to_string();
        let key_type = server_public_key.algorithm().as_str().to_string();

        let decision = self
            .known_hosts
            .verify(
                &self.host,
                self.port,
                &key_type,
                &fingerprint,
                self.pinned.as_deref(),
                self.policy,
            )
            .await;

        if let HostKeyDecision::Rejected(reason) = &decision {
            let _ = self.rejection.set(reason.clone());
        }
        Ok(decision.is_accepted())
    }
}
