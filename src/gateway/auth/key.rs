//! In-memory private key SSH authentication.

use std::sync::Arc;

use async_trait::async_trait;
use russh::{client, keys};
use tracing::debug;
use zeroize::Zeroizing;

use crate::gateway::error::{SessionError, classify_ssh_error};
use crate::gateway::session::handler::GatewayClientHandler;

use super::traits::AuthStrategy;

/// Private key authentication strategy.
///
/// Decodes PEM or OpenSSH key material held in memory, never from disk.
/// Encrypted keys require the passphrase.
pub struct KeyAuth {
    pem: Zeroizing<String>,
    passphrase: Option<Zeroizing<String>>,
}

impl KeyAuth {
    pub fn new(pem: Zeroizing<String>, passphrase: Option<Zeroizing<String>>) -> Self {
        Self { pem, passphrase }
    }

    /// An undecodable key or wrong passphrase is a bad credential, not a
    /// connection problem.
    fn decode(&self) -> Result<keys::PrivateKey, SessionError> {
        keys::decode_secret_key(
            self.pem.as_str(),
            self.passphrase.as_ref().map(|p| p.as_str()),
        )
        .map_err(|e| SessionError::AuthFailed(format!("Failed to decode private key: {}", e)))
    }
}

#[async_trait]
impl AuthStrategy for KeyAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<GatewayClientHandler>,
        username: &str,
    ) -> Result<bool, SessionError> {
        let key_pair = self.decode()?;

        // For RSA keys, use the best supported hash algorithm
        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        debug!("Using RSA hash algorithm for key auth: {:?}", hash_alg);

        let key_with_hash = keys::PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg);

        let result = handle
            .authenticate_publickey(username, key_with_hash)
            .await
            .map_err(|e| classify_ssh_error("Key authentication", &e))?;

        Ok(result.success())
    }

    fn name(&self) -> &'static str {
        "key"
    }
}
