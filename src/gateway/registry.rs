//! Ownership-checked CRUD over server records.
//!
//! The registry is the only layer that sees plaintext credentials on the way
//! in. It validates input, seals the secret through the [`Vault`], and hands
//! serialized records to a [`RecordStore`]. Every read and write compares the
//! requester with the record owner.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::info;

use crate::gateway::error::GatewayError;
use crate::gateway::storage::RecordStore;
use crate::gateway::types::{AuthMode, CredentialInput, ServerPatch, ServerRecord, ServerSpec};
use crate::gateway::vault::{Credential, Vault};

/// Port used when a spec does not name one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Prefix every pinned host key fingerprint must carry.
pub const FINGERPRINT_PREFIX: &str = "SHA256:";

pub struct ServerRegistry {
    store: Arc<dyn RecordStore>,
    vault: Arc<Vault>,
    /// Serializes read-modify-write on one record so a delete cannot be
    /// undone by an update that read the record before it.
    record_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ServerRegistry {
    pub fn new(store: Arc<dyn RecordStore>, vault: Arc<Vault>) -> Self {
        Self {
            store,
            vault,
            record_locks: DashMap::new(),
        }
    }

    /// Validate `spec`, seal its credential and persist a new record.
    pub async fn create(&self, owner_id: &str, spec: ServerSpec) -> Result<ServerRecord, GatewayError> {
        check_owner(owner_id)?;
        let name = required("name", &spec.name)?;
        let host = check_host(&spec.host)?;
        let port = check_port(spec.port)?;
        let username = required("username", &spec.username)?;
        let host_key_fingerprint = check_fingerprint(spec.host_key_fingerprint)?;
        let credential = credential_from_input(spec.credential)?;

        let now = timestamp();
        let record = ServerRecord {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            name,
            host,
            port,
            username,
            auth_mode: credential.auth_mode(),
            secret_ciphertext: self.vault.seal_credential(&credential)?,
            host_key_fingerprint,
            created_at: now.clone(),
            updated_at: now,
        };

        self.persist(&record).await?;
        info!(
            server_id = %record.id,
            owner = %owner_id,
            "Registered server {}@{}:{}",
            record.username,
            record.host,
            record.port
        );
        Ok(record)
    }

    /// Fetch a record the requester owns.
    pub async fn get(&self, id: &str, requester_id: &str) -> Result<ServerRecord, GatewayError> {
        let record = self.load(id).await?;
        if record.owner_id != requester_id {
            return Err(GatewayError::Forbidden(id.to_string()));
        }
        Ok(record)
    }

    /// Apply a partial update. A credential change is re-sealed.
    pub async fn update(
        &self,
        id: &str,
        requester_id: &str,
        patch: ServerPatch,
    ) -> Result<ServerRecord, GatewayError> {
        if patch.is_empty() {
            return Err(GatewayError::Validation("update contains no fields".into()));
        }
        let lock = self.record_lock(id);
        let _guard = lock.lock().await;
        let mut record = self.get(id, requester_id).await?;

        if let Some(name) = patch.name {
            record.name = required("name", &name)?;
        }
        if let Some(host) = patch.host {
            record.host = check_host(&host)?;
        }
        if let Some(port) = patch.port {
            record.port = check_port(Some(port))?;
        }
        if let Some(username) = patch.username {
            record.username = required("username", &username)?;
        }
        if let Some(fingerprint) = patch.host_key_fingerprint {
            record.host_key_fingerprint = if fingerprint.trim().is_empty() {
                None
            } else {
                check_fingerprint(Some(fingerprint))?
            };
        }
        if let Some(input) = patch.credential {
            let credential = credential_from_input(input)?;
            record.auth_mode = credential.auth_mode();
            record.secret_ciphertext = self.vault.seal_credential(&credential)?;
        }
        record.updated_at = timestamp();

        self.persist(&record).await?;
        info!(server_id = %record.id, owner = %requester_id, "Updated server");
        Ok(record)
    }

    /// Remove a record the requester owns.
    pub async fn delete(&self, id: &str, requester_id: &str) -> Result<(), GatewayError> {
        let lock = self.record_lock(id);
        let guard = lock.lock().await;
        self.get(id, requester_id).await?;
        if !self.store.delete_record(id).await? {
            // Lost a race with another delete
            return Err(GatewayError::NotFound(id.to_string()));
        }
        drop(guard);
        // Ids are never reissued; anyone still queued on the old lock re-reads and finds nothing
        self.record_locks.remove(id);
        info!(server_id = %id, owner = %requester_id, "Deleted server");
        Ok(())
    }

    /// All records owned by `owner_id`, oldest first.
    pub async fn list(&self, owner_id: &str) -> Result<Vec<ServerRecord>, GatewayError> {
        let mut records = self
            .store
            .list_records_by_owner(owner_id)
            .await?
            .iter()
            .map(|body| decode(body))
            .collect::<Result<Vec<_>, _>>()?;
        records.retain(|r| r.owner_id == owner_id);
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(records)
    }

    fn record_lock(&self, id: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.record_locks.entry(id.to_string()).or_default().value())
    }

    async fn load(&self, id: &str) -> Result<ServerRecord, GatewayError> {
        if id.trim().is_empty() {
            return Err(GatewayError::Validation("server id must not be empty".into()));
        }
        match self.store.get_record(id).await {
            Ok(Some(body)) => decode(&body),
            Ok(None) => Err(GatewayError::NotFound(id.to_string())),
            // Ids outside the storage alphabet can never have been issued
            Err(crate::gateway::storage::StoreError::InvalidKey(_)) => {
                Err(GatewayError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, record: &ServerRecord) -> Result<(), GatewayError> {
        let body = serde_json::to_vec(record)
            .map_err(|e| GatewayError::Internal(format!("Failed to serialize record: {}", e)))?;
        self.store
            .put_record(&record.id, &record.owner_id, body)
            .await?;
        Ok(())
    }
}

/// Fixed-width RFC3339 so records sort by `created_at` as strings.
fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode(body: &[u8]) -> Result<ServerRecord, GatewayError> {
    serde_json::from_slice(body)
        .map_err(|e| GatewayError::Storage(format!("Corrupt server record: {}", e)))
}

fn check_owner(owner_id: &str) -> Result<(), GatewayError> {
    if owner_id.trim().is_empty() {
        return Err(GatewayError::Validation("owner_id must not be empty".into()));
    }
    Ok(())
}

fn required(field: &str, value: &str) -> Result<String, GatewayError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::Validation(format!("{} must not be empty", field)));
    }
    Ok(trimmed.to_string())
}

fn check_host(host: &str) -> Result<String, GatewayError> {
    let host = required("host", host)?;
    if host.chars().any(char::is_whitespace) {
        return Err(GatewayError::Validation(format!(
            "host '{}' must not contain whitespace",
            host
        )));
    }
    Ok(host)
}

fn check_port(port: Option<u32>) -> Result<u16, GatewayError> {
    match port {
        None => Ok(DEFAULT_SSH_PORT),
        Some(p) if (1..=u16::MAX as u32).contains(&p) => Ok(p as u16),
        Some(p) => Err(GatewayError::Validation(format!(
            "port {} is out of range 1-65535",
            p
        ))),
    }
}

fn check_fingerprint(fingerprint: Option<String>) -> Result<Option<String>, GatewayError> {
    match fingerprint {
        None => Ok(None),
        Some(fp) => {
            let fp = fp.trim();
            let digest = fp.strip_prefix(FINGERPRINT_PREFIX).unwrap_or("");
            if digest.is_empty() {
                return Err(GatewayError::Validation(format!(
                    "host_key_fingerprint must look like '{}<base64>'",
                    FINGERPRINT_PREFIX
                )));
            }
            Ok(Some(fp.to_string()))
        }
    }
}

/// Turn caller input into a typed credential, enforcing one secret per mode.
fn credential_from_input(input: CredentialInput) -> Result<Credential, GatewayError> {
    let CredentialInput {
        auth_mode,
        password,
        private_key,
        passphrase,
    } = input;
    let password = password.filter(|p| !p.is_empty());
    let private_key = private_key.filter(|k| !k.trim().is_empty());
    let passphrase = passphrase.filter(|p| !p.is_empty());

    match auth_mode {
        AuthMode::Password => {
            if private_key.is_some() || passphrase.is_some() {
                return Err(GatewayError::Validation(
                    "password mode accepts only a password".into(),
                ));
            }
            let password = password.ok_or_else(|| {
                GatewayError::Validation("password mode requires a password".into())
            })?;
            Ok(Credential::password(password))
        }
        AuthMode::PrivateKey => {
            if password.is_some() {
                return Err(GatewayError::Validation(
                    "private_key mode does not accept a password".into(),
                ));
            }
            let pem = private_key.ok_or_else(|| {
                GatewayError::Validation("private_key mode requires a private_key".into())
            })?;
            if !looks_like_key_armour(&pem) {
                return Err(GatewayError::Validation(
                    "private_key must be PEM or OpenSSH encoded".into(),
                ));
            }
            Ok(Credential::private_key(pem, passphrase))
        }
    }
}

fn looks_like_key_armour(pem: &str) -> bool {
    let pem = pem.trim();
    pem.starts_with("-----BEGIN ") && pem.contains("PRIVATE KEY-----") && pem.contains("-----END ")
}
