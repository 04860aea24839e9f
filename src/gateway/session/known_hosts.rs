//! Host key verification.
//!
//! Three policies are supported:
//!
//! - **Trust on first use** (default): the first fingerprint seen for a
//!   `host:port` is recorded; later connections must present the same one.
//! - **Strict**: only fingerprints already recorded are accepted.
//! - **Accept any**: no verification. Logged loudly on every connection.
//!
//! A fingerprint pinned on the server record overrides all three.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::gateway::storage::StoreError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    #[default]
    TrustOnFirstUse,
    Strict,
    AcceptAny,
}

impl fmt::Display for HostKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostKeyPolicy::TrustOnFirstUse => write!(f, "tofu"),
            HostKeyPolicy::Strict => write!(f, "strict"),
            HostKeyPolicy::AcceptAny => write!(f, "accept_any"),
        }
    }
}

impl FromStr for HostKeyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tofu" | "trust_on_first_use" => Ok(HostKeyPolicy::TrustOnFirstUse),
            "strict" => Ok(HostKeyPolicy::Strict),
            "accept_any" | "insecure" => Ok(HostKeyPolicy::AcceptAny),
            other => Err(format!(
                "Unknown host key mode '{}', expected 'tofu', 'strict' or 'accept_any'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyDecision {
    /// Matches the pin or the recorded fingerprint, or policy accepts anything.
    Trusted,
    /// First sighting under trust-on-first-use; now recorded.
    Learned,
    Rejected(String),
}

impl HostKeyDecision {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, HostKeyDecision::Rejected(_))
    }
}

/// Decide whether a presented fingerprint is acceptable.
pub fn decide(
    known: Option<&str>,
    presented: &str,
    pinned: Option<&str>,
    policy: HostKeyPolicy,
) -> HostKeyDecision {
    if let Some(pinned) = pinned {
        return if pinned == presented {
            HostKeyDecision::Trusted
        } else {
            HostKeyDecision::Rejected(format!(
                "host key {} does not match pinned fingerprint {}",
                presented, pinned
            ))
        };
    }

    match (policy, known) {
        (HostKeyPolicy::AcceptAny, _) => HostKeyDecision::Trusted,
        (_, Some(known)) if known == presented => HostKeyDecision::Trusted,
        (_, Some(known)) => HostKeyDecision::Rejected(format!(
            "host key changed: recorded {}, presented {}",
            known, presented
        )),
        (HostKeyPolicy::Strict, None) => HostKeyDecision::Rejected(format!(
            "unknown host key {} and strict host key checking is enabled",
            presented
        )),
        (HostKeyPolicy::TrustOnFirstUse, None) => HostKeyDecision::Learned,
    }
}

/// A recorded host key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownHost {
    /// `host:port`
    pub host: String,
    pub key_type: String,
    /// `SHA256:` fingerprint
    pub fingerprint: String,
    pub first_seen: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KnownHostsFile {
    hosts: Vec<KnownHost>,
}

pub fn host_entry_key(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Recorded fingerprints, optionally persisted to a JSON file.
pub struct KnownHostsStore {
    path: Option<PathBuf>,
    entries: Mutex<HashMap<String, KnownHost>>,
}

impl KnownHostsStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Load the file at `path` if it exists. New entries are written back to it.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: KnownHostsFile = serde_json::from_slice(&bytes)?;
                file.hosts
                    .into_iter()
                    .map(|entry| (entry.host.clone(), entry))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), hosts = entries.len(), "Loaded known hosts");
        Ok(Self {
            path: Some(path),
            entries: Mutex::new(entries),
        })
    }

    pub async fn fingerprint(&self, host: &str, port: u16) -> Option<String> {
        self.entries
            .lock()
            .await
            .get(&host_entry_key(host, port))
            .map(|entry| entry.fingerprint.clone())
    }

    /// Check a presented key and record it when trust-on-first-use learns it.
    pub async fn verify(
        &self,
        host: &str,
        port: u16,
        key_type: &str,
        presented: &str,
        pinned: Option<&str>,
        policy: HostKeyPolicy,
    ) -> HostKeyDecision {
        let key = host_entry_key(host, port);
        let mut entries = self.entries.lock().await;
        let known = entries.get(&key).map(|entry| entry.fingerprint.as_str());
        let decision = decide(known, presented, pinned, policy);

        match &decision {
            HostKeyDecision::Learned => {
                info!(host = %key, fingerprint = %presented, "Recording new host key");
                entries.insert(
                    key.clone(),
                    KnownHost {
                        host: key,
                        key_type: key_type.to_string(),
                        fingerprint: presented.to_string(),
                        first_seen: chrono::Utc::now().to_rfc3339(),
                    },
                );
                if let Err(e) = self.persist(&entries).await {
                    error!(error = %e, "Failed to persist known hosts; entry kept in memory only");
                }
            }
            HostKeyDecision::Trusted if policy == HostKeyPolicy::AcceptAny && pinned.is_none() => {
                warn!(host = %key, fingerprint = %presented, "Host key accepted without verification");
            }
            HostKeyDecision::Rejected(reason) => {
                warn!(host = %key, reason = %reason, "Host key rejected");
            }
            HostKeyDecision::Trusted => {}
        }
        decision
    }

    async fn persist(&self, entries: &HashMap<String, KnownHost>) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut hosts: Vec<KnownHost> = entries.values().cloned().collect();
        hosts.sort_by(|a, b| a.host.cmp(&b.host));
        let body = serde_json::to_vec_pretty(&KnownHostsFile { hosts })?;
        crate::gateway::storage::write_atomic(path, &body).await
    }
}
