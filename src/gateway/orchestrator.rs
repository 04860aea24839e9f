//! The [`Gateway`] façade.
//!
//! Ties the registry, vault, validator, session manager and audit log into
//! the operations exposed to callers. For one execution:
//!
//! ```text
//! register cancel token -> registry.get (owner check) -> vault open
//!   -> validate -> [per-server lock] -> session execute -> audit -> result
//! ```
//!
//! Nothing is retried. A rejected command never reaches the network.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::gateway::config::{ConfigError, DATA_DIR_ENV_VAR, GatewayConfig};
use crate::gateway::error::GatewayError;
use crate::gateway::inflight::InflightIndex;
use crate::gateway::registry::ServerRegistry;
use crate::gateway::session::known_hosts::{HostKeyPolicy, KnownHostsStore};
use crate::gateway::session::{
    RusshConnector, SessionManager, SessionSettings, SessionTarget, SshSessionManager,
};
use crate::gateway::storage::{
    DEFAULT_LOG_LIMIT, ExecutionLog, FileExecutionLog, FileRecordStore, MAX_LOG_LIMIT, RecordStore,
};
use crate::gateway::types::{
    ConnectionProbe, ExecutionLogEntry, ExecutionOutcome, ExecutionResult, ServerPatch,
    ServerRecord, ServerSpec, ServerSummary, ValidationVerdict,
};
use crate::gateway::validator::CommandValidator;
use crate::gateway::vault::{Credential, Vault};

/// Command run by [`Gateway::test_connection`]. Not subject to the validator.
pub const PROBE_COMMAND: &str = "echo gateway-probe";

/// The collaborators a [`Gateway`] is built from.
pub struct GatewayComponents {
    pub vault: Arc<Vault>,
    pub store: Arc<dyn RecordStore>,
    pub audit: Arc<dyn ExecutionLog>,
    pub sessions: Arc<dyn SessionManager>,
    pub validator: CommandValidator,
}

pub struct Gateway {
    config: GatewayConfig,
    registry: ServerRegistry,
    vault: Arc<Vault>,
    audit: Arc<dyn ExecutionLog>,
    sessions: Arc<dyn SessionManager>,
    validator: CommandValidator,
    inflight: InflightIndex,
    /// Only populated when `serialize_per_server` is enabled.
    server_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, components: GatewayComponents) -> Self {
        let GatewayComponents {
            vault,
            store,
            audit,
            sessions,
            validator,
        } = components;

        Self {
            registry: ServerRegistry::new(store, Arc::clone(&vault)),
            config,
            vault,
            audit,
            sessions,
            validator,
            inflight: InflightIndex::new(),
            server_locks: DashMap::new(),
        }
    }

    /// Production wiring: file-backed stores under the data directory and
    /// real SSH connections.
    pub async fn open(config: GatewayConfig) -> Result<Self, ConfigError> {
        let data_dir = config.data_dir.clone();
        let storage_error = |what: &str, e: crate::gateway::storage::StoreError| {
            ConfigError::Invalid {
                name: DATA_DIR_ENV_VAR,
                reason: format!("cannot open {} under {}: {}", what, data_dir.display(), e),
            }
        };

        let store = FileRecordStore::open(config.data_dir.join("servers"))
            .await
            .map_err(|e| storage_error("server records", e))?;
        let audit = FileExecutionLog::open(config.data_dir.join("executions.jsonl"))
            .await
            .map_err(|e| storage_error("execution log", e))?;
        let known_hosts = KnownHostsStore::open(config.known_hosts_path.clone())
            .await
            .map_err(|e| storage_error("known hosts", e))?;

        if config.host_key_policy == HostKeyPolicy::AcceptAny {
            warn!("Host key verification is disabled (accept_any); connections can be intercepted");
        }

        // russh inactivity must outlast the longest permitted command
        let connector = RusshConnector::new(
            config.host_key_policy,
            Arc::new(known_hosts),
            config.max_command_timeout + config.connect_timeout,
            config.compression,
        );
        let sessions = SshSessionManager::new(
            connector,
            SessionSettings {
                connect_timeout: config.connect_timeout,
                output_cap: config.output_cap_bytes,
            },
        );
        let validator =
            CommandValidator::from_rule_file(config.shell_policy, config.denylist_path.as_deref())?;

        info!(
            data_dir = %config.data_dir.display(),
            host_key_mode = %config.host_key_policy,
            shell_policy = %config.shell_policy,
            rules = validator.rule_count(),
            key_version = config.master_key.version(),
            "Gateway initialized"
        );

        let vault = Arc::new(Vault::new(&config.master_key));
        Ok(Self::new(
            config,
            GatewayComponents {
                vault,
                store: Arc::new(store),
                audit: Arc::new(audit),
                sessions: Arc::new(sessions),
                validator,
            },
        ))
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub async fn register_server(
        &self,
        owner_id: &str,
        spec: ServerSpec,
    ) -> Result<ServerSummary, GatewayError> {
        Ok(self.registry.create(owner_id, spec).await?.summary())
    }

    pub async fn list_servers(&self, owner_id: &str) -> Result<Vec<ServerSummary>, GatewayError> {
        Ok(self
            .registry
            .list(owner_id)
            .await?
            .iter()
            .map(ServerRecord::summary)
            .collect())
    }

    pub async fn get_server(
        &self,
        owner_id: &str,
        server_id: &str,
    ) -> Result<ServerSummary, GatewayError> {
        Ok(self.registry.get(server_id, owner_id).await?.summary())
    }

    pub async fn update_server(
        &self,
        owner_id: &str,
        server_id: &str,
        patch: ServerPatch,
    ) -> Result<ServerSummary, GatewayError> {
        Ok(self
            .registry
            .update(server_id, owner_id, patch)
            .await?
            .summary())
    }

    /// Delete a server and cancel everything running against it.
    pub async fn delete_server(&self, owner_id: &str, server_id: &str) -> Result<(), GatewayError> {
        self.registry.delete(server_id, owner_id).await?;

        let running = self.inflight.count_for_server(server_id);
        let cancelled = self.inflight.cancel_server(server_id);
        if running > 0 {
            info!(server_id = %server_id, cancelled, "Cancelled in-flight executions for deleted server");
        }
        self.server_locks.remove(server_id);
        Ok(())
    }

    /// Validate and run one command on a registered server.
    ///
    /// `timeout_ms` of `None` or zero uses the configured default; larger
    /// values are clamped to the configured maximum.
    pub async fn execute_command(
        &self,
        owner_id: &str,
        server_id: &str,
        command: &str,
        timeout_ms: Option<u64>,
    ) -> Result<ExecutionResult, GatewayError> {
        let started = Instant::now();
        let inflight = self.inflight.register(server_id);

        let record = self.registry.get(server_id, owner_id).await.inspect_err(|e| {
            warn!(server_id = %server_id, owner = %owner_id, code = e.code(), "Execution refused");
        })?;

        let credential = match self.open_credential(&record) {
            Ok(credential) => credential,
            Err(err) => {
                self.record_failure(&record, command, &err, started).await;
                return Err(err);
            }
        };

        if let ValidationVerdict::Rejected {
            reason_code,
            matched_rule,
        } = self.validator.validate(command)
        {
            drop(credential);
            warn!(
                server_id = %record.id,
                owner = %owner_id,
                command = %command,
                reason = %reason_code,
                rule = %matched_rule,
                "Command rejected"
            );
            let mut entry = audit_entry(&record, command, ExecutionOutcome::Rejected, started);
            entry.error_code = Some("REJECTED".to_string());
            self.append_audit(entry).await;
            return Err(GatewayError::Rejected {
                reason_code,
                matched_rule,
            });
        }

        let timeout = self
            .config
            .effective_timeout(timeout_ms.map(Duration::from_millis));

        let _serial = if self.config.serialize_per_server {
            let lock = self.server_lock(&record.id);
            tokio::select! {
                biased;
                _ = inflight.token().cancelled() => {
                    let err = GatewayError::Cancelled;
                    self.record_failure(&record, command, &err, started).await;
                    return Err(err);
                }
                permit = lock.lock_owned() => Some(permit),
            }
        } else {
            None
        };

        info!(
            server_id = %record.id,
            target_host = %format!("{}@{}:{}", record.username, record.host, record.port),
            command = %command,
            timeout_ms = timeout.as_millis() as u64,
            "Executing command"
        );

        let outcome = self
            .sessions
            .execute(&target_of(&record), credential, command, timeout, inflight.token())
            .await;

        match outcome {
            Ok(result) => {
                let mut entry = audit_entry(&record, command, ExecutionOutcome::Completed, started);
                entry.exit_code = Some(result.exit_code);
                entry.truncated = result.truncated;
                self.append_audit(entry).await;
                info!(
                    server_id = %record.id,
                    exit_code = result.exit_code,
                    duration_ms = result.duration_ms,
                    truncated = result.truncated,
                    "Command completed"
                );
                Ok(result)
            }
            Err(session_err) => {
                let err = GatewayError::from(session_err);
                warn!(server_id = %record.id, code = err.code(), "Command failed: {}", err);
                self.record_failure(&record, command, &err, started).await;
                Err(err)
            }
        }
    }

    /// Connect, authenticate and run a fixed no-op to check reachability.
    ///
    /// Connection-level failures are reported in the probe rather than as an
    /// error. Ownership and integrity failures are still errors.
    pub async fn test_connection(
        &self,
        owner_id: &str,
        server_id: &str,
    ) -> Result<ConnectionProbe, GatewayError> {
        let started = Instant::now();
        let inflight = self.inflight.register(server_id);
        let record = self.registry.get(server_id, owner_id).await?;
        let credential = self.open_credential(&record)?;

        let outcome = self
            .sessions
            .execute(
                &target_of(&record),
                credential,
                PROBE_COMMAND,
                self.config.connect_timeout,
                inflight.token(),
            )
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let probe = match outcome {
            Ok(_) => ConnectionProbe {
                server_id: record.id.clone(),
                reachable: true,
                latency_ms,
                error_code: None,
                error: None,
            },
            Err(session_err) => {
                let err = GatewayError::from(session_err);
                ConnectionProbe {
                    server_id: record.id.clone(),
                    reachable: false,
                    latency_ms,
                    error_code: Some(err.code().to_string()),
                    error: Some(err.to_string()),
                }
            }
        };
        info!(server_id = %record.id, reachable = probe.reachable, latency_ms, "Connection probe");
        Ok(probe)
    }

    /// Newest audit entries for `owner_id`.
    ///
    /// `limit` of `None` or zero means the default; values above the maximum
    /// are clamped.
    pub async fn list_execution_logs(
        &self,
        owner_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ExecutionLogEntry>, GatewayError> {
        let limit = limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_LOG_LIMIT)
            .min(MAX_LOG_LIMIT);
        Ok(self.audit.recent(owner_id, limit).await?)
    }

    fn open_credential(&self, record: &ServerRecord) -> Result<Credential, GatewayError> {
        self.vault
            .open_credential(&record.secret_ciphertext, record.auth_mode)
            .map_err(|e| {
                error!(server_id = %record.id, "Stored credential failed verification: {}", e);
                GatewayError::from(e)
            })
    }

    fn server_lock(&self, server_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.server_locks
                .entry(server_id.to_string())
                .or_default()
                .value(),
        )
    }

    async fn record_failure(
        &self,
        record: &ServerRecord,
        command: &str,
        err: &GatewayError,
        started: Instant,
    ) {
        let mut entry = audit_entry(record, command, ExecutionOutcome::Failed, started);
        entry.error_code = Some(err.code().to_string());
        self.append_audit(entry).await;
    }

    /// The audit trail never changes the outcome of an execution.
    async fn append_audit(&self, entry: ExecutionLogEntry) {
        if let Err(e) = self.audit.append(&entry).await {
            error!(
                execution_id = %entry.id,
                server_id = %entry.server_id,
                "Failed to append audit entry: {}",
                e
            );
        }
    }
}

fn target_of(record: &ServerRecord) -> SessionTarget {
    SessionTarget {
        host: record.host.clone(),
        port: record.port,
        username: record.username.clone(),
        host_key_fingerprint: record.host_key_fingerprint.clone(),
    }
}

fn audit_entry(
    record: &ServerRecord,
    command: &str,
    outcome: ExecutionOutcome,
    started: Instant,
) -> ExecutionLogEntry {
    ExecutionLogEntry {
        id: uuid::Uuid::new_v4().to_string(),
        owner_id: record.owner_id.clone(),
        server_id: record.id.clone(),
        server_name: record.name.clone(),
        command: command.to_string(),
        outcome,
        exit_code: None,
        error_code: None,
        duration_ms: started.elapsed().as_millis() as u64,
        truncated: false,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}
