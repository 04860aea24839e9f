//! Records, inputs and results shared by the gateway layers.
//!
//! Types returned through the MCP tool surface implement `Serialize` and
//! `JsonSchema`. Types that carry plaintext secrets (`ServerSpec`,
//! `CredentialInput`) redact them in their `Debug` output and are never
//! serialized.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How the sealed secret of a server record is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Literal password.
    Password,
    /// PEM or OpenSSH encoded private key, optionally passphrase-protected.
    PrivateKey,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::Password => write!(f, "password"),
            AuthMode::PrivateKey => write!(f, "private_key"),
        }
    }
}

impl FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "password" => Ok(AuthMode::Password),
            "private_key" | "key" => Ok(AuthMode::PrivateKey),
            other => Err(format!(
                "Unknown auth mode '{}', expected 'password' or 'private_key'",
                other
            )),
        }
    }
}

/// A registered remote host as persisted in the record store.
///
/// `secret_ciphertext` is the vault-sealed credential; the plaintext never
/// reaches this struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth_mode: AuthMode,
    pub secret_ciphertext: String,
    /// Pinned `SHA256:` host key fingerprint. Overrides the known-hosts policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_key_fingerprint: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ServerRecord {
    /// Metadata view without the sealed secret.
    pub fn summary(&self) -> ServerSummary {
        ServerSummary {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            name: self.name.clone(),
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            auth_mode: self.auth_mode,
            host_key_fingerprint: self.host_key_fingerprint.clone(),
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
        }
    }
}

/// Server metadata returned to callers. Never includes secret material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ServerSummary {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub host: String,
    #[schemars(schema_with = "crate::gateway::schema::uint")]
    pub port: u16,
    pub username: String,
    pub auth_mode: AuthMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_key_fingerprint: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Plaintext credential fields as supplied by a caller.
///
/// Exactly one of `password` / `private_key` must be set, matching `auth_mode`.
pub struct CredentialInput {
    pub auth_mode: AuthMode,
    pub password: Option<String>,
    pub private_key: Option<String>,
    pub passphrase: Option<String>,
}

impl fmt::Debug for CredentialInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialInput")
            .field("auth_mode", &self.auth_mode)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Input to `register_server`.
#[derive(Debug)]
pub struct ServerSpec {
    pub name: String,
    pub host: String,
    /// Defaults to 22. Wider than `u16` so out-of-range input can be reported.
    pub port: Option<u32>,
    pub username: String,
    pub credential: CredentialInput,
    pub host_key_fingerprint: Option<String>,
}

/// Partial update for `update_server`. `None` leaves a field untouched.
///
/// A credential change must carry the complete new credential. An empty
/// `host_key_fingerprint` clears the pin.
#[derive(Debug, Default)]
pub struct ServerPatch {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u32>,
    pub username: Option<String>,
    pub credential: Option<CredentialInput>,
    pub host_key_fingerprint: Option<String>,
}

impl ServerPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.host.is_none()
            && self.port.is_none()
            && self.username.is_none()
            && self.credential.is_none()
            && self.host_key_fingerprint.is_none()
    }
}

/// Captured result of one remote command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionResult {
    /// Remote exit status, or -1 when the server reported none.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    #[schemars(schema_with = "crate::gateway::schema::uint")]
    pub duration_ms: u64,
    /// Whether either stream exceeded the capture cap.
    pub truncated: bool,
}

/// Why a command was rejected by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    /// Empty or whitespace-only command.
    Empty,
    /// Shell chaining, redirection or substitution metacharacter.
    Metachar,
    /// Matched a destructive-command denylist rule.
    Denylist,
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReasonCode::Empty => write!(f, "EMPTY"),
            ReasonCode::Metachar => write!(f, "METACHAR"),
            ReasonCode::Denylist => write!(f, "DENYLIST"),
        }
    }
}

/// Outcome of command validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ValidationVerdict {
    Allowed,
    Rejected {
        reason_code: ReasonCode,
        matched_rule: String,
    },
}

impl ValidationVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ValidationVerdict::Allowed)
    }
}

/// Final state of an audited execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// The command ran; see `exit_code`.
    Completed,
    /// Blocked by the validator before any connection.
    Rejected,
    /// Connection, authentication, timeout, protocol or cancellation failure.
    Failed,
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionOutcome::Completed => write!(f, "completed"),
            ExecutionOutcome::Rejected => write!(f, "rejected"),
            ExecutionOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// Audit record for one execution attempt. Holds no secrets and no output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionLogEntry {
    pub id: String,
    pub owner_id: String,
    pub server_id: String,
    pub server_name: String,
    pub command: String,
    pub outcome: ExecutionOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// `GatewayError::code()` of the failure, when the outcome is not `completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[schemars(schema_with = "crate::gateway::schema::uint")]
    pub duration_ms: u64,
    #[serde(default)]
    pub truncated: bool,
    /// RFC3339 timestamp
    pub timestamp: String,
}

/// Result of a connectivity probe against a registered server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConnectionProbe {
    pub server_id: String,
    pub reachable: bool,
    #[schemars(schema_with = "crate::gateway::schema::uint")]
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ServerListResponse {
    /// Servers owned by the caller, oldest first
    pub servers: Vec<ServerSummary>,
    /// Number of servers returned
    #[schemars(schema_with = "crate::gateway::schema::uint")]
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionLogResponse {
    /// Most recent executions first
    pub entries: Vec<ExecutionLogEntry>,
    #[schemars(schema_with = "crate::gateway::schema::uint")]
    pub count: usize,
}
