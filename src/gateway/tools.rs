//! MCP tool surface for the gateway.
//!
//! - `server_register`: Register a server and seal its credential
//! - `server_list`: List the caller's servers
//! - `server_get`: Show one server
//! - `server_update`: Change fields or rotate the credential
//! - `server_delete`: Remove a server, cancelling running commands on it
//! - `server_execute`: Run one command and wait for its result
//! - `server_test_connection`: Check that a server is reachable and accepts the credential
//! - `execution_logs`: Recent execution attempts
//!
//! Every tool takes the caller's `owner_id`. It is trusted as given: this
//! surface is meant to sit behind a proxy that has already authenticated the
//! caller.

use std::sync::Arc;

use poem_mcpserver::{Tools, content::Text, tool::StructuredContent};

use crate::gateway::error::GatewayError;
use crate::gateway::orchestrator::Gateway;
use crate::gateway::types::{
    AuthMode, ConnectionProbe, CredentialInput, ExecutionLogResponse, ExecutionResult, ServerListResponse,
    ServerPatch, ServerSpec, ServerSummary,
};

/// MCP tools backed by a shared [`Gateway`].
pub struct GatewayTools {
    gateway: Arc<Gateway>,
}

impl GatewayTools {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }
}

#[Tools]
impl GatewayTools {
    /// Register a remote SSH server.
    ///
    /// The credential is encrypted before it is stored and is never returned
    /// by any tool. Supply exactly one of `password` or `private_key`,
    /// matching `auth_mode`.
    #[allow(clippy::too_many_arguments)]
    async fn server_register(
        &self,
        /// ID of the user that will own the server
        owner_id: String,
        /// Human-readable name (e.g., "production-db")
        name: String,
        /// Hostname or IP address
        host: String,
        /// SSH port (default: 22)
        port: Option<u32>,
        /// SSH username
        username: String,
        /// "password" or "private_key"
        auth_mode: AuthMode,
        /// Password, for auth_mode "password"
        password: Option<String>,
        /// PEM or OpenSSH private key text, for auth_mode "private_key"
        private_key: Option<String>,
        /// Passphrase for an encrypted private key
        passphrase: Option<String>,
        /// Expected host key fingerprint, "SHA256:..." (optional pin)
        host_key_fingerprint: Option<String>,
    ) -> Result<StructuredContent<ServerSummary>, String> {
        let spec = ServerSpec {
            name,
            host,
            port,
            username,
            credential: CredentialInput {
                auth_mode,
                password,
                private_key,
                passphrase,
            },
            host_key_fingerprint,
        };
        self.gateway
            .register_server(&owner_id, spec)
            .await
            .map(StructuredContent)
            .map_err(tool_error)
    }

    /// List servers owned by the caller, oldest first. Never includes credentials.
    async fn server_list(
        &self,
        /// ID of the calling user
        owner_id: String,
    ) -> Result<StructuredContent<ServerListResponse>, String> {
        let servers = self
            .gateway
            .list_servers(&owner_id)
            .await
            .map_err(tool_error)?;
        Ok(StructuredContent(ServerListResponse {
            count: servers.len(),
            servers,
        }))
    }

    /// Show one server's metadata.
    async fn server_get(
        &self,
        /// ID of the calling user
        owner_id: String,
        /// Server ID returned from server_register
        server_id: String,
    ) -> Result<StructuredContent<ServerSummary>, String> {
        self.gateway
            .get_server(&owner_id, &server_id)
            .await
            .map(StructuredContent)
            .map_err(tool_error)
    }

    /// Update a server. Omitted fields are left unchanged.
    ///
    /// To change the credential, pass `auth_mode` together with the complete
    /// new secret. An empty `host_key_fingerprint` removes the pin.
    #[allow(clippy::too_many_arguments)]
    async fn server_update(
        &self,
        /// ID of the calling user
        owner_id: String,
        /// Server ID returned from server_register
        server_id: String,
        name: Option<String>,
        host: Option<String>,
        port: Option<u32>,
        username: Option<String>,
        /// Required when changing the credential
        auth_mode: Option<AuthMode>,
        password: Option<String>,
        private_key: Option<String>,
        passphrase: Option<String>,
        host_key_fingerprint: Option<String>,
    ) -> Result<StructuredContent<ServerSummary>, String> {
        let credential = credential_patch(auth_mode, password, private_key, passphrase)
            .map_err(tool_error)?;
        let patch = ServerPatch {
            name,
            host,
            port,
            username,
            credential,
            host_key_fingerprint,
        };
        self.gateway
            .update_server(&owner_id, &server_id, patch)
            .await
            .map(StructuredContent)
            .map_err(tool_error)
    }

    /// Delete a server.
    ///
    /// **Important:** Commands still running on this server are cancelled.
    async fn server_delete(
        &self,
        /// ID of the calling user
        owner_id: String,
        /// Server ID returned from server_register
        server_id: String,
    ) -> Result<Text<String>, String> {
        self.gateway
            .delete_server(&owner_id, &server_id)
            .await
            .map_err(tool_error)?;
        Ok(Text(format!("Server {} deleted", server_id)))
    }

    /// Execute one command on a server and wait for it to finish.
    ///
    /// Commands are checked against the gateway's policy first. Shell
    /// chaining, redirection and substitution (`;`, `|`, `&&`, `>`, `$(...)`,
    /// backticks) are refused unless the gateway allows a shell, and known
    /// destructive commands are always refused. Output beyond the configured
    /// cap is dropped and `truncated` is set.
    async fn server_execute(
        &self,
        /// ID of the calling user
        owner_id: String,
        /// Server ID returned from server_register
        server_id: String,
        /// Command to run on the remote server
        command: String,
        /// Timeout in milliseconds (default: 30000, env: SSH_COMMAND_TIMEOUT; clamped to SSH_MAX_COMMAND_TIMEOUT)
        timeout_ms: Option<u64>,
    ) -> Result<StructuredContent<ExecutionResult>, String> {
        self.gateway
            .execute_command(&owner_id, &server_id, &command, timeout_ms)
            .await
            .map(StructuredContent)
            .map_err(tool_error)
    }

    /// Connect and authenticate to a server without running a user command.
    ///
    /// Reports `reachable=false` with an error code for network and
    /// authentication problems.
    async fn server_test_connection(
        &self,
        /// ID of the calling user
        owner_id: String,
        /// Server ID returned from server_register
        server_id: String,
    ) -> Result<StructuredContent<ConnectionProbe>, String> {
        self.gateway
            .test_connection(&owner_id, &server_id)
            .await
            .map(StructuredContent)
            .map_err(tool_error)
    }

    /// Recent execution attempts by the caller, newest first.
    async fn execution_logs(
        &self,
        /// ID of the calling user
        owner_id: String,
        /// Maximum entries to return (default: 50, max: 1000)
        limit: Option<u32>,
    ) -> Result<StructuredContent<ExecutionLogResponse>, String> {
        let entries = self
            .gateway
            .list_execution_logs(&owner_id, limit.map(|l| l as usize))
            .await
            .map_err(tool_error)?;
        Ok(StructuredContent(ExecutionLogResponse {
            count: entries.len(),
            entries,
        }))
    }
}

/// Render an error as `CODE: message` so clients can branch on the code.
fn tool_error(err: GatewayError) -> String {
    format!("{}: {}", err.code(), err)
}

/// Credential part of an update. Secret fields without a mode are refused
/// rather than guessed.
fn credential_patch(
    auth_mode: Option<AuthMode>,
    password: Option<String>,
    private_key: Option<String>,
    passphrase: Option<String>,
) -> Result<Option<CredentialInput>, GatewayError> {
    match auth_mode {
        Some(auth_mode) => Ok(Some(CredentialInput {
            auth_mode,
            password,
            private_key,
            passphrase,
        })),
        None if password.is_some() || private_key.is_some() || passphrase.is_some() => {
            Err(GatewayError::Validation(
                "auth_mode is required when changing the credential".into(),
            ))
        }
        None => Ok(None),
    }
}
