//! SSH session management.
//!
//! Opens one connection per execution, authenticates with the record's single
//! credential, runs one command, and always tears the connection down.
//!
//! # State Machine
//!
//! ```text
//! Idle -> Connecting -> Authenticating -> Executing -> Completed -> Closed
//!                  \              \              \--> TimedOut  -> Closed
//!                   \--------------\--------------\-> Failed    -> Closed
//!                                                  \> Cancelled -> Closed
//! ```
//!
//! Every path ends in `Closed` before [`SessionManager::execute`] returns.

pub mod capture;
pub(crate) mod client;
pub(crate) mod handler;
pub mod known_hosts;
mod manager;
#[cfg(test)]
pub(crate) mod testing;
pub mod transport;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::gateway::error::SessionError;
use crate::gateway::types::ExecutionResult;
use crate::gateway::vault::Credential;

pub use client::RusshConnector;
pub use manager::{SessionSettings, SshSessionManager};

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Pinned `SHA256:` fingerprint, if the record has one.
    pub host_key_fingerprint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Authenticating,
    Executing,
    Completed,
    TimedOut,
    Failed,
    Cancelled,
    Closed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed
                | SessionState::TimedOut
                | SessionState::Failed
                | SessionState::Cancelled
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::Executing => "executing",
            SessionState::Completed => "completed",
            SessionState::TimedOut => "timed_out",
            SessionState::Failed => "failed",
            SessionState::Cancelled => "cancelled",
            SessionState::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

/// Runs a single command on a remote host.
#[async_trait]
pub trait SessionManager: Send + Sync {
    /// Connect, authenticate, run `command`, and close.
    ///
    /// `timeout` bounds the command once started. Connection setup is bounded
    /// separately by the manager's connect timeout. Cancelling `cancel` closes
    /// the channel and connection; a well-behaved server then ends the remote
    /// process, but that cannot be forced.
    async fn execute(
        &self,
        target: &SessionTarget,
        credential: Credential,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, SessionError>;
}
