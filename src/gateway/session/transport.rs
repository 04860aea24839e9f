//! The seam between the session state machine and the SSH library.
//!
//! [`SshSessionManager`](super::SshSessionManager) drives a [`Transport`]
//! obtained from a [`Connector`]. Production uses the russh-backed
//! implementations in `client`; tests substitute scripted fakes.

use async_trait::async_trait;

use crate::gateway::error::SessionError;
use crate::gateway::session::SessionTarget;
use crate::gateway::vault::Credential;

/// What the remote side sent on the exec channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    ExitStatus(u32),
    /// The process died from a signal.
    ExitSignal(String),
    Eof,
    /// The channel or connection is gone.
    Closed,
}

/// Opens transports. One per execution.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish TCP and complete the SSH handshake, including host key checks.
    async fn connect(&self, target: &SessionTarget) -> Result<Box<dyn Transport>, SessionError>;
}

/// One SSH connection carrying a single exec channel.
#[async_trait]
pub trait Transport: Send {
    /// Offer exactly one credential. Consumes it.
    async fn authenticate(
        &mut self,
        username: &str,
        credential: Credential,
    ) -> Result<(), SessionError>;

    /// Open a session channel and start `command` on it.
    async fn exec(&mut self, command: &str) -> Result<(), SessionError>;

    /// Next channel event. Returns [`ChannelEvent::Closed`] once nothing more will arrive.
    async fn next_event(&mut self) -> ChannelEvent;

    /// Ask the remote side to kill the running process and close the channel.
    async fn terminate(&mut self);

    /// Release the channel and the connection. Safe to call more than once.
    async fn close(&mut self);
}
