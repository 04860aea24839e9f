//! Error taxonomy for the gateway and classification of SSH failures.
//!
//! Every failure the gateway can report is a distinct [`GatewayError`] variant.
//! Session-level failures start life as a [`SessionError`] raised by the session
//! manager and pass through unchanged.
//!
//! # Classification
//!
//! Connection-phase failures from russh are sorted by [`classify_ssh_error`]
//! on the error variant, never on message text:
//!
//! 1. **Connection failures**: socket errors (refused, unreachable, DNS,
//!    reset), a peer hang-up, and keepalive or inactivity timeouts. Reported
//!    as [`SessionError::ConnectFailed`].
//!
//! 2. **Everything else**: handshake, negotiation and packet-level problems.
//!    Reported as [`SessionError::Protocol`].
//!
//! A wrong credential is not a russh error at all. The server answers the
//! authentication request with a failure, which the transport reports as
//! [`SessionError::AuthFailed`], as does key material that cannot be decoded.

use std::time::Duration;

use thiserror::Error;

use crate::gateway::storage::StoreError;
use crate::gateway::types::ReasonCode;
use crate::gateway::vault::VaultError;

/// Failure raised by the SSH session manager.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Network, DNS, refusal, or connect-phase timeout.
    #[error("connection failed: {0}")]
    ConnectFailed(String),
    /// The server rejected the credential.
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// The command did not finish within its timeout.
    #[error("command timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    /// Handshake, negotiation or host key verification failure.
    #[error("SSH protocol error: {0}")]
    Protocol(String),
    /// The caller cancelled the execution, or the server record was deleted.
    #[error("execution cancelled")]
    Cancelled,
}

/// Every outcome other than success that the gateway can report.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed input to a registry operation.
    #[error("validation failed: {0}")]
    Validation(String),
    /// No server record with this id.
    #[error("server not found: {0}")]
    NotFound(String),
    /// The record belongs to another user.
    #[error("access to server {0} is forbidden")]
    Forbidden(String),
    /// The command was blocked by policy. Never rewritten by the gateway.
    #[error("command rejected ({reason_code}): matched {matched_rule}")]
    Rejected {
        reason_code: ReasonCode,
        matched_rule: String,
    },
    #[error("connection failed: {0}")]
    ConnectFailed(String),
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("command timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("SSH protocol error: {0}")]
    Protocol(String),
    /// Stored ciphertext failed verification. Fatal for the record.
    #[error("stored credential failed integrity verification: {0}")]
    Integrity(String),
    #[error("execution cancelled")]
    Cancelled,
    /// The backing store failed.
    #[error("storage error: {0}")]
    Storage(String),
    /// Encryption or serialization failure inside the gateway.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable machine-readable code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "VALIDATION_ERROR",
            GatewayError::NotFound(_) => "NOT_FOUND",
            GatewayError::Forbidden(_) => "FORBIDDEN",
            GatewayError::Rejected { .. } => "REJECTED",
            GatewayError::ConnectFailed(_) => "CONNECT_FAILED",
            GatewayError::AuthFailed(_) => "AUTH_FAILED",
            GatewayError::Timeout(_) => "TIMEOUT",
            GatewayError::Protocol(_) => "PROTOCOL_ERROR",
            GatewayError::Integrity(_) => "INTEGRITY_ERROR",
            GatewayError::Cancelled => "CANCELLED",
            GatewayError::Storage(_) => "STORAGE_ERROR",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether a caller-side retry may succeed without changing the request.
    ///
    /// The gateway itself never retries; a remote command may have side effects.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::ConnectFailed(_) | GatewayError::Timeout(_)
        )
    }
}

impl From<SessionError> for GatewayError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::ConnectFailed(msg) => GatewayError::ConnectFailed(msg),
            SessionError::AuthFailed(msg) => GatewayError::AuthFailed(msg),
            SessionError::Timeout(after) => GatewayError::Timeout(after),
            SessionError::Protocol(msg) => GatewayError::Protocol(msg),
            SessionError::Cancelled => GatewayError::Cancelled,
        }
    }
}

impl From<VaultError> for GatewayError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::Integrity(msg) => GatewayError::Integrity(msg),
            VaultError::InvalidKey(msg) | VaultError::Encryption(msg) => {
                GatewayError::Internal(msg)
            }
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        GatewayError::Storage(err.to_string())
    }
}

/// Sort a russh failure raised during `context` into a typed [`SessionError`].
///
/// The message keeps `context` as a prefix for the operator; only the variant
/// decides the outcome.
pub(crate) fn classify_ssh_error(context: &str, err: &russh::Error) -> SessionError {
    let message = format!("{}: {}", context, err);
    match err {
        russh::Error::IO(_)
        | russh::Error::Disconnect
        | russh::Error::HUP
        | russh::Error::ConnectionTimeout
        | russh::Error::KeepaliveTimeout
        | russh::Error::InactivityTimeout
        | russh::Error::Elapsed(_)
        | russh::Error::SendError
        | russh::Error::RecvError => SessionError::ConnectFailed(message),
        _ => SessionError::Protocol(message),
    }
}
