//! russh-backed [`Connector`] and [`Transport`].
//!
//! ## Connection Lifecycle
//!
//! 1. **Client Configuration**: keepalive, compression and inactivity
//!    settings from [`build_client_config`].
//!
//! 2. **Handshake**: TCP connect and key exchange. The server key is checked
//!    by [`GatewayClientHandler`]; a refused key surfaces as a protocol error
//!    naming the reason.
//!
//! 3. **Authentication**: the single strategy matching the credential.
//!
//! 4. **Execution**: one session channel, one `exec` request.
//!
//! Timeouts and cancellation are applied by the session manager around each
//! of these calls; nothing here retries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::{Channel, ChannelMsg, client};
use tracing::{debug, warn};

use crate::gateway::auth::strategy_for;
use crate::gateway::error::{SessionError, classify_ssh_error};
use crate::gateway::session::SessionTarget;
use crate::gateway::session::handler::GatewayClientHandler;
use crate::gateway::session::known_hosts::{HostKeyPolicy, KnownHostsStore};
use crate::gateway::session::transport::{ChannelEvent, Connector, Transport};
use crate::gateway::vault::Credential;

/// Keepalive probe interval. Three unanswered probes drop the connection.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const KEEPALIVE_MAX: usize = 3;

/// Build russh client configuration with the specified settings.
///
/// Creates an `Arc<client::Config>` with:
/// - Inactivity timeout set to `inactivity_timeout`
/// - Keepalive interval of 30 seconds with max 3 keepalives
/// - Compression preference based on `compress` flag (ZLIB if enabled, NONE if disabled)
///
/// # Examples
///
/// ```ignore
/// let config = build_client_config(Some(Duration::from_secs(30)), true);
/// assert_eq!(config.inactivity_timeout, Some(Duration::from_secs(30)));
/// ```
pub(crate) fn build_client_config(
    inactivity_timeout: Option<Duration>,
    compress: bool,
) -> Arc<client::Config> {
    let compression = if compress {
        (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
    } else {
        (&[russh::compression::NONE][..]).into()
    };

    let preferred = russh::Preferred {
        compression,
        ..Default::default()
    };

    Arc::new(client::Config {
        inactivity_timeout,
        keepalive_interval: Some(KEEPALIVE_INTERVAL),
        keepalive_max: KEEPALIVE_MAX,
        preferred,
        ..Default::default()
    })
}

/// Opens real SSH connections.
pub struct RusshConnector {
    config: Arc<client::Config>,
    policy: HostKeyPolicy,
    known_hosts: Arc<KnownHostsStore>,
}

impl RusshConnector {
    /// `inactivity_timeout` bounds silence on the wire, independent of the
    /// per-command deadline.
    pub fn new(
        policy: HostKeyPolicy,
        known_hosts: Arc<KnownHostsStore>,
        inactivity_timeout: Duration,
        compress: bool,
    ) -> Self {
        Self {
            config: build_client_config(Some(inactivity_timeout), compress),
            policy,
            known_hosts,
        }
    }
}

#[async_trait]
impl Connector for RusshConnector {
    async fn connect(&self, target: &SessionTarget) -> Result<Box<dyn Transport>, SessionError> {
        let handler = GatewayClientHandler::new(target, self.policy, Arc::clone(&self.known_hosts));
        let rejection = handler.rejection_slot();

        match client::connect(
            Arc::clone(&self.config),
            (target.host.as_str(), target.port),
            handler,
        )
        .await
        {
            Ok(handle) => Ok(Box::new(RusshTransport {
                handle,
                channel: None,
            })),
            Err(e) => {
                if let Some(reason) = rejection.get() {
                    return Err(SessionError::Protocol(format!(
                        "host key verification failed: {}",
                        reason
                    )));
                }
                Err(classify_ssh_error("Failed to connect", &e))
            }
        }
    }
}

/// One authenticated-or-not connection and its exec channel.
pub struct RusshTransport {
    handle: client::Handle<GatewayClientHandler>,
    channel: Option<Channel<client::Msg>>,
}

#[async_trait]
impl Transport for RusshTransport {
    async fn authenticate(
        &mut self,
        username: &str,
        credential: Credential,
    ) -> Result<(), SessionError> {
        let strategy = strategy_for(credential);
        debug!(method = strategy.name(), user = %username, "Authenticating");

        // Only an unsuccessful auth result is a rejected credential
        match strategy.authenticate(&mut self.handle, username).await? {
            true => Ok(()),
            false => Err(SessionError::AuthFailed(format!(
                "server rejected {} authentication for user {}",
                strategy.name(),
                username
            ))),
        }
    }

    async fn exec(&mut self, command: &str) -> Result<(), SessionError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| SessionError::Protocol(format!("Failed to open channel: {}", e)))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| SessionError::Protocol(format!("Failed to execute command: {}", e)))?;

        self.channel = Some(channel);
        Ok(())
    }

    async fn next_event(&mut self) -> ChannelEvent {
        let Some(channel) = self.channel.as_mut() else {
            return ChannelEvent::Closed;
        };

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => return ChannelEvent::Stdout(data.to_vec()),
                // ext == 1 is stderr in SSH protocol
                Some(ChannelMsg::ExtendedData { data, ext }) if ext == 1 => {
                    return ChannelEvent::Stderr(data.to_vec());
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    return ChannelEvent::ExitStatus(exit_status);
                }
                Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                    return ChannelEvent::ExitSignal(format!("{:?}", signal_name));
                }
                Some(ChannelMsg::Eof) => return ChannelEvent::Eof,
                Some(ChannelMsg::Close) | None => return ChannelEvent::Closed,
                Some(_) => {
                    // Ignore other message types
                }
            }
        }
    }

    async fn terminate(&mut self) {
        if let Some(channel) = self.channel.as_ref() {
            if let Err(e) = channel.signal(russh::Sig::KILL).await {
                warn!("Failed to signal remote process: {}", e);
            }
            let _ = channel.eof().await;
            let _ = channel.close().await;
        }
    }

    async fn close(&mut self) {
        if let Some(channel) = self.channel.take() {
            let _ = channel.close().await;
        }
        let _ = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await;
    }
}
