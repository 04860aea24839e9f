//! The per-execution session runner.

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::gateway::error::SessionError;
use crate::gateway::session::capture::CaptureBuffer;
use crate::gateway::session::transport::{ChannelEvent, Connector, Transport};
use crate::gateway::session::{SessionManager, SessionState, SessionTarget};
use crate::gateway::types::ExecutionResult;
use crate::gateway::vault::Credential;

/// Upper bound on terminate and close calls after a failure or timeout.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Bounds each of connect, authenticate and exec-request.
    pub connect_timeout: Duration,
    /// Per-stream capture cap in bytes.
    pub output_cap: usize,
}

/// [`SessionManager`] that opens a fresh transport for every call.
pub struct SshSessionManager<C> {
    connector: C,
    settings: SessionSettings,
}

enum Step {
    Event(ChannelEvent),
    TimedOut,
    Cancelled,
}

/// Logs every state change for one execution.
struct Tracker {
    label: String,
    state: SessionState,
}

impl Tracker {
    fn new(target: &SessionTarget) -> Self {
        Self {
            label: format!("{}@{}:{}", target.username, target.host, target.port),
            state: SessionState::Idle,
        }
    }

    fn advance(&mut self, next: SessionState) {
        debug!(target_host = %self.label, from = %self.state, to = %next, "Session state");
        self.state = next;
    }

    /// Every path reaches an outcome state before the connection is released.
    fn close(&mut self) {
        debug_assert!(
            self.state.is_terminal(),
            "closing session in non-terminal state {}",
            self.state
        );
        self.advance(SessionState::Closed);
    }

    fn fail(&mut self, err: &SessionError) {
        let next = match err {
            SessionError::Cancelled => SessionState::Cancelled,
            SessionError::Timeout(_) => SessionState::TimedOut,
            _ => SessionState::Failed,
        };
        self.advance(next);
    }
}

impl<C: Connector> SshSessionManager<C> {
    pub fn new(connector: C, settings: SessionSettings) -> Self {
        Self {
            connector,
            settings,
        }
    }

    /// Run a setup step under the connect timeout, giving way to cancellation.
    ///
    /// A setup step that times out is reported as a connection failure: the
    /// host did not become usable in time.
    async fn setup_phase<T>(
        &self,
        cancel: &CancellationToken,
        phase: &str,
        step: impl Future<Output = Result<T, SessionError>>,
    ) -> Result<T, SessionError> {
        let limit = self.settings.connect_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SessionError::Cancelled),
            result = tokio::time::timeout(limit, step) => match result {
                Ok(inner) => inner,
                Err(_) => Err(SessionError::ConnectFailed(format!(
                    "{} timed out after {}ms",
                    phase,
                    limit.as_millis()
                ))),
            },
        }
    }

    async fn stop_remote(&self, transport: &mut dyn Transport) {
        if tokio::time::timeout(CLOSE_GRACE, transport.terminate())
            .await
            .is_err()
        {
            warn!("Remote side did not acknowledge termination in time");
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive(
        &self,
        target: &SessionTarget,
        transport: &mut dyn Transport,
        tracker: &mut Tracker,
        credential: Credential,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<ExecutionResult, SessionError> {
        tracker.advance(SessionState::Authenticating);
        let auth = self
            .setup_phase(
                cancel,
                "authentication",
                transport.authenticate(&target.username, credential),
            )
            .await;
        if let Err(e) = auth {
            tracker.fail(&e);
            return Err(e);
        }

        tracker.advance(SessionState::Executing);
        let exec = self
            .setup_phase(cancel, "exec request", transport.exec(command))
            .await;
        if let Err(e) = exec {
            tracker.fail(&e);
            return Err(e);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut capture = CaptureBuffer::new(self.settings.output_cap);
        let mut exit_status: Option<u32> = None;

        loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                _ = tokio::time::sleep_until(deadline) => Step::TimedOut,
                event = transport.next_event() => Step::Event(event),
            };

            match step {
                Step::Cancelled => {
                    self.stop_remote(transport).await;
                    tracker.advance(SessionState::Cancelled);
                    return Err(SessionError::Cancelled);
                }
                Step::TimedOut => {
                    warn!(
                        target_host = %tracker.label,
                        "Command timed out after {:?} ({} bytes stdout, {} bytes stderr captured)",
                        timeout,
                        capture.stdout.len(),
                        capture.stderr.len()
                    );
                    self.stop_remote(transport).await;
                    tracker.advance(SessionState::TimedOut);
                    return Err(SessionError::Timeout(timeout));
                }
                Step::Event(ChannelEvent::Stdout(data)) => capture.push_stdout(&data),
                Step::Event(ChannelEvent::Stderr(data)) => capture.push_stderr(&data),
                Step::Event(ChannelEvent::ExitStatus(code)) => exit_status = Some(code),
                Step::Event(ChannelEvent::ExitSignal(signal)) => {
                    debug!(target_host = %tracker.label, signal = %signal, "Remote process killed by signal");
                }
                Step::Event(ChannelEvent::Eof) => {
                    // Continue to wait for exit status if not received yet
                    if exit_status.is_some() {
                        break;
                    }
                }
                Step::Event(ChannelEvent::Closed) => break,
            }
        }

        tracker.advance(SessionState::Completed);
        let truncated = capture.truncated();
        if truncated {
            debug!(
                target_host = %tracker.label,
                cap = self.settings.output_cap,
                "Output exceeded capture cap and was truncated"
            );
        }
        let (stdout, stderr) = capture.into_strings();

        Ok(ExecutionResult {
            exit_code: exit_status.map(|c| c as i32).unwrap_or(-1),
            stdout,
            stderr,
            duration_ms: started.elapsed().as_millis() as u64,
            truncated,
        })
    }
}

#[async_trait]
impl<C: Connector> SessionManager for SshSessionManager<C> {
    async fn execute(
        &self,
        target: &SessionTarget,
        credential: Credential,
        command: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, SessionError> {
        let started = Instant::now();
        let mut tracker = Tracker::new(target);

        tracker.advance(SessionState::Connecting);
        let connected = self
            .setup_phase(cancel, "connect", self.connector.connect(target))
            .await;
        let mut transport = match connected {
            Ok(transport) => transport,
            Err(e) => {
                drop(credential);
                tracker.fail(&e);
                tracker.close();
                return Err(e);
            }
        };

        let result = self
            .drive(
                target,
                transport.as_mut(),
                &mut tracker,
                credential,
                command,
                timeout,
                cancel,
                started,
            )
            .await;

        if tokio::time::timeout(CLOSE_GRACE, transport.close())
            .await
            .is_err()
        {
            warn!(target_host = %tracker.label, "Connection close did not finish in time; dropping it");
        }
        drop(transport);
        tracker.close();

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::session::testing::{FakeConnector, Script};

    const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

    fn target() -> SessionTarget {
        SessionTarget {
            host: "10.0.0.5".to_string(),
            port: 22,
            username: "deploy".to_string(),
            host_key_fingerprint: None,
        }
    }

    fn manager(script: Script, output_cap: usize) -> (SshSessionManager<FakeConnector>, std::sync::Arc<crate::gateway::session::testing::FakeStats>) {
        let (connector, stats) = FakeConnector::new(script);
        (
            SshSessionManager::new(
                connector,
                SessionSettings {
                    connect_timeout: CONNECT_TIMEOUT,
                    output_cap,
                },
            ),
            stats,
        )
    }

    async fn run(
        manager: &SshSessionManager<FakeConnector>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, SessionError> {
        manager
            .execute(&target(), Credential::password("pw"), "uptime", timeout, cancel)
            .await
    }

    mod completion {
        use super::*;

        #[tokio::test]
        async fn test_collects_output_and_exit_code() {
            let (manager, stats) = manager(Script::exits("up 3 days\n", 0), 1024);
            let result = run(&manager, Duration::from_secs(5), &CancellationToken::new())
                .await
                .expect("result");

            assert_eq!(result.exit_code, 0);
            assert_eq!(result.stdout, "up 3 days\n");
            assert!(!result.truncated);
            assert_eq!(stats.commands(), vec!["uptime".to_string()]);
            assert_eq!(stats.credentials(), vec!["pw".to_string()]);
            assert_eq!(stats.closes(), 1);
            assert_eq!(stats.terminates(), 0);
        }

        #[tokio::test]
        async fn test_stderr_and_nonzero_exit() {
            let script = Script {
                events: vec![
                    (Duration::ZERO, ChannelEvent::Stderr(b"no such file\n".to_vec())),
                    (Duration::ZERO, ChannelEvent::ExitStatus(2)),
                    (Duration::ZERO, ChannelEvent::Closed),
                ],
                ..Script::exits("", 0)
            };
            let (manager, _stats) = manager(script, 1024);
            let result = run(&manager, Duration::from_secs(5), &CancellationToken::new())
                .await
                .expect("result");

            assert_eq!(result.exit_code, 2);
            assert_eq!(result.stderr, "no such file\n");
            assert!(result.stdout.is_empty());
        }

        #[tokio::test]
        async fn test_missing_exit_status_is_minus_one() {
            let script = Script {
                events: vec![
                    (Duration::ZERO, ChannelEvent::Stdout(b"partial".to_vec())),
                    (Duration::ZERO, ChannelEvent::Eof),
                    (Duration::ZERO, ChannelEvent::Closed),
                ],
                ..Script::exits("", 0)
            };
            let (manager, _stats) = manager(script, 1024);
            let result = run(&manager, Duration::from_secs(5), &CancellationToken::new())
                .await
                .expect("result");
            assert_eq!(result.exit_code, -1);
        }

        #[tokio::test]
        async fn test_exit_status_after_eof() {
            let script = Script {
                events: vec![
                    (Duration::ZERO, ChannelEvent::Eof),
                    (Duration::ZERO, ChannelEvent::ExitStatus(7)),
                    (Duration::ZERO, ChannelEvent::Closed),
                ],
                ..Script::exits("", 0)
            };
            let (manager, _stats) = manager(script, 1024);
            let result = run(&manager, Duration::from_secs(5), &CancellationToken::new())
                .await
                .expect("result");
            assert_eq!(result.exit_code, 7);
        }

        #[tokio::test]
        async fn test_output_over_cap_is_truncated_but_completes() {
            let script = Script {
                events: vec![
                    (Duration::ZERO, ChannelEvent::Stdout(vec![b'x'; 10])),
                    (Duration::ZERO, ChannelEvent::Stdout(vec![b'y'; 10])),
                    (Duration::ZERO, ChannelEvent::ExitStatus(0)),
                    (Duration::ZERO, ChannelEvent::Closed),
                ],
                ..Script::exits("", 0)
            };
            let (manager, stats) = manager(script, 8);
            let result = run(&manager, Duration::from_secs(5), &CancellationToken::new())
                .await
                .expect("result");

            assert!(result.truncated);
            assert_eq!(result.stdout, "xxxxxxxx");
            assert_eq!(result.exit_code, 0);
            assert_eq!(stats.terminates(), 0);
        }
    }

    mod failures {
        use super::*;

        #[tokio::test]
        async fn test_timeout_terminates_and_closes() {
            let (manager, stats) = manager(Script::hangs("working...\n"), 1024);
            let err = run(&manager, Duration::from_millis(100), &CancellationToken::new())
                .await
                .expect_err("must time out");

            assert_eq!(err, SessionError::Timeout(Duration::from_millis(100)));
            assert_eq!(stats.terminates(), 1);
            assert_eq!(stats.closes(), 1);
        }

        #[tokio::test]
        async fn test_connect_error_passes_through() {
            let script = Script {
                connect_error: Some(SessionError::ConnectFailed("connection refused".into())),
                ..Script::exits("", 0)
            };
            let (manager, stats) = manager(script, 1024);
            let err = run(&manager, Duration::from_secs(5), &CancellationToken::new())
                .await
                .expect_err("must fail");

            assert!(matches!(err, SessionError::ConnectFailed(_)));
            assert_eq!(stats.connects(), 1);
            assert!(stats.commands().is_empty());
        }

        #[tokio::test]
        async fn test_slow_connect_is_bounded() {
            let script = Script {
                connect_delay: Duration::from_secs(30),
                ..Script::exits("", 0)
            };
            let (connector, stats) = FakeConnector::new(script);
            let manager = SshSessionManager::new(
                connector,
                SessionSettings {
                    connect_timeout: Duration::from_millis(50),
                    output_cap: 1024,
                },
            );

            let started = Instant::now();
            let err = run(&manager, Duration::from_secs(5), &CancellationToken::new())
                .await
                .expect_err("must fail");

            assert!(matches!(err, SessionError::ConnectFailed(ref m) if m.contains("timed out")));
            assert!(started.elapsed() < Duration::from_secs(5));
            assert!(stats.commands().is_empty());
        }

        #[tokio::test]
        async fn test_auth_failure_closes_without_exec() {
            let script = Script {
                auth_error: Some(SessionError::AuthFailed("permission denied".into())),
                ..Script::exits("", 0)
            };
            let (manager, stats) = manager(script, 1024);
            let err = run(&manager, Duration::from_secs(5), &CancellationToken::new())
                .await
                .expect_err("must fail");

            assert!(matches!(err, SessionError::AuthFailed(_)));
            assert!(stats.commands().is_empty());
            assert_eq!(stats.closes(), 1);
        }
    }

    mod cancellation {
        use super::*;

        #[tokio::test]
        async fn test_cancel_while_executing() {
            let (manager, stats) = manager(Script::hangs(""), 1024);
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                trigger.cancel();
            });

            let err = run(&manager, Duration::from_secs(30), &cancel)
                .await
                .expect_err("must be cancelled");

            assert_eq!(err, SessionError::Cancelled);
            assert_eq!(stats.terminates(), 1);
            assert_eq!(stats.closes(), 1);
        }

        #[tokio::test]
        async fn test_cancelled_before_start() {
            let (manager, stats) = manager(Script::exits("", 0), 1024);
            let cancel = CancellationToken::new();
            cancel.cancel();

            let err = run(&manager, Duration::from_secs(5), &cancel)
                .await
                .expect_err("must be cancelled");

            assert_eq!(err, SessionError::Cancelled);
            assert!(stats.commands().is_empty());
        }
    }
}
