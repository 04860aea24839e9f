//! Scripted connector and transport for exercising the session manager and
//! the orchestrator without a network.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::gateway::error::SessionError;
use crate::gateway::session::SessionTarget;
use crate::gateway::session::transport::{ChannelEvent, Connector, Transport};
use crate::gateway::vault::Credential;

/// How a fake host behaves.
#[derive(Debug, Clone)]
pub(crate) struct Script {
    pub connect_delay: Duration,
    pub connect_error: Option<SessionError>,
    pub auth_error: Option<SessionError>,
    /// Delivered in order, each after its delay.
    pub events: Vec<(Duration, ChannelEvent)>,
    /// After the events run out, never send anything else.
    pub hang: bool,
}

impl Script {
    /// A command that prints `stdout` and exits with `code`.
    pub fn exits(stdout: &str, code: u32) -> Self {
        Self {
            connect_delay: Duration::ZERO,
            connect_error: None,
            auth_error: None,
            events: vec![
                (Duration::ZERO, ChannelEvent::Stdout(stdout.as_bytes().to_vec())),
                (Duration::ZERO, ChannelEvent::ExitStatus(code)),
                (Duration::ZERO, ChannelEvent::Eof),
                (Duration::ZERO, ChannelEvent::Closed),
            ],
            hang: false,
        }
    }

    /// A command that prints `stdout` and then never finishes.
    pub fn hangs(stdout: &str) -> Self {
        Self {
            events: vec![(Duration::ZERO, ChannelEvent::Stdout(stdout.as_bytes().to_vec()))],
            hang: true,
            ..Self::exits("", 0)
        }
    }

    /// Delay every execution by `delay` before the first output.
    pub fn delayed(mut self, delay: Duration) -> Self {
        if let Some(first) = self.events.first_mut() {
            first.0 = delay;
        }
        self
    }
}

/// What the fakes observed.
#[derive(Debug, Default)]
pub(crate) struct FakeStats {
    pub connects: AtomicUsize,
    pub authentications: AtomicUsize,
    pub terminates: AtomicUsize,
    pub closes: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub commands: StdMutex<Vec<String>>,
    pub credentials: StdMutex<Vec<String>>,
}

impl FakeStats {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn terminates(&self) -> usize {
        self.terminates.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn credentials(&self) -> Vec<String> {
        self.credentials.lock().unwrap().clone()
    }
}

pub(crate) struct FakeConnector {
    script: Script,
    stats: Arc<FakeStats>,
}

impl FakeConnector {
    pub fn new(script: Script) -> (Self, Arc<FakeStats>) {
        let stats = Arc::new(FakeStats::default());
        (
            Self {
                script,
                stats: Arc::clone(&stats),
            },
            stats,
        )
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _target: &SessionTarget) -> Result<Box<dyn Transport>, SessionError> {
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.script.connect_delay).await;
        if let Some(err) = &self.script.connect_error {
            return Err(err.clone());
        }

        let now = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_active.fetch_max(now, Ordering::SeqCst);

        Ok(Box::new(FakeTransport {
            script: self.script.clone(),
            events: self.script.events.clone().into(),
            stats: Arc::clone(&self.stats),
            closed: false,
        }))
    }
}

struct FakeTransport {
    script: Script,
    events: VecDeque<(Duration, ChannelEvent)>,
    stats: Arc<FakeStats>,
    closed: bool,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn authenticate(
        &mut self,
        _username: &str,
        credential: Credential,
    ) -> Result<(), SessionError> {
        self.stats.authentications.fetch_add(1, Ordering::SeqCst);
        let seen = match &credential {
            Credential::Password(password) => password.to_string(),
            Credential::PrivateKey { pem, .. } => pem.to_string(),
        };
        self.stats.credentials.lock().unwrap().push(seen);
        match &self.script.auth_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn exec(&mut self, command: &str) -> Result<(), SessionError> {
        self.stats.commands.lock().unwrap().push(command.to_string());
        Ok(())
    }

    async fn next_event(&mut self) -> ChannelEvent {
        match self.events.pop_front() {
            Some((delay, event)) => {
                tokio::time::sleep(delay).await;
                event
            }
            None if self.script.hang => std::future::pending().await,
            None => ChannelEvent::Closed,
        }
    }

    async fn terminate(&mut self) {
        self.stats.terminates.fetch_add(1, Ordering::SeqCst);
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.stats.closes.fetch_add(1, Ordering::SeqCst);
            self.stats.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
