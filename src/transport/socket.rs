//! Socket driver: one background task per transport handle.
//!
//! The driver opens the transport, pumps frames in both directions and owns the
//! reconnection policy. Every lifecycle change is reported to the owner as a
//! `(ConnectionId, TransportEvent)` pair on a single ordered channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::RealtimeConfig;
use crate::metrics::ConnectionMetrics;

use super::{redact_url, BackoffConfig, ConnectionId, Connector, ExponentialBackoff, Transport, TransportError, TransportEvent};

pub(crate) type EventSender = mpsc::UnboundedSender<(ConnectionId, TransportEvent)>;

/// Reconnection behaviour of a socket driver
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    /// Maximum consecutive retries after a failed or lost connection
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
}

impl ReconnectPolicy {
    /// A policy that never retries
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_attempts: 0,
            backoff: BackoffConfig::default(),
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&RealtimeConfig::default())
    }
}

impl From<&RealtimeConfig> for ReconnectPolicy {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            enabled: config.reconnection,
            max_attempts: config.reconnection_attempts,
            backoff: BackoffConfig {
                initial_delay_ms: config.initial_delay().as_millis() as u64,
                max_delay_ms: config.max_delay().as_millis() as u64,
                multiplier: 2.0,
                jitter_factor: config.randomization_factor,
            },
        }
    }
}

#[derive(Debug)]
enum SocketCommand {
    Send(String),
    Close,
}

/// Owner's side of a running socket driver
#[derive(Debug)]
pub struct SocketHandle {
    id: ConnectionId,
    commands: mpsc::UnboundedSender<SocketCommand>,
    task: JoinHandle<()>,
}

impl SocketHandle {
    /// Spawn a driver for `url` on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn(
        connector: Arc<dyn Connector>,
        url: String,
        policy: ReconnectPolicy,
        events: mpsc::UnboundedSender<(ConnectionId, TransportEvent)>,
    ) -> Self {
        let id = ConnectionId::new();
        let (commands, commands_rx) = mpsc::unbounded_channel();

        let driver = SocketDriver {
            id,
            connector,
            url,
            backoff: ExponentialBackoff::with_config(policy.backoff.clone()),
            policy,
            attempts: 0,
            commands: commands_rx,
            events,
        };
        let task = tokio::spawn(driver.run());

        Self { id, commands, task }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a text frame. Returns false if the driver has already exited.
    pub fn send(&self, text: String) -> bool {
        self.commands.send(SocketCommand::Send(text)).is_ok()
    }

    /// Ask the driver to close the transport after flushing queued frames.
    pub fn close(self) -> JoinHandle<()> {
        let _ = self.commands.send(SocketCommand::Close);
        self.task
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

enum PumpOutcome {
    Cancelled,
    Lost(String),
}

enum RetryDecision {
    Retry,
    Exhausted,
    Cancelled,
}

struct SocketDriver {
    id: ConnectionId,
    connector: Arc<dyn Connector>,
    url: String,
    policy: ReconnectPolicy,
    backoff: ExponentialBackoff,
    attempts: u32,
    commands: mpsc::UnboundedReceiver<SocketCommand>,
    events: EventSender,
}

impl SocketDriver {
    async fn run(mut self) {
        tracing::debug!(connection_id = %self.id, url = %redact_url(&self.url), "Socket driver started");

        loop {
            let transport = match self.open().await {
                None => {
                    self.finish("closed by client");
                    break;
                }
                Some(Ok(transport)) => transport,
                Some(Err(error)) => {
                    ConnectionMetrics::record_open_failure();
                    tracing::debug!(
                        connection_id = %self.id,
                        error = %error,
                        attempt = self.attempts,
                        "Transport open failed"
                    );
                    self.emit(TransportEvent::OpenFailed {
                        error,
                        attempt: self.attempts,
                    });

                    match self.wait_before_retry().await {
                        RetryDecision::Retry => continue,
                        RetryDecision::Exhausted => {
                            self.finish(self.exhausted_reason());
                            break;
                        }
                        RetryDecision::Cancelled => {
                            self.finish("closed by client");
                            break;
                        }
                    }
                }
            };

            self.backoff.reset();
            self.attempts = 0;
            ConnectionMetrics::record_open();
            self.emit(TransportEvent::Opened);

            match self.pump(transport).await {
                PumpOutcome::Cancelled => {
                    self.finish("closed by client");
                    break;
                }
                PumpOutcome::Lost(reason) => {
                    let retrying = self.policy.enabled && self.policy.max_attempts > 0;
                    tracing::info!(
                        connection_id = %self.id,
                        reason = %reason,
                        retrying = retrying,
                        "Transport connection lost"
                    );
                    self.emit(TransportEvent::Closed {
                        reason: Some(reason),
                        retrying,
                    });
                    if !retrying {
                        break;
                    }

                    match self.wait_before_retry().await {
                        RetryDecision::Retry => continue,
                        RetryDecision::Exhausted => {
                            self.finish(self.exhausted_reason());
                            break;
                        }
                        RetryDecision::Cancelled => break,
                    }
                }
            }
        }

        tracing::debug!(connection_id = %self.id, "Socket driver stopped");
    }

    /// Attempt one open. `None` means the owner asked to close meanwhile.
    async fn open(&mut self) -> Option<Result<Box<dyn Transport>, TransportError>> {
        let connect = self.connector.connect(&self.url);
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => return Some(result),
                cmd = self.commands.recv() => match cmd {
                    Some(SocketCommand::Send(_)) => {
                        tracing::debug!(connection_id = %self.id, "Dropping outbound frame while connecting");
                    }
                    Some(SocketCommand::Close) | None => return None,
                },
            }
        }
    }

    async fn pump(&mut self, mut transport: Box<dyn Transport>) -> PumpOutcome {
        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(SocketCommand::Send(text)) => {
                        if let Err(e) = transport.send(text).await {
                            tracing::warn!(connection_id = %self.id, error = %e, "Transport send failed");
                            let _ = transport.close().await;
                            return PumpOutcome::Lost(e.to_string());
                        }
                    }
                    Some(SocketCommand::Close) | None => {
                        if let Err(e) = transport.close().await {
                            tracing::debug!(connection_id = %self.id, error = %e, "Transport close failed");
                        }
                        return PumpOutcome::Cancelled;
                    }
                },
                incoming = transport.recv() => match incoming {
                    Some(Ok(text)) => self.emit(TransportEvent::Message(text)),
                    Some(Err(e)) => {
                        let _ = transport.close().await;
                        return PumpOutcome::Lost(e.to_string());
                    }
                    None => return PumpOutcome::Lost("closed by server".to_string()),
                },
            }
        }
    }

    async fn wait_before_retry(&mut self) -> RetryDecision {
        if !self.policy.enabled || self.attempts >= self.policy.max_attempts {
            return RetryDecision::Exhausted;
        }

        self.attempts += 1;
        let delay: Duration = self.backoff.next_delay();
        ConnectionMetrics::record_reconnect_attempt();
        tracing::debug!(
            connection_id = %self.id,
            attempt = self.attempts,
            max_attempts = self.policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnection attempt"
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return RetryDecision::Retry,
                cmd = self.commands.recv() => match cmd {
                    Some(SocketCommand::Send(_)) => {
                        tracing::debug!(connection_id = %self.id, "Dropping outbound frame while reconnecting");
                    }
                    Some(SocketCommand::Close) | None => return RetryDecision::Cancelled,
                },
            }
        }
    }

    fn exhausted_reason(&self) -> &'static str {
        if self.policy.enabled {
            "reconnection attempts exhausted"
        } else {
            "reconnection disabled"
        }
    }

    fn finish(&self, reason: &str) {
        self.emit(TransportEvent::Closed {
            reason: Some(reason.to_string()),
            retrying: false,
        });
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send((self.id, event)).is_err() {
            tracing::debug!(connection_id = %self.id, "Event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory_transport;

    fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            enabled: true,
            max_attempts,
            backoff: BackoffConfig {
                initial_delay_ms: 1,
                max_delay_ms: 2,
                multiplier: 2.0,
                jitter_factor: 0.0,
            },
        }
    }

    #[tokio::test]
    async fn test_driver_reports_open_and_messages() {
        let (connector, mut server) = memory_transport();
        let (events_tx, mut events) = mpsc::unbounded_channel();

        let handle = SocketHandle::spawn(Arc::new(connector), "mem://a".into(), fast_policy(0), events_tx);
        let peer = server.accept().await.unwrap();

        assert_eq!(events.recv().await.unwrap(), (handle.id(), TransportEvent::Opened));

        assert!(peer.send_text("hello"));
        assert_eq!(
            events.recv().await.unwrap(),
            (handle.id(), TransportEvent::Message("hello".into()))
        );
    }

    #[tokio::test]
    async fn test_driver_flushes_before_close() {
        let (connector, mut server) = memory_transport();
        let (events_tx, mut events) = mpsc::unbounded_channel();

        let handle = SocketHandle::spawn(Arc::new(connector), "mem://a".into(), fast_policy(0), events_tx);
        let mut peer = server.accept().await.unwrap();
        assert_eq!(events.recv().await.unwrap().1, TransportEvent::Opened);

        assert!(handle.send("bye".into()));
        handle.close().await.unwrap();

        assert_eq!(peer.recv_text().await.as_deref(), Some("bye"));
        assert_eq!(peer.recv_text().await, None);
    }

    #[tokio::test]
    async fn test_driver_gives_up_after_max_attempts() {
        let (connector, server) = memory_transport();
        server.refuse_connections(true);
        let (events_tx, mut events) = mpsc::unbounded_channel();

        let handle = SocketHandle::spawn(Arc::new(connector), "mem://a".into(), fast_policy(2), events_tx);

        let mut failures = 0;
        loop {
            match events.recv().await.unwrap().1 {
                TransportEvent::OpenFailed { .. } => failures += 1,
                TransportEvent::Closed { retrying, reason } => {
                    assert!(!retrying);
                    assert_eq!(reason.as_deref(), Some("reconnection attempts exhausted"));
                    break;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }

        // initial attempt plus two retries
        assert_eq!(failures, 3);
        assert_eq!(server.connection_attempts(), 3);
        handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_driver_reconnects_after_server_close() {
        let (connector, mut server) = memory_transport();
        let (events_tx, mut events) = mpsc::unbounded_channel();

        let _handle = SocketHandle::spawn(Arc::new(connector), "mem://a".into(), fast_policy(3), events_tx);

        let peer = server.accept().await.unwrap();
        assert_eq!(events.recv().await.unwrap().1, TransportEvent::Opened);
        peer.close();

        assert_eq!(
            events.recv().await.unwrap().1,
            TransportEvent::Closed {
                reason: Some("closed by server".into()),
                retrying: true
            }
        );

        let _peer = server.accept().await.unwrap();
        assert_eq!(events.recv().await.unwrap().1, TransportEvent::Opened);
    }
}
