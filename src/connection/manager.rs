use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::events::{EventDispatcher, OutboundEnvelope};
use crate::metrics::{ConnectionMetrics, OutboundMetrics};
use crate::transport::{
    redact_url, ConnectionId, Connector, ReconnectPolicy, SocketHandle, TransportEvent,
};

use super::ConnectionState;

/// Sent right after the transport opens
pub const USER_ONLINE_EVENT: &str = "user_online";
/// Sent right before a deliberate disconnect
pub const USER_OFFLINE_EVENT: &str = "user_offline";

/// Settings for one connection manager
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Full channel URL, query parameters included
    pub url: String,
    /// Subject announced in the online/offline notifications
    pub subject_id: String,
    pub policy: ReconnectPolicy,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubjectPayload<'a> {
    user_id: &'a str,
}

/// Owns at most one live transport and tracks its lifecycle.
///
/// `connect()` and `disconnect()` return immediately; the effect is observed
/// through [`state`](Self::state) or [`subscribe_state`](Self::subscribe_state).
/// All transport callbacks are processed one at a time, in transport order, by
/// a single event task and pass through one liveness guard: callbacks from a
/// handle that is no longer the active one, or arriving after teardown, are
/// dropped.
pub struct ConnectionManager {
    options: ConnectionOptions,
    connector: Arc<dyn Connector>,
    dispatcher: Arc<EventDispatcher>,
    /// `options.url` with credentials masked
    log_url: String,
    socket: Mutex<Option<SocketHandle>>,
    state: watch::Sender<ConnectionState>,
    alive: AtomicBool,
    events_tx: mpsc::UnboundedSender<(ConnectionId, TransportEvent)>,
}

impl ConnectionManager {
    /// Create a manager and spawn its event task.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(
        options: ConnectionOptions,
        connector: Arc<dyn Connector>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        let manager = Arc::new(Self {
            log_url: redact_url(&options.url),
            options,
            connector,
            dispatcher,
            socket: Mutex::new(None),
            state,
            alive: AtomicBool::new(true),
            events_tx,
        });

        tokio::spawn(Self::run_events(Arc::downgrade(&manager), events_rx));
        manager
    }

    async fn run_events(
        manager: Weak<Self>,
        mut events: mpsc::UnboundedReceiver<(ConnectionId, TransportEvent)>,
    ) {
        while let Some((id, event)) = events.recv().await {
            let Some(manager) = manager.upgrade() else {
                break;
            };
            manager.handle_transport_event(id, event);
        }
        tracing::debug!("Connection event task stopped");
    }

    /// Open a new transport, replacing any existing one
    #[tracing::instrument(skip(self), fields(subject_id = %self.options.subject_id))]
    pub fn connect(&self) {
        if !self.is_alive() {
            tracing::warn!("connect() called after teardown, ignoring");
            return;
        }

        let mut slot = self.socket_slot();
        if let Some(previous) = slot.take() {
            tracing::debug!(connection_id = %previous.id(), "Closing previous transport");
            drop(previous.close());
        }

        self.set_state(ConnectionState::Connecting);
        let handle = SocketHandle::spawn(
            self.connector.clone(),
            self.options.url.clone(),
            self.options.policy.clone(),
            self.events_tx.clone(),
        );
        tracing::info!(connection_id = %handle.id(), url = %self.log_url, "Connecting");
        *slot = Some(handle);
    }

    /// Close the transport if present. Idempotent.
    #[tracing::instrument(skip(self), fields(subject_id = %self.options.subject_id))]
    pub fn disconnect(&self) {
        drop(self.release());
    }

    /// Disconnect and permanently stop reacting to transport callbacks
    pub fn teardown(&self) {
        self.disconnect();
        self.alive.store(false, Ordering::SeqCst);
        tracing::info!(subject_id = %self.options.subject_id, "Connection manager torn down");
    }

    /// Teardown that waits up to `timeout` for the transport to finish closing
    pub async fn shutdown(&self, timeout: Duration) {
        let task = self.release();
        self.alive.store(false, Ordering::SeqCst);

        if let Some(task) = task {
            match tokio::time::timeout(timeout, task).await {
                Ok(Ok(())) => tracing::debug!("Transport closed"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Socket driver task failed"),
                Err(_) => tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for transport to close"
                ),
            }
        }
        tracing::info!(subject_id = %self.options.subject_id, "Connection manager shut down");
    }

    /// Send an outbound event. Dropped with a warning unless connected.
    pub fn send<T: Serialize + ?Sized>(&self, event: &str, data: &T) -> bool {
        let slot = self.socket_slot();
        let state = self.state();

        let Some(handle) = slot.as_ref().filter(|_| state.is_connected()) else {
            OutboundMetrics::record_dropped();
            tracing::warn!(event = %event, state = %state, "Not connected, dropping outbound event");
            return false;
        };

        Self::send_on(handle, event, data)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Id of the live transport handle, if any
    pub fn active_connection(&self) -> Option<ConnectionId> {
        self.socket_slot().as_ref().map(SocketHandle::id)
    }

    pub fn subject_id(&self) -> &str {
        &self.options.subject_id
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Single entry point for transport callbacks
    pub fn handle_transport_event(&self, id: ConnectionId, event: TransportEvent) {
        let mut slot = self.socket_slot();

        let is_active = slot.as_ref().is_some_and(|handle| handle.id() == id);
        if !self.is_alive() || !is_active {
            tracing::trace!(connection_id = %id, event = ?event, "Ignoring stale transport callback");
            return;
        }

        match event {
            TransportEvent::Opened => {
                self.set_state(ConnectionState::Connected);
                if let Some(handle) = slot.as_ref() {
                    let payload = SubjectPayload {
                        user_id: &self.options.subject_id,
                    };
                    Self::send_on(handle, USER_ONLINE_EVENT, &payload);
                }
            }
            TransportEvent::OpenFailed { error, attempt } => {
                tracing::warn!(connection_id = %id, error = %error, attempt = attempt, "Transport open failed");
                self.set_state(ConnectionState::Reconnecting);
            }
            TransportEvent::Closed { reason, retrying } => {
                tracing::info!(
                    connection_id = %id,
                    reason = reason.as_deref().unwrap_or("unknown"),
                    retrying = retrying,
                    "Transport closed"
                );
                self.set_state(ConnectionState::Disconnected);
                if !retrying {
                    slot.take();
                }
            }
            TransportEvent::Message(text) => {
                // Handlers may call back into the manager
                drop(slot);
                self.dispatcher.dispatch_text(&text);
            }
        }
    }

    /// Take the active handle, announce going offline and ask it to close
    fn release(&self) -> Option<JoinHandle<()>> {
        let mut slot = self.socket_slot();
        let handle = slot.take()?;

        if self.state().is_connected() {
            let payload = SubjectPayload {
                user_id: &self.options.subject_id,
            };
            Self::send_on(&handle, USER_OFFLINE_EVENT, &payload);
        }

        let connection_id = handle.id();
        let task = handle.close();
        self.set_state(ConnectionState::Disconnected);
        tracing::info!(connection_id = %connection_id, "Disconnected");
        Some(task)
    }

    fn send_on<T: Serialize + ?Sized>(handle: &SocketHandle, event: &str, data: &T) -> bool {
        let frame = match OutboundEnvelope::new(event, data).to_json() {
            Ok(frame) => frame,
            Err(e) => {
                OutboundMetrics::record_dropped();
                tracing::warn!(event = %event, error = %e, "Failed to serialize outbound event");
                return false;
            }
        };

        if handle.send(frame) {
            OutboundMetrics::record_sent(event);
            true
        } else {
            OutboundMetrics::record_dropped();
            tracing::warn!(event = %event, "Transport driver gone, dropping outbound event");
            false
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let mut previous = next;
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            previous = *current;
            *current = next;
            true
        });

        if changed {
            ConnectionMetrics::set_state(next.as_gauge());
            tracing::info!(from = %previous, to = %next, "Connection state changed");
        }
    }

    fn socket_slot(&self) -> MutexGuard<'_, Option<SocketHandle>> {
        self.socket.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Envelope, EventType};
    use crate::transport::{memory_transport, BackoffConfig, MemoryServer};
    use serde_json::json;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn policy(max_attempts: u32, delay_ms: u64) -> ReconnectPolicy {
        ReconnectPolicy {
            enabled: true,
            max_attempts,
            backoff: BackoffConfig {
                initial_delay_ms: delay_ms,
                max_delay_ms: delay_ms,
                multiplier: 1.0,
                jitter_factor: 0.0,
            },
        }
    }

    fn manager_with(policy: ReconnectPolicy) -> (Arc<ConnectionManager>, MemoryServer, Arc<EventDispatcher>) {
        let (connector, server) = memory_transport();
        let dispatcher = Arc::new(EventDispatcher::new());
        let manager = ConnectionManager::new(
            ConnectionOptions {
                url: "mem://presence".to_string(),
                subject_id: "me".to_string(),
                policy,
            },
            Arc::new(connector),
            dispatcher.clone(),
        );
        (manager, server, dispatcher)
    }

    async fn wait_for_state(manager: &ConnectionManager, state: ConnectionState) {
        let mut rx = manager.subscribe_state();
        timeout(WAIT, rx.wait_for(|s| *s == state))
            .await
            .expect("timed out waiting for state")
            .expect("state channel closed");
    }

    #[tokio::test]
    async fn test_connect_announces_online() {
        let (manager, mut server, _) = manager_with(ReconnectPolicy::disabled());

        manager.connect();
        let mut peer = timeout(WAIT, server.accept()).await.unwrap().unwrap();
        wait_for_state(&manager, ConnectionState::Connected).await;

        let online = timeout(WAIT, peer.recv_json()).await.unwrap().unwrap();
        assert_eq!(online["type"], USER_ONLINE_EVENT);
        assert_eq!(online["payload"], json!({"userId": "me"}));
        assert!(online["timestamp"].is_i64());
    }

    #[tokio::test]
    async fn test_failed_open_moves_to_reconnecting() {
        let (manager, server, _) = manager_with(policy(5, 60_000));
        server.refuse_connections(true);
        let mut states = manager.subscribe_state();
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        manager.connect();
        assert_eq!(manager.state(), ConnectionState::Connecting);

        timeout(WAIT, states.wait_for(|s| *s == ConnectionState::Reconnecting))
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.state(), ConnectionState::Reconnecting);
        assert_eq!(server.connection_attempts(), 1);
        manager.teardown();
    }

    #[tokio::test]
    async fn test_exhausted_retries_release_the_handle() {
        let (manager, server, _) = manager_with(policy(2, 1));
        server.refuse_connections(true);

        manager.connect();
        wait_for_state(&manager, ConnectionState::Disconnected).await;

        assert_eq!(manager.active_connection(), None);
        assert_eq!(server.connection_attempts(), 3);
    }

    #[tokio::test]
    async fn test_disconnect_twice_is_noop() {
        let (manager, mut server, _) = manager_with(ReconnectPolicy::disabled());

        manager.connect();
        let mut peer = timeout(WAIT, server.accept()).await.unwrap().unwrap();
        wait_for_state(&manager, ConnectionState::Connected).await;

        manager.disconnect();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        manager.disconnect();
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        let online = timeout(WAIT, peer.recv_json()).await.unwrap().unwrap();
        assert_eq!(online["type"], USER_ONLINE_EVENT);
        let offline = timeout(WAIT, peer.recv_json()).await.unwrap().unwrap();
        assert_eq!(offline["type"], USER_OFFLINE_EVENT);
        assert_eq!(offline["payload"]["userId"], "me");
        assert_eq!(timeout(WAIT, peer.recv_text()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_dropped() {
        let (manager, server, _) = manager_with(ReconnectPolicy::disabled());

        assert!(!manager.send("ping", &json!({})));
        assert_eq!(server.connection_attempts(), 0);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_forwards_payload_when_connected() {
        let (manager, mut server, _) = manager_with(ReconnectPolicy::disabled());

        manager.connect();
        let mut peer = timeout(WAIT, server.accept()).await.unwrap().unwrap();
        wait_for_state(&manager, ConnectionState::Connected).await;
        let _online = peer.recv_json().await;

        assert!(manager.send("ping", &json!({"n": 1})));
        let frame = timeout(WAIT, peer.recv_json()).await.unwrap().unwrap();
        assert_eq!(frame["type"], "ping");
        assert_eq!(frame["payload"], json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_callbacks_after_teardown_are_ignored() {
        let (manager, mut server, _) = manager_with(ReconnectPolicy::disabled());

        manager.connect();
        let _peer = timeout(WAIT, server.accept()).await.unwrap().unwrap();
        wait_for_state(&manager, ConnectionState::Connected).await;
        let id = manager.active_connection().unwrap();

        manager.teardown();
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        manager.handle_transport_event(id, TransportEvent::Opened);
        manager.handle_transport_event(
            id,
            TransportEvent::OpenFailed {
                error: crate::transport::TransportError::Refused,
                attempt: 0,
            },
        );
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        manager.connect();
        assert_eq!(manager.active_connection(), None);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_callbacks_from_unknown_handle_are_ignored() {
        let (manager, _server, _) = manager_with(ReconnectPolicy::disabled());

        manager.handle_transport_event(ConnectionId::new(), TransportEvent::Opened);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_second_connect_replaces_first_transport() {
        let (manager, mut server, _) = manager_with(ReconnectPolicy::disabled());

        manager.connect();
        let mut first = timeout(WAIT, server.accept()).await.unwrap().unwrap();
        wait_for_state(&manager, ConnectionState::Connected).await;
        let first_id = manager.active_connection().unwrap();

        manager.connect();
        let second_id = manager.active_connection().unwrap();
        assert_ne!(first_id, second_id);

        let _second = timeout(WAIT, server.accept()).await.unwrap().unwrap();
        wait_for_state(&manager, ConnectionState::Connected).await;

        // First peer saw its online notice, then the close
        let online = timeout(WAIT, first.recv_json()).await.unwrap().unwrap();
        assert_eq!(online["type"], USER_ONLINE_EVENT);
        assert_eq!(timeout(WAIT, first.recv_text()).await.unwrap(), None);

        // A late close from the replaced handle does not touch the state
        manager.handle_transport_event(
            first_id,
            TransportEvent::Closed {
                reason: None,
                retrying: false,
            },
        );
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.active_connection(), Some(second_id));
    }

    #[tokio::test]
    async fn test_inbound_frames_reach_dispatcher() {
        let (manager, mut server, dispatcher) = manager_with(ReconnectPolicy::disabled());
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        dispatcher.register(EventType::StatusChange, move |envelope: &Envelope| {
            let _ = seen_tx.send(envelope.clone());
            Ok(())
        });

        manager.connect();
        let peer = timeout(WAIT, server.accept()).await.unwrap().unwrap();
        wait_for_state(&manager, ConnectionState::Connected).await;

        peer.send_text("garbage");
        peer.send_json(&json!({
            "type": "USER_STATUS_CHANGE",
            "payload": {"userId": "u1", "status": "away"}
        }));

        let envelope = timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap();
        assert_eq!(envelope.payload["userId"], "u1");
        assert_eq!(dispatcher.stats().malformed, 1);
    }

    #[tokio::test]
    async fn test_server_close_without_retry_disconnects() {
        let (manager, mut server, _) = manager_with(ReconnectPolicy::disabled());

        manager.connect();
        let peer = timeout(WAIT, server.accept()).await.unwrap().unwrap();
        wait_for_state(&manager, ConnectionState::Connected).await;

        peer.close();
        wait_for_state(&manager, ConnectionState::Disconnected).await;
        assert_eq!(manager.active_connection(), None);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_transport() {
        let (manager, mut server, _) = manager_with(ReconnectPolicy::disabled());

        manager.connect();
        let mut peer = timeout(WAIT, server.accept()).await.unwrap().unwrap();
        wait_for_state(&manager, ConnectionState::Connected).await;

        manager.shutdown(WAIT).await;
        assert!(!manager.is_alive());

        let _online = peer.recv_json().await;
        let offline = peer.recv_json().await.unwrap();
        assert_eq!(offline["type"], USER_OFFLINE_EVENT);
    }
}
