//! Bidirectional real-time channel.
//!
//! This module provides:
//! - `Connector` / `Transport` traits the connection manager talks to
//! - `WsConnector`, the WebSocket implementation
//! - `MemoryConnector`, an in-process loopback used by tests and demos
//! - `SocketHandle`, the driver task that owns one transport and its
//!   reconnection policy

mod backoff;
mod memory;
mod socket;
mod websocket;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use memory::{memory_transport, MemoryConnector, MemoryPeer, MemoryServer};
pub use socket::{ReconnectPolicy, SocketHandle};
pub use websocket::WsConnector;

/// Identifies one transport handle spawned by a connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("connection refused")]
    Refused,
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("transport closed")]
    Closed,
}

/// Lifecycle callbacks a socket driver reports to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The transport is open and ready to carry messages
    Opened,
    /// An open attempt failed; `attempt` is the number of retries already made
    OpenFailed { error: TransportError, attempt: u32 },
    /// A text frame arrived
    Message(String),
    /// The transport closed. When `retrying` is false the driver has exited.
    Closed {
        reason: Option<String>,
        retrying: bool,
    },
}

/// Query parameters whose values never reach the logs
const SENSITIVE_PARAMS: [&str; 3] = ["token", "access_token", "auth"];
const REDACTED: &str = "***";

/// Channel URL safe for logging: credential query values are masked
pub fn redact_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return "<invalid url>".to_string();
    };

    if url.query().is_some() {
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(key, value)| {
                let value = if SENSITIVE_PARAMS.iter().any(|p| key.eq_ignore_ascii_case(p)) {
                    REDACTED.to_string()
                } else {
                    value.into_owned()
                };
                (key.into_owned(), value)
            })
            .collect();
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    url.into()
}

/// An open, bidirectional text channel.
///
/// `recv` must be cancel-safe: the driver selects over it together with its
/// command queue.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Next inbound text frame. `None` means the peer closed the channel.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens transports to a URL
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError>;
}
