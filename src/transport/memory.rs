//! In-process loopback transport.
//!
//! `memory_transport()` returns a connector and the server half that accepts
//! its connections. Each accepted `MemoryPeer` sees what the client sends and
//! can push frames back or drop the connection. Nothing touches the network,
//! so the connection manager can be exercised end to end in tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Connector, Transport, TransportError};

struct MemoryHub {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    refuse: AtomicBool,
    attempts: AtomicUsize,
}

/// Client half: opens loopback transports
#[derive(Clone)]
pub struct MemoryConnector {
    hub: Arc<MemoryHub>,
}

/// Server half: accepts loopback transports
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
    hub: Arc<MemoryHub>,
}

/// Server-side end of one accepted loopback connection
pub struct MemoryPeer {
    url: String,
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<String>,
}

struct MemoryTransport {
    to_server: Option<mpsc::UnboundedSender<String>>,
    from_server: mpsc::UnboundedReceiver<String>,
}

/// Create a connected connector/server pair
pub fn memory_transport() -> (MemoryConnector, MemoryServer) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    let hub = Arc::new(MemoryHub {
        accept_tx,
        refuse: AtomicBool::new(false),
        attempts: AtomicUsize::new(0),
    });

    (
        MemoryConnector { hub: hub.clone() },
        MemoryServer { accept_rx, hub },
    )
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError> {
        self.hub.attempts.fetch_add(1, Ordering::SeqCst);

        if self.hub.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Refused);
        }

        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            url: url.to_string(),
            from_client,
            to_client,
        };
        self.hub
            .accept_tx
            .send(peer)
            .map_err(|_| TransportError::Refused)?;

        Ok(Box::new(MemoryTransport {
            to_server: Some(to_server),
            from_server,
        }))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let sender = self.to_server.as_ref().ok_or(TransportError::Closed)?;
        sender.send(text).map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.from_server.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.to_server = None;
        self.from_server.close();
        Ok(())
    }
}

impl MemoryServer {
    /// Wait for the next client connection
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// Make subsequent open attempts fail with `TransportError::Refused`
    pub fn refuse_connections(&self, refuse: bool) {
        self.hub.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Open attempts seen so far, refused ones included
    pub fn connection_attempts(&self) -> usize {
        self.hub.attempts.load(Ordering::SeqCst)
    }
}

impl MemoryPeer {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Next frame sent by the client. `None` once the client closed.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Next frame sent by the client, parsed as JSON
    pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
        let text = self.recv_text().await?;
        serde_json::from_str(&text).ok()
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client.send(text.into()).is_ok()
    }

    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        self.send_text(value.to_string())
    }

    /// Drop the connection from the server side
    pub fn close(self) {}
}
