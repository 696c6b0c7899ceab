use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{Connector, Transport, TransportError};

/// WebSocket connector (ws:// and wss://)
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError> {
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        tracing::debug!(status = %response.status(), "WebSocket handshake completed");

        Ok(Box::new(WsTransport { stream }))
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => {
                        tracing::warn!("Ignoring non UTF-8 binary frame");
                    }
                },
                Ok(Message::Close(frame)) => {
                    tracing::debug!(frame = ?frame, "Received close frame");
                    return None;
                }
                // Ping/Pong are answered by tungstenite itself
                Ok(_) => {}
                Err(tungstenite::Error::ConnectionClosed) => return None,
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.stream.close(None).await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed)
            | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Send(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio::time::timeout;
    use tokio_tungstenite::accept_async;

    use super::*;

    const WAIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_frames_round_trip_through_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (greeting_tx, greeting_rx) = oneshot::channel();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            let greeting = ws.next().await.unwrap().unwrap();
            let _ = greeting_tx.send(greeting.into_text().unwrap());

            ws.send(Message::Text("one".to_string())).await.unwrap();
            ws.send(Message::Binary(b"two".to_vec())).await.unwrap();
            ws.send(Message::Binary(vec![0xff, 0xfe])).await.unwrap();
            ws.send(Message::Text("three".to_string())).await.unwrap();
            ws.send(Message::Close(None)).await.unwrap();

            // Drain until the client answers the close
            while let Some(Ok(_)) = ws.next().await {}
        });

        let url = format!("ws://{}/ws", addr);
        let mut transport = WsConnector::new().connect(&url).await.unwrap();
        transport.send("hello".to_string()).await.unwrap();
        assert_eq!(timeout(WAIT, greeting_rx).await.unwrap().unwrap(), "hello");

        for expected in ["one", "two", "three"] {
            let frame = timeout(WAIT, transport.recv()).await.unwrap();
            assert_eq!(frame.unwrap().unwrap(), expected);
        }

        // Server close ends the stream; closing afterwards is still Ok
        assert!(timeout(WAIT, transport.recv()).await.unwrap().is_none());
        assert!(transport.close().await.is_ok());

        timeout(WAIT, server).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = WsConnector::new().connect(&format!("ws://{}/ws", addr)).await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }
}
