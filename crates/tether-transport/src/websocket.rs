//! WebSocket transport implementation.
//!
//! This module provides a WebSocket client connector using tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, warn};

use crate::traits::{CloseReason, Connection, ConnectionId, Connector, Incoming, TransportError};

/// WebSocket connector configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: 1024 * 1024, // 1 MiB
        }
    }
}

/// Opens WebSocket connections (`ws://` and, with the `tls` feature, `wss://`).
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    config: WebSocketConfig,
}

impl WebSocketConnector {
    /// Create a connector with custom config.
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, address: &str) -> Result<Box<dyn Connection>, TransportError> {
        let (stream, response) = connect_async(address).await.map_err(|e| {
            error!(address = %address, error = %e, "WebSocket handshake failed");
            TransportError::ConnectFailed(e.to_string())
        })?;

        debug!(address = %address, status = %response.status(), "WebSocket handshake completed");

        Ok(Box::new(WebSocketConnection::new(
            stream,
            address,
            self.config.max_message_size,
        )))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// A client WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    address: String,
    is_open: bool,
    max_message_size: usize,
}

impl WebSocketConnection {
    fn new(
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        address: &str,
        max_message_size: usize,
    ) -> Self {
        Self {
            id: ConnectionId::generate(),
            stream,
            address: address.to_string(),
            is_open: true,
            max_message_size,
        }
    }

    fn check_size(&self, len: usize) -> Result<(), TransportError> {
        if len > self.max_message_size {
            warn!(
                "Message too large: {} bytes (max: {})",
                len, self.max_message_size
            );
            return Err(TransportError::ReceiveFailed(format!(
                "message of {} bytes exceeds maximum {}",
                len, self.max_message_size
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Incoming, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.check_size(text.len())?;
                    return Ok(Incoming::Text(text));
                }
                Some(Ok(Message::Binary(data))) => {
                    self.check_size(data.len())?;
                    match String::from_utf8(data) {
                        Ok(text) => return Ok(Incoming::Text(text)),
                        Err(e) => warn!(connection = %self.id, error = %e, "Dropping non-UTF-8 binary frame"),
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    // Respond to ping with pong
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        warn!("Failed to send pong: {}", e);
                    }
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!(connection = %self.id, "Received close frame");
                    self.is_open = false;
                    let reason = match frame {
                        Some(frame) => {
                            CloseReason::remote(Some(u16::from(frame.code)), frame.reason.to_string())
                        }
                        None => CloseReason::remote(None, "close frame without status"),
                    };
                    return Ok(Incoming::Closed(reason));
                }
                Some(Err(WsError::ConnectionClosed)) | None => {
                    debug!(connection = %self.id, "WebSocket stream ended");
                    self.is_open = false;
                    return Ok(Incoming::Closed(CloseReason::remote(None, "stream ended")));
                }
                Some(Err(e)) => {
                    error!(connection = %self.id, error = %e, "WebSocket error");
                    self.is_open = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.is_open {
            return Ok(()); // Already closed
        }
        self.is_open = false;

        self.stream
            .close(None)
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {}", e)))
    }

    fn remote_addr(&self) -> Option<String> {
        Some(self.address.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[test]
    fn test_websocket_config_default() {
        let config = WebSocketConfig::default();
        assert_eq!(config.max_message_size, 1024 * 1024);
    }

    #[tokio::test]
    async fn test_connect_and_exchange_text() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let frame = ws.next().await.unwrap().unwrap();
            ws.send(frame).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let connector = WebSocketConnector::default();
        let mut connection = connector
            .connect(&format!("ws://{}", addr))
            .await
            .unwrap();

        connection.send("{}".into()).await.unwrap();
        assert_eq!(connection.recv().await.unwrap(), Incoming::Text("{}".into()));
        assert!(matches!(
            connection.recv().await.unwrap(),
            Incoming::Closed(_)
        ));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = WebSocketConnector::default();
        assert!(matches!(
            connector.connect(&format!("ws://{}", addr)).await,
            Err(TransportError::ConnectFailed(_))
        ));
    }
}
