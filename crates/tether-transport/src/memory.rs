//! In-memory transport.
//!
//! [`memory_transport`] returns a connector and the server side that accepts
//! its connections. The server side decides when (and whether) a handshake
//! completes, which makes it suitable for scripting a remote endpoint in
//! tests and for embedding a client next to an in-process server.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::traits::{CloseReason, Connection, ConnectionId, Connector, Incoming, TransportError};

/// Create a connected connector / server pair.
#[must_use]
pub fn memory_transport() -> (MemoryConnector, MemoryServer) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    (
        MemoryConnector { accept: accept_tx },
        MemoryServer { accept: accept_rx },
    )
}

/// Client side: opens connections to the paired [`MemoryServer`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    accept: mpsc::UnboundedSender<Handshake>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, address: &str) -> Result<Box<dyn Connection>, TransportError> {
        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let handshake = Handshake {
            address: address.to_string(),
            peer: MemoryPeer {
                outbound: to_client,
                inbound: from_client,
            },
            ready: ready_tx,
        };

        self.accept
            .send(handshake)
            .map_err(|_| TransportError::ConnectFailed("memory server is gone".into()))?;

        match ready_rx.await {
            Ok(()) => Ok(Box::new(MemoryConnection {
                id: ConnectionId::generate(),
                address: address.to_string(),
                outbound: Some(to_server),
                inbound: from_server,
            })),
            Err(_) => Err(TransportError::ConnectFailed(format!(
                "connection to {} refused",
                address
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Server side: receives connection attempts.
#[derive(Debug)]
pub struct MemoryServer {
    accept: mpsc::UnboundedReceiver<Handshake>,
}

impl MemoryServer {
    /// Wait for the next connection attempt.
    pub async fn accept(&mut self) -> Option<Handshake> {
        self.accept.recv().await
    }

    /// Wait for the next connection attempt and complete its handshake.
    pub async fn accept_peer(&mut self) -> Option<MemoryPeer> {
        self.accept().await.map(Handshake::complete)
    }

    /// A pending connection attempt, if one is queued.
    pub fn try_accept(&mut self) -> Option<Handshake> {
        self.accept.try_recv().ok()
    }
}

/// A connection attempt that has not completed yet.
#[derive(Debug)]
pub struct Handshake {
    address: String,
    peer: MemoryPeer,
    ready: oneshot::Sender<()>,
}

impl Handshake {
    /// Address the client connected to.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Complete the handshake; the client's `connect` returns successfully.
    #[must_use]
    pub fn complete(self) -> MemoryPeer {
        let _ = self.ready.send(());
        self.peer
    }

    /// Refuse the connection; the client's `connect` fails.
    pub fn refuse(self) {
        debug!(address = %self.address, "Refusing memory connection");
    }
}

/// Frames sent to a [`MemoryConnection`].
#[derive(Debug)]
enum ServerFrame {
    Text(String),
    Close(CloseReason),
}

/// Server's end of an accepted connection.
#[derive(Debug)]
pub struct MemoryPeer {
    outbound: mpsc::UnboundedSender<ServerFrame>,
    inbound: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// Send a text frame to the client.
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.outbound.send(ServerFrame::Text(text.into()));
    }

    /// Close the connection from the server side.
    pub fn close(&self, code: Option<u16>, reason: impl Into<String>) {
        let _ = self
            .outbound
            .send(ServerFrame::Close(CloseReason::remote(code, reason)));
    }

    /// Next frame sent by the client; `None` once the client closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// A frame sent by the client, if one is queued.
    pub fn try_recv(&mut self) -> Option<String> {
        self.inbound.try_recv().ok()
    }
}

/// Client's end of an in-memory connection.
#[derive(Debug)]
pub struct MemoryConnection {
    id: ConnectionId,
    address: String,
    outbound: Option<mpsc::UnboundedSender<String>>,
    inbound: mpsc::UnboundedReceiver<ServerFrame>,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Incoming, TransportError> {
        match self.inbound.recv().await {
            Some(ServerFrame::Text(text)) => Ok(Incoming::Text(text)),
            Some(ServerFrame::Close(reason)) => {
                self.outbound = None;
                Ok(Incoming::Closed(reason))
            }
            None => {
                self.outbound = None;
                Ok(Incoming::Closed(CloseReason::remote(None, "peer dropped")))
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        match &self.outbound {
            Some(tx) => tx.send(text).map_err(|_| TransportError::ConnectionClosed),
            None => Err(TransportError::ConnectionClosed),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.outbound = None;
        Ok(())
    }

    fn remote_addr(&self) -> Option<String> {
        Some(self.address.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_completes_on_accept() {
        let (connector, mut server) = memory_transport();
        let connect = tokio::spawn(async move { connector.connect("mem://chat").await });

        let handshake = server.accept().await.unwrap();
        assert_eq!(handshake.address(), "mem://chat");
        let mut peer = handshake.complete();

        let mut connection = connect.await.unwrap().unwrap();
        connection.send("hello".into()).await.unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("hello"));

        peer.send_text("world");
        assert_eq!(
            connection.recv().await.unwrap(),
            Incoming::Text("world".into())
        );
    }

    #[tokio::test]
    async fn test_refused_connect_fails() {
        let (connector, mut server) = memory_transport();
        let connect = tokio::spawn(async move { connector.connect("mem://chat").await });

        server.accept().await.unwrap().refuse();
        assert!(matches!(
            connect.await.unwrap(),
            Err(TransportError::ConnectFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_dropped_server_reads_as_close() {
        let (connector, mut server) = memory_transport();
        let connect = tokio::spawn(async move { connector.connect("mem://chat").await });
        let peer = server.accept_peer().await.unwrap();
        let mut connection = connect.await.unwrap().unwrap();

        drop(peer);
        assert!(matches!(
            connection.recv().await.unwrap(),
            Incoming::Closed(_)
        ));
        assert!(connection.send("late".into()).await.is_err());
    }
}
