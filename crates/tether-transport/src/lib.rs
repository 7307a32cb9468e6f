//! # tether-transport
//!
//! Transport abstraction layer for the Tether session client.
//!
//! This crate provides a unified interface for the connections a client
//! session runs over:
//!
//! - **WebSocket** - text frames over `ws://` (and `wss://` with the `tls` feature)
//! - **Memory** - an in-process pair, the server side scripted by the caller
//!
//! ## Transport Abstraction
//!
//! Connectors implement [`Connector`] and hand back a boxed [`Connection`].
//! A [`TransportSession`] then drives the connection on its own task:
//!
//! ```rust,ignore
//! use tether_transport::{Connector, TransportSession, WebSocketConnector};
//!
//! let connection = WebSocketConnector::default().connect("ws://127.0.0.1:9000").await?;
//! let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
//! let session = TransportSession::spawn(connection, events_tx);
//! session.send("{}".to_string())?;
//! while let Some((id, event)) = events_rx.recv().await {
//!     // Process event
//! }
//! ```

pub mod memory;
pub mod session;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{memory_transport, MemoryConnector, MemoryPeer, MemoryServer};
pub use session::{SessionEvent, SessionEvents, TransportSession};
pub use traits::{
    CloseInitiator, CloseReason, Connection, ConnectionId, Connector, Incoming, ReadyState,
    TransportError,
};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketConnector};
