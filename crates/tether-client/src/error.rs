//! Client errors.

use tether_protocol::ProtocolError;
use tether_transport::{CloseReason, ReadyState, TransportError};
use thiserror::Error;

use crate::correlator::TimerKey;

/// Errors surfaced by [`Client`](crate::Client) operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A required setting is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The endpoint resolver failed.
    #[error("Resolution failed: {0}")]
    Resolution(String),

    /// `open()` was called while a connect attempt is in flight.
    #[error("A connect attempt is already in flight")]
    AlreadyConnecting,

    /// No transport exists.
    #[error("Not connected")]
    NotConnected,

    /// The transport exists but cannot send.
    #[error("Transport not ready: {0}")]
    TransportNotReady(ReadyState),

    /// A reply, keepalive or handshake missed its deadline.
    #[error("Timed out waiting for {0}")]
    Timeout(TimerKey),

    /// The remote end or the network closed the connection.
    #[error("Connection closed by remote: {0}")]
    RemoteClose(CloseReason),

    /// The connection was torn down locally while the request was pending.
    #[error("Connection closed")]
    Closed,

    /// An authentication or authorization callback refused.
    #[error("Authorization failed: {0}")]
    Auth(String),

    /// Transport failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame encoding failure.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The session driver task is no longer running.
    #[error("Session driver stopped")]
    Shutdown,
}

impl ClientError {
    /// Whether the error means the connection is gone.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout(_)
                | ClientError::RemoteClose(_)
                | ClientError::Closed
                | ClientError::NotConnected
        )
    }
}
