//! Transport session: one live connection driven by its own task.
//!
//! The session task owns the [`Connection`]. Outbound frames are queued
//! through [`TransportSession::send`], which never blocks; inbound frames are
//! decoded and forwarded as [`SessionEvent`]s tagged with the connection id,
//! so a consumer that has already replaced the session can tell stale events
//! apart.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tether_protocol::{codec, Inbound};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::traits::{CloseReason, Connection, ConnectionId, Incoming, ReadyState, TransportError};

/// Event reported by a session task.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A decoded inbound frame.
    Message(Inbound),
    /// The connection ended. Always the last event of a session.
    Closed(CloseReason),
}

/// Sender half used by session tasks to report events.
pub type SessionEvents = mpsc::UnboundedSender<(ConnectionId, SessionEvent)>;

enum Outbound {
    Frame(String),
    Close,
}

/// Handle to a running session task.
#[derive(Debug)]
pub struct TransportSession {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<Outbound>,
    state: Arc<AtomicU8>,
}

impl TransportSession {
    /// Start driving an open connection. Must be called within a tokio runtime.
    pub fn spawn(connection: Box<dyn Connection>, events: SessionEvents) -> Self {
        let id = connection.id().clone();
        let state = Arc::new(AtomicU8::new(ReadyState::Open as u8));
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        debug!(connection = %id, remote = ?connection.remote_addr(), "Transport session started");

        tokio::spawn(run(
            connection,
            outbound_rx,
            Arc::clone(&state),
            events,
        ));

        Self {
            id,
            outbound,
            state,
        }
    }

    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Queue a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotReady`] unless the session is open.
    pub fn send(&self, text: String) -> Result<(), TransportError> {
        let state = self.ready_state();
        if state != ReadyState::Open {
            return Err(TransportError::NotReady(state));
        }

        self.outbound
            .send(Outbound::Frame(text))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Ask the session task to close the connection. Idempotent.
    pub fn close(&self) {
        let previous = self
            .state
            .swap(ReadyState::Closing as u8, Ordering::SeqCst);
        match ReadyState::from_u8(previous) {
            ReadyState::Closed => {
                self.state.store(ReadyState::Closed as u8, Ordering::SeqCst);
            }
            ReadyState::Closing => {}
            _ => {
                let _ = self.outbound.send(Outbound::Close);
            }
        }
    }
}

async fn run(
    mut connection: Box<dyn Connection>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    state: Arc<AtomicU8>,
    events: SessionEvents,
) {
    let id = connection.id().clone();

    let reason = loop {
        tokio::select! {
            biased;

            out = outbound.recv() => match out {
                Some(Outbound::Frame(text)) => {
                    trace!(connection = %id, frame = %text, "Sending frame");
                    if let Err(e) = connection.send(text).await {
                        warn!(connection = %id, error = %e, "Send failed");
                        break CloseReason::error(e.to_string());
                    }
                }
                Some(Outbound::Close) | None => {
                    if let Err(e) = connection.close().await {
                        debug!(connection = %id, error = %e, "Close handshake failed");
                    }
                    break CloseReason::local();
                }
            },

            incoming = connection.recv() => match incoming {
                Ok(Incoming::Text(text)) => {
                    trace!(connection = %id, frame = %text, "Received frame");
                    match codec::decode(&text) {
                        Ok(inbound) => {
                            if events.send((id.clone(), SessionEvent::Message(inbound))).is_err() {
                                break CloseReason::local();
                            }
                        }
                        Err(e) => warn!(connection = %id, error = %e, "Dropping undecodable frame"),
                    }
                }
                Ok(Incoming::Closed(reason)) => break reason,
                Err(e) => {
                    warn!(connection = %id, error = %e, "Receive failed");
                    break CloseReason::error(e.to_string());
                }
            },
        }
    };

    state.store(ReadyState::Closed as u8, Ordering::SeqCst);
    debug!(connection = %id, reason = %reason, "Transport session ended");
    let _ = events.send((id, SessionEvent::Closed(reason)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::memory_transport;
    use crate::traits::{CloseInitiator, Connector};
    use tether_protocol::{Command, ReplyKey};

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (connector, mut server) = memory_transport();
        let connect = tokio::spawn(async move { connector.connect("mem://a").await });
        let mut peer = server.accept_peer().await.unwrap();
        let connection = connect.await.unwrap().unwrap();

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let session = TransportSession::spawn(connection, events_tx);
        assert_eq!(session.ready_state(), ReadyState::Open);

        session.send("{\"cmd\":\"ack\"}".to_string()).unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("{\"cmd\":\"ack\"}"));

        peer.send_text("{\"cmd\":\"direct\",\"id\":\"m1\"}");
        let (id, event) = events_rx.recv().await.unwrap();
        assert_eq!(&id, session.id());
        match event {
            SessionEvent::Message(inbound) => {
                assert_eq!(inbound.key(), &ReplyKey::Known(Command::Direct, None));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_undecodable_frame_is_dropped() {
        let (connector, mut server) = memory_transport();
        let connect = tokio::spawn(async move { connector.connect("mem://a").await });
        let peer = server.accept_peer().await.unwrap();
        let connection = connect.await.unwrap().unwrap();

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let _session = TransportSession::spawn(connection, events_tx);

        peer.send_text("not json");
        peer.send_text("{}");
        let (_, event) = events_rx.recv().await.unwrap();
        assert!(matches!(event, SessionEvent::Message(ref m) if m.key() == &ReplyKey::Empty));
    }

    #[tokio::test]
    async fn test_remote_close_reported_and_send_rejected() {
        let (connector, mut server) = memory_transport();
        let connect = tokio::spawn(async move { connector.connect("mem://a").await });
        let peer = server.accept_peer().await.unwrap();
        let connection = connect.await.unwrap().unwrap();

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let session = TransportSession::spawn(connection, events_tx);

        peer.close(Some(1000), "bye");
        let (_, event) = events_rx.recv().await.unwrap();
        match event {
            SessionEvent::Closed(reason) => {
                assert_eq!(reason.initiator, CloseInitiator::Remote);
                assert_eq!(reason.code, Some(1000));
            }
            other => panic!("unexpected event {:?}", other),
        }

        assert!(matches!(
            session.send("{}".into()),
            Err(TransportError::NotReady(ReadyState::Closed))
        ));
    }

    #[tokio::test]
    async fn test_local_close() {
        let (connector, mut server) = memory_transport();
        let connect = tokio::spawn(async move { connector.connect("mem://a").await });
        let mut peer = server.accept_peer().await.unwrap();
        let connection = connect.await.unwrap().unwrap();

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let session = TransportSession::spawn(connection, events_tx);

        session.close();
        assert!(matches!(
            session.send("{}".into()),
            Err(TransportError::NotReady(_))
        ));

        let (_, event) = events_rx.recv().await.unwrap();
        assert!(matches!(
            event,
            SessionEvent::Closed(CloseReason { initiator: CloseInitiator::Local, .. })
        ));
        assert_eq!(peer.recv().await, None);
        assert_eq!(session.ready_state(), ReadyState::Closed);
    }
}
