//! Event surface: unsolicited notifications and their observers.
//!
//! Inbound frames with a recognized `cmd` are turned into [`Event`]s and
//! delivered synchronously to every observer registered for the event's
//! kind, in registration order. A panicking observer is logged and skipped;
//! later observers still run.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tether_protocol::{Command, Inbound};
use tether_transport::CloseReason;
use tracing::{trace, warn};

/// Event names observers can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Online,
    Offline,
    Message,
    MembersJoined,
    MembersLeft,
    Joined,
    Left,
    Close,
}

impl EventKind {
    /// Every event kind.
    pub const ALL: [EventKind; 8] = [
        EventKind::Online,
        EventKind::Offline,
        EventKind::Message,
        EventKind::MembersJoined,
        EventKind::MembersLeft,
        EventKind::Joined,
        EventKind::Left,
        EventKind::Close,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Online => "online",
            EventKind::Offline => "offline",
            EventKind::Message => "message",
            EventKind::MembersJoined => "membersJoined",
            EventKind::MembersLeft => "membersLeft",
            EventKind::Joined => "joined",
            EventKind::Left => "left",
            EventKind::Close => "close",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| format!("unknown event name: {s}"))
    }
}

/// A direct (or room) message delivered to this peer.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectMessage {
    pub from_peer_id: Option<String>,
    pub room_id: Option<String>,
    pub msg: Option<String>,
    /// Id(s) acknowledged on receipt.
    pub ids: Vec<Value>,
    pub timestamp: Option<i64>,
    /// The frame as received.
    pub raw: Value,
}

/// A room membership change.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomEvent {
    pub room_id: Option<String>,
    pub room_peer_ids: Vec<String>,
    pub by_peer_id: Option<String>,
    /// The frame as received.
    pub raw: Value,
}

impl RoomEvent {
    fn from_inbound(inbound: &Inbound) -> Self {
        Self {
            room_id: inbound.str_field("roomId").map(str::to_string),
            room_peer_ids: inbound.peer_list("roomPeerIds"),
            by_peer_id: inbound.str_field("byPeerId").map(str::to_string),
            raw: inbound.to_value(),
        }
    }
}

/// A notification for observers.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Watched peers came online.
    Online(Vec<String>),
    /// Watched peers went offline.
    Offline(Vec<String>),
    Message(DirectMessage),
    MembersJoined(RoomEvent),
    MembersLeft(RoomEvent),
    /// This peer joined a room.
    Joined(RoomEvent),
    /// This peer left (or was removed from) a room.
    Left(RoomEvent),
    /// The transport was closed by the remote end or the network.
    Close(CloseReason),
}

impl Event {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Online(_) => EventKind::Online,
            Event::Offline(_) => EventKind::Offline,
            Event::Message(_) => EventKind::Message,
            Event::MembersJoined(_) => EventKind::MembersJoined,
            Event::MembersLeft(_) => EventKind::MembersLeft,
            Event::Joined(_) => EventKind::Joined,
            Event::Left(_) => EventKind::Left,
            Event::Close(_) => EventKind::Close,
        }
    }

    /// Route an inbound frame to the event it announces, if any.
    #[must_use]
    pub fn from_inbound(inbound: &Inbound) -> Option<Event> {
        match (inbound.command()?, inbound.op()) {
            (Command::Session, Some("opened" | "added")) => Some(Event::Online(
                inbound.peer_list("onlineSessionPeerIds"),
            )),
            (Command::Presence, _) => match inbound.str_field("status") {
                Some("on") => Some(Event::Online(inbound.peer_list("sessionPeerIds"))),
                Some("off") => Some(Event::Offline(inbound.peer_list("sessionPeerIds"))),
                _ => None,
            },
            (Command::Direct, _) => Some(Event::Message(DirectMessage {
                from_peer_id: inbound.str_field("fromPeerId").map(str::to_string),
                room_id: inbound.str_field("roomId").map(str::to_string),
                msg: inbound.str_field("msg").map(str::to_string),
                ids: inbound.ids(),
                timestamp: inbound.body().get("timestamp").and_then(Value::as_i64),
                raw: inbound.to_value(),
            })),
            (Command::Room, Some("members-joined")) => {
                Some(Event::MembersJoined(RoomEvent::from_inbound(inbound)))
            }
            (Command::Room, Some("members-left")) => {
                Some(Event::MembersLeft(RoomEvent::from_inbound(inbound)))
            }
            (Command::Room, Some("joined")) => Some(Event::Joined(RoomEvent::from_inbound(inbound))),
            (Command::Room, Some("left")) => Some(Event::Left(RoomEvent::from_inbound(inbound))),
            _ => None,
        }
    }
}

/// An observer callback.
pub type Observer = Arc<dyn Fn(&Event) + Send + Sync>;

/// Observers keyed by event kind.
#[derive(Default)]
pub struct Observers {
    by_kind: DashMap<EventKind, Vec<Observer>>,
}

impl Observers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer for one kind of event.
    pub fn subscribe(&self, kind: EventKind, observer: Observer) {
        self.by_kind.entry(kind).or_default().push(observer);
    }

    /// Number of observers registered for `kind`.
    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.by_kind.get(&kind).map(|list| list.len()).unwrap_or(0)
    }

    /// Deliver an event to its observers. Returns how many ran to completion.
    pub fn emit(&self, event: &Event) -> usize {
        let kind = event.kind();

        // Clone the list so observers may subscribe without deadlocking.
        let observers = match self.by_kind.get(&kind) {
            Some(list) => list.clone(),
            None => return 0,
        };

        trace!(event = %kind, observers = observers.len(), "Emitting event");

        observers
            .iter()
            .filter(|observer| {
                let delivered = catch_unwind(AssertUnwindSafe(|| observer(event))).is_ok();
                if !delivered {
                    warn!(event = %kind, "Observer panicked");
                }
                delivered
            })
            .count()
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("kinds", &self.by_kind.len())
            .finish()
    }
}
