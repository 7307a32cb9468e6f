//! Command identifiers and reply keys.
//!
//! Every frame carries a `cmd` and, for most commands, an `op`. The pair
//! identifies what a frame is; for requests it also determines which reply
//! the server will answer with.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level command carried in the `cmd` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Session lifecycle and watched-peer management.
    Session,
    /// Direct or room message.
    Direct,
    /// Delivery acknowledgement.
    Ack,
    /// Room (group) membership.
    Room,
    /// Presence notification pushed by the server.
    Presence,
}

impl Command {
    /// Wire name of the command.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Session => "session",
            Command::Direct => "direct",
            Command::Ack => "ack",
            Command::Room => "room",
            Command::Presence => "presence",
        }
    }

    /// Parse a wire name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "session" => Some(Command::Session),
            "direct" => Some(Command::Direct),
            "ack" => Some(Command::Ack),
            "room" => Some(Command::Room),
            "presence" => Some(Command::Presence),
            _ => None,
        }
    }

    /// The key of the reply the server sends for `(self, op)`.
    #[must_use]
    pub fn expected_reply(self, op: Option<Op>) -> ReplyKey {
        let (cmd, op) = REPLY_ALIASES
            .iter()
            .find(|(request, _)| *request == (self, op))
            .map_or((self, op), |(_, reply)| *reply);
        ReplyKey::Known(cmd, op)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-operation carried in the `op` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Op {
    Open,
    Opened,
    Add,
    Added,
    Remove,
    Close,
    Query,
    QueryResult,
    Join,
    Joined,
    Invite,
    Invited,
    Leave,
    Left,
    Kick,
    Kicked,
    MembersJoined,
    MembersLeft,
}

impl Op {
    /// Wire name of the operation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Op::Open => "open",
            Op::Opened => "opened",
            Op::Add => "add",
            Op::Added => "added",
            Op::Remove => "remove",
            Op::Close => "close",
            Op::Query => "query",
            Op::QueryResult => "query-result",
            Op::Join => "join",
            Op::Joined => "joined",
            Op::Invite => "invite",
            Op::Invited => "invited",
            Op::Leave => "leave",
            Op::Left => "left",
            Op::Kick => "kick",
            Op::Kicked => "kicked",
            Op::MembersJoined => "members-joined",
            Op::MembersLeft => "members-left",
        }
    }

    /// Parse a wire name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        ALL_OPS.iter().copied().find(|op| op.as_str() == name)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const ALL_OPS: [Op; 18] = [
    Op::Open,
    Op::Opened,
    Op::Add,
    Op::Added,
    Op::Remove,
    Op::Close,
    Op::Query,
    Op::QueryResult,
    Op::Join,
    Op::Joined,
    Op::Invite,
    Op::Invited,
    Op::Leave,
    Op::Left,
    Op::Kick,
    Op::Kicked,
    Op::MembersJoined,
    Op::MembersLeft,
];

/// Requests whose reply carries a different identifier than the request.
///
/// Any request not listed here is answered with its own `(cmd, op)`.
pub const REPLY_ALIASES: [((Command, Option<Op>), (Command, Option<Op>)); 8] = [
    ((Command::Direct, None), (Command::Ack, None)),
    ((Command::Session, Some(Op::Open)), (Command::Session, Some(Op::Opened))),
    ((Command::Session, Some(Op::Add)), (Command::Session, Some(Op::Added))),
    ((Command::Session, Some(Op::Query)), (Command::Session, Some(Op::QueryResult))),
    ((Command::Room, Some(Op::Join)), (Command::Room, Some(Op::Joined))),
    ((Command::Room, Some(Op::Invite)), (Command::Room, Some(Op::Invited))),
    ((Command::Room, Some(Op::Leave)), (Command::Room, Some(Op::Left))),
    ((Command::Room, Some(Op::Kick)), (Command::Room, Some(Op::Kicked))),
];

/// Identifier used to match an inbound frame against a pending request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReplyKey {
    /// Frame with neither `cmd` nor `op`; keepalive replies look like this.
    Empty,
    /// A recognized command with an optional recognized operation.
    Known(Command, Option<Op>),
    /// Anything else, kept verbatim as `cmd` followed by `op`.
    Unrecognized(String),
}

impl ReplyKey {
    /// Derive the key of an inbound frame from its raw `cmd` and `op` fields.
    ///
    /// Empty strings count as absent.
    #[must_use]
    pub fn derive(cmd: Option<&str>, op: Option<&str>) -> Self {
        let cmd = cmd.filter(|c| !c.is_empty());
        let op = op.filter(|o| !o.is_empty());

        match (cmd, op) {
            (None, None) => ReplyKey::Empty,
            (Some(c), None) => match Command::parse(c) {
                Some(command) => ReplyKey::Known(command, None),
                None => ReplyKey::Unrecognized(c.to_string()),
            },
            (Some(c), Some(o)) => match (Command::parse(c), Op::parse(o)) {
                (Some(command), Some(op)) => ReplyKey::Known(command, Some(op)),
                _ => ReplyKey::Unrecognized(format!("{c}{o}")),
            },
            (None, Some(o)) => ReplyKey::Unrecognized(o.to_string()),
        }
    }
}

impl fmt::Display for ReplyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyKey::Empty => f.write_str("{}"),
            ReplyKey::Known(cmd, None) => write!(f, "{cmd}"),
            ReplyKey::Known(cmd, Some(op)) => write!(f, "{cmd}:{op}"),
            ReplyKey::Unrecognized(raw) => f.write_str(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_aliases() {
        assert_eq!(
            Command::Direct.expected_reply(None),
            ReplyKey::Known(Command::Ack, None)
        );
        assert_eq!(
            Command::Session.expected_reply(Some(Op::Open)),
            ReplyKey::Known(Command::Session, Some(Op::Opened))
        );
        assert_eq!(
            Command::Session.expected_reply(Some(Op::Query)),
            ReplyKey::Known(Command::Session, Some(Op::QueryResult))
        );
        assert_eq!(
            Command::Room.expected_reply(Some(Op::Kick)),
            ReplyKey::Known(Command::Room, Some(Op::Kicked))
        );
    }

    #[test]
    fn test_unaliased_request_expects_itself() {
        assert_eq!(
            Command::Session.expected_reply(Some(Op::Close)),
            ReplyKey::Known(Command::Session, Some(Op::Close))
        );
    }

    #[test]
    fn test_derive_keys() {
        assert_eq!(ReplyKey::derive(None, None), ReplyKey::Empty);
        assert_eq!(ReplyKey::derive(Some(""), None), ReplyKey::Empty);
        assert_eq!(
            ReplyKey::derive(Some("ack"), None),
            ReplyKey::Known(Command::Ack, None)
        );
        assert_eq!(
            ReplyKey::derive(Some("session"), Some("query-result")),
            ReplyKey::Known(Command::Session, Some(Op::QueryResult))
        );
        assert_eq!(
            ReplyKey::derive(Some("room"), Some("renamed")),
            ReplyKey::Unrecognized("roomrenamed".into())
        );
    }

    #[test]
    fn test_op_wire_names_match_serde() {
        for op in ALL_OPS {
            let json = serde_json::to_string(&op).unwrap();
            assert_eq!(json, format!("\"{}\"", op.as_str()));
            assert_eq!(Op::parse(op.as_str()), Some(op));
        }
    }

    #[test]
    fn test_key_display() {
        assert_eq!(ReplyKey::Empty.to_string(), "{}");
        assert_eq!(
            Command::Room.expected_reply(Some(Op::Join)).to_string(),
            "room:joined"
        );
    }
}
