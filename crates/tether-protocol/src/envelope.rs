//! Outbound envelopes and inbound messages.
//!
//! Outbound frames are strongly typed [`Envelope`]s. Inbound frames are kept
//! as raw JSON objects wrapped in [`Inbound`], since the server adds fields
//! this client does not model and observers receive them verbatim.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::command::{Command, Op, ReplyKey};

/// Token fields produced by the authentication callbacks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    /// Signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<String>,
    /// Signing timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<i64>,
    /// Nonce.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// Per-peer signature flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sp: Option<bool>,
}

impl SessionToken {
    /// Whether no token field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.s.is_none() && self.t.is_none() && self.n.is_none() && self.sp.is_none()
    }
}

/// Command-specific fields of an outbound envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Params {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_peer_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_peer_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_peer_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transient: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<Value>>,
    #[serde(flatten)]
    pub token: SessionToken,
}

impl Params {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_session_peer_ids(mut self, peers: Vec<String>) -> Self {
        self.session_peer_ids = Some(peers);
        self
    }

    #[must_use]
    pub fn with_room_id(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    #[must_use]
    pub fn with_room_peer_ids(mut self, peers: Vec<String>) -> Self {
        self.room_peer_ids = Some(peers);
        self
    }

    #[must_use]
    pub fn with_msg(mut self, msg: impl Into<String>) -> Self {
        self.msg = Some(msg.into());
        self
    }

    #[must_use]
    pub fn with_to_peer_ids(mut self, peers: Vec<String>) -> Self {
        self.to_peer_ids = Some(peers);
        self
    }

    /// Mark the message transient. The field is only ever sent as `true`.
    #[must_use]
    pub fn with_transient(mut self, transient: bool) -> Self {
        self.transient = transient.then_some(true);
        self
    }

    #[must_use]
    pub fn with_ids(mut self, ids: Vec<Value>) -> Self {
        self.ids = Some(ids);
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: SessionToken) -> Self {
        self.token = token;
        self
    }
}

/// How the sender learns that a command completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Complete once written to the transport.
    FireAndForget,
    /// Complete when a frame with this key arrives.
    Correlated(ReplyKey),
}

/// An outbound frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub cmd: Command,
    pub peer_id: String,
    pub app_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<Op>,
    #[serde(flatten)]
    pub params: Params,
}

impl Envelope {
    /// Create an envelope carrying the sender's identity.
    #[must_use]
    pub fn new(cmd: Command, peer_id: impl Into<String>, app_id: impl Into<String>) -> Self {
        Self {
            cmd,
            peer_id: peer_id.into(),
            app_id: app_id.into(),
            op: None,
            params: Params::default(),
        }
    }

    #[must_use]
    pub fn with_op(mut self, op: Option<Op>) -> Self {
        self.op = op;
        self
    }

    #[must_use]
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Classify the envelope.
    ///
    /// Session close/remove, acknowledgements and transient direct messages
    /// get no reply; everything else is correlated with the aliased reply key.
    #[must_use]
    pub fn delivery(&self) -> Delivery {
        match (self.cmd, self.op) {
            (Command::Session, Some(Op::Close | Op::Remove)) | (Command::Ack, _) => {
                Delivery::FireAndForget
            }
            (Command::Direct, _) if self.params.transient == Some(true) => Delivery::FireAndForget,
            (cmd, op) => Delivery::Correlated(cmd.expected_reply(op)),
        }
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    key: ReplyKey,
    body: Map<String, Value>,
}

impl Inbound {
    /// Wrap a decoded JSON object, deriving its reply key.
    #[must_use]
    pub fn new(body: Map<String, Value>) -> Self {
        let key = ReplyKey::derive(
            body.get("cmd").and_then(Value::as_str),
            body.get("op").and_then(Value::as_str),
        );
        Self { key, body }
    }

    #[must_use]
    pub fn key(&self) -> &ReplyKey {
        &self.key
    }

    /// The recognized command, if any.
    #[must_use]
    pub fn command(&self) -> Option<Command> {
        self.body
            .get("cmd")
            .and_then(Value::as_str)
            .and_then(Command::parse)
    }

    /// The raw `op` field.
    #[must_use]
    pub fn op(&self) -> Option<&str> {
        self.str_field("op")
    }

    /// A string field.
    #[must_use]
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.body.get(name).and_then(Value::as_str)
    }

    /// A list of peer ids; non-string entries are skipped and a missing field
    /// yields an empty list.
    #[must_use]
    pub fn peer_list(&self, name: &str) -> Vec<String> {
        match self.body.get(name) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(single)) => vec![single.clone()],
            _ => Vec::new(),
        }
    }

    /// Message id(s) to acknowledge. `id` may be a scalar or an array.
    #[must_use]
    pub fn ids(&self) -> Vec<Value> {
        match self.body.get("id") {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other.clone()],
        }
    }

    #[must_use]
    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    /// The frame as a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.body.clone())
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inbound(value: Value) -> Inbound {
        match value {
            Value::Object(map) => Inbound::new(map),
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = Envelope::new(Command::Session, "alice", "app-1")
            .with_op(Some(Op::Open))
            .with_params(
                Params::new()
                    .with_session_peer_ids(vec!["bob".into()])
                    .with_token(SessionToken {
                        s: Some("sig".into()),
                        t: Some(42),
                        n: Some("nonce".into()),
                        sp: None,
                    }),
            );

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({
                "cmd": "session",
                "op": "open",
                "peerId": "alice",
                "appId": "app-1",
                "sessionPeerIds": ["bob"],
                "s": "sig",
                "t": 42,
                "n": "nonce",
            })
        );
    }

    #[test]
    fn test_transient_only_sent_when_true() {
        let params = Params::new().with_msg("hi").with_transient(false);
        let value = serde_json::to_value(&params).unwrap();
        assert!(value.get("transient").is_none());

        let params = Params::new().with_msg("hi").with_transient(true);
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["transient"], json!(true));
    }

    #[test]
    fn test_delivery_classification() {
        let base = |cmd, op| Envelope::new(cmd, "p", "a").with_op(op);

        assert_eq!(
            base(Command::Session, Some(Op::Close)).delivery(),
            Delivery::FireAndForget
        );
        assert_eq!(
            base(Command::Session, Some(Op::Remove)).delivery(),
            Delivery::FireAndForget
        );
        assert_eq!(base(Command::Ack, None).delivery(), Delivery::FireAndForget);

        let transient = base(Command::Direct, None)
            .with_params(Params::new().with_msg("x").with_transient(true));
        assert_eq!(transient.delivery(), Delivery::FireAndForget);

        let durable = base(Command::Direct, None)
            .with_params(Params::new().with_msg("x").with_transient(false));
        assert_eq!(
            durable.delivery(),
            Delivery::Correlated(ReplyKey::Known(Command::Ack, None))
        );

        assert_eq!(
            base(Command::Room, Some(Op::Leave)).delivery(),
            Delivery::Correlated(ReplyKey::Known(Command::Room, Some(Op::Left)))
        );
    }

    #[test]
    fn test_inbound_accessors() {
        let msg = inbound(json!({
            "cmd": "direct",
            "id": "m-1",
            "fromPeerId": "bob",
            "msg": "hello",
        }));
        assert_eq!(msg.key(), &ReplyKey::Known(Command::Direct, None));
        assert_eq!(msg.command(), Some(Command::Direct));
        assert_eq!(msg.ids(), vec![json!("m-1")]);
        assert_eq!(msg.str_field("fromPeerId"), Some("bob"));

        let presence = inbound(json!({
            "cmd": "presence",
            "status": "on",
            "sessionPeerIds": ["a", 7, "b"],
        }));
        assert_eq!(presence.peer_list("sessionPeerIds"), vec!["a", "b"]);
        assert!(presence.peer_list("missing").is_empty());
    }

    #[test]
    fn test_keepalive_reply_has_empty_key() {
        let reply = inbound(json!({}));
        assert_eq!(reply.key(), &ReplyKey::Empty);
        assert!(reply.ids().is_empty());
    }
}
