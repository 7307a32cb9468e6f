//! # tether-protocol
//!
//! Wire protocol definitions for the Tether session client.
//!
//! Frames are JSON objects sent as WebSocket text messages. Every outbound
//! frame carries `cmd`, `peerId` and `appId`; most also carry an `op`
//! sub-operation and command-specific fields.
//!
//! ## Reply Keys
//!
//! The server answers requests in order, and an answer is recognized by its
//! `(cmd, op)` pair. Some requests are answered under a different pair
//! (`direct` is answered by `ack`, `session open` by `session opened`); the
//! [`REPLY_ALIASES`] table lists them.
//!
//! ## Example
//!
//! ```rust
//! use tether_protocol::{codec, Command, Envelope, Op, Params};
//!
//! let envelope = Envelope::new(Command::Room, "alice", "my-app")
//!     .with_op(Some(Op::Join))
//!     .with_params(Params::new().with_room_id("lobby"));
//!
//! let text = codec::encode(&envelope).unwrap();
//! let reply = codec::decode(r#"{"cmd":"room","op":"joined"}"#).unwrap();
//! assert_eq!(reply.key(), &Command::Room.expected_reply(Some(Op::Join)));
//! # let _ = text;
//! ```

pub mod codec;
pub mod command;
pub mod envelope;

pub use codec::{decode, encode, ProtocolError, KEEPALIVE_FRAME};
pub use command::{Command, Op, ReplyKey, REPLY_ALIASES};
pub use envelope::{Delivery, Envelope, Inbound, Params, SessionToken};
