//! # tether-client
//!
//! Persistent session client for the Tether chat protocol.
//!
//! A [`Client`] resolves an endpoint, opens a transport, authenticates and
//! keeps the session alive. Requests are answered in order by the server, so
//! each command that expects a reply waits at the back of a FIFO queue and
//! is resolved when a frame with its reply key reaches the head:
//!
//! - **Correlator** - pending replies and their deadlines
//! - **Prober** - keepalive probes after an idle period
//! - **Driver** - the lifecycle state machine owning all session state
//! - **Events** - presence, messages and room changes for observers
//!
//! ## Example
//!
//! ```rust,ignore
//! use tether_client::{Client, ClientConfig, EventKind};
//!
//! let mut config = ClientConfig::new("my-app", "alice");
//! config.endpoint = Some(tether_client::EndpointConfig {
//!     address: "ws://127.0.0.1:9000/ws".into(),
//!     ttl_secs: 3600,
//! });
//!
//! let client = Client::builder(config).build()?;
//! client.on(EventKind::Message, |event| println!("{:?}", event));
//! client.open().await?;
//! client.send("hello", ["bob"], false).await?;
//! client.close().await?;
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod correlator;
pub mod driver;
pub mod error;
pub mod events;
pub mod metrics;
pub mod resolver;

mod prober;
mod watch;

pub use auth::{
    AuthError, AuthGrant, Authenticator, GroupAction, GroupAuthorizer, GroupGrant, Passthrough,
};
pub use client::{Client, ClientBuilder};
pub use config::{ClientConfig, EndpointConfig, TimeoutConfig};
pub use correlator::TimerKey;
pub use driver::{SessionState, Snapshot};
pub use error::ClientError;
pub use events::{DirectMessage, Event, EventKind, Observer, Observers, RoomEvent};
pub use resolver::{Endpoint, ResolveError, Resolver, SessionDescriptor, StaticResolver};
