//! Public client handle.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tether_protocol::{Command, Op, Params, SessionToken};
use tether_transport::{Connector, WebSocketConnector};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use crate::auth::{Authenticator, GroupAction, GroupAuthorizer, GroupGrant, Passthrough};
use crate::config::ClientConfig;
use crate::driver::{Driver, Reply, Request, Seams, SessionState, Snapshot};
use crate::error::ClientError;
use crate::events::{Event, EventKind, Observers};
use crate::resolver::{Resolver, StaticResolver};

/// Builds a [`Client`].
pub struct ClientBuilder {
    config: ClientConfig,
    resolver: Option<Arc<dyn Resolver>>,
    connector: Option<Arc<dyn Connector>>,
    authenticator: Arc<dyn Authenticator>,
    group_authorizer: Arc<dyn GroupAuthorizer>,
}

impl ClientBuilder {
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            resolver: None,
            connector: None,
            authenticator: Arc::new(Passthrough),
            group_authorizer: Arc::new(Passthrough),
        }
    }

    /// Resolve endpoints with `resolver` instead of the configured endpoint.
    #[must_use]
    pub fn resolver(mut self, resolver: impl Resolver + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Open connections with `connector`. Defaults to WebSocket.
    #[must_use]
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    #[must_use]
    pub fn authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Arc::new(authenticator);
        self
    }

    #[must_use]
    pub fn group_authorizer(mut self, authorizer: impl GroupAuthorizer + 'static) -> Self {
        self.group_authorizer = Arc::new(authorizer);
        self
    }

    /// Validate the configuration and start the session driver.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if the configuration is invalid, no
    /// resolver or endpoint is available, or no tokio runtime is running.
    pub fn build(self) -> Result<Client, ClientError> {
        self.config.validate()?;

        let resolver = match (self.resolver, &self.config.endpoint) {
            (Some(resolver), _) => resolver,
            (None, Some(endpoint)) => Arc::new(StaticResolver::new(
                endpoint.address.clone(),
                endpoint.ttl(),
            )),
            (None, None) => {
                return Err(ClientError::Config(
                    "no resolver supplied and no endpoint configured".into(),
                ))
            }
        };
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WebSocketConnector::default()));

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| ClientError::Config("a client must be built inside a tokio runtime".into()))?;

        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Closed);
        let observers = Arc::new(Observers::new());

        let driver = Driver::new(
            self.config.clone(),
            Seams {
                resolver,
                connector,
                authenticator: Arc::clone(&self.authenticator),
            },
            Arc::clone(&observers),
            state_tx,
            requests_rx,
        );
        runtime.spawn(driver.run());

        debug!(peer = %self.config.peer_id, app = %self.config.app_id, "Client built");

        Ok(Client {
            inner: Arc::new(Inner {
                config: self.config,
                requests: requests_tx,
                state: state_rx,
                observers,
                authenticator: self.authenticator,
                group_authorizer: self.group_authorizer,
            }),
        })
    }
}

struct Inner {
    config: ClientConfig,
    requests: mpsc::UnboundedSender<Request>,
    state: watch::Receiver<SessionState>,
    observers: Arc<Observers>,
    authenticator: Arc<dyn Authenticator>,
    group_authorizer: Arc<dyn GroupAuthorizer>,
}

/// Handle to a chat session. Cheap to clone; the session driver stops when
/// the last handle is dropped.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("peer_id", &self.inner.config.peer_id)
            .field("state", &self.state())
            .finish()
    }
}

fn collect<I, S>(peers: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    peers.into_iter().map(Into::into).collect()
}

impl Client {
    /// Shorthand for `ClientBuilder::new(config)`.
    #[must_use]
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    #[must_use]
    pub fn peer_id(&self) -> &str {
        &self.inner.config.peer_id
    }

    async fn call<T>(&self, request: impl FnOnce(Reply<T>) -> Request) -> Result<T, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .requests
            .send(request(tx))
            .map_err(|_| ClientError::Shutdown)?;
        rx.await.map_err(|_| ClientError::Shutdown)?
    }

    /// Resolve, connect, authenticate and open the session.
    ///
    /// Returns immediately if the session is already open.
    ///
    /// # Errors
    ///
    /// [`ClientError::AlreadyConnecting`] while another open is in flight;
    /// otherwise the error of whichever stage failed.
    pub async fn open(&self) -> Result<(), ClientError> {
        self.call(Request::Open).await
    }

    /// Close the session. Every pending call fails with [`ClientError::Closed`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Shutdown`] if the driver is gone.
    pub async fn close(&self) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .requests
            .send(Request::Close(tx))
            .map_err(|_| ClientError::Shutdown)?;
        rx.await.map_err(|_| ClientError::Shutdown)
    }

    /// Send a raw command and wait for its outcome.
    ///
    /// Correlated commands resolve with the reply frame; fire-and-forget
    /// commands resolve with `null` once written.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] or [`ClientError::TransportNotReady`] if
    /// nothing could be sent; [`ClientError::Timeout`] if no reply arrived in
    /// time; a close error if the connection went away first.
    pub async fn issue(
        &self,
        cmd: Command,
        op: Option<Op>,
        params: Params,
    ) -> Result<Value, ClientError> {
        self.call(|reply| Request::Issue {
            cmd,
            op,
            params,
            reply,
        })
        .await
    }

    /// Send a direct message. Transient messages are not acknowledged.
    ///
    /// # Errors
    ///
    /// See [`Client::issue`].
    pub async fn send<I, S>(
        &self,
        msg: impl Into<String>,
        to: I,
        transient: bool,
    ) -> Result<Value, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let params = Params::new()
            .with_msg(msg)
            .with_to_peer_ids(collect(to))
            .with_transient(transient);
        self.issue(Command::Direct, None, params).await
    }

    /// Start watching the presence of `peers`.
    ///
    /// The authorized peers join the watch set even when the command cannot
    /// be sent, so the next `open()` includes them. Watch grants are signed
    /// without the `sp` flag and never carry it on the wire.
    ///
    /// # Errors
    ///
    /// [`ClientError::Auth`] if the authenticator refuses; see [`Client::issue`].
    pub async fn watch<I, S>(&self, peers: I) -> Result<Value, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let peers = collect(peers);
        let grant = self
            .inner
            .authenticator
            .authenticate(&self.inner.config.peer_id, &peers, None)
            .await
            .map_err(|e| ClientError::Auth(e.0))?;

        self.call(|reply| Request::Watch {
            peers: grant.watching_peer_ids,
            token: SessionToken {
                sp: None,
                ..grant.token
            },
            reply,
        })
        .await
    }

    /// Stop watching `peers`.
    ///
    /// # Errors
    ///
    /// See [`Client::issue`].
    pub async fn unwatch<I, S>(&self, peers: I) -> Result<(), ClientError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let peers = collect(peers);
        self.call(|reply| Request::Unwatch { peers, reply })
            .await
            .map(|_| ())
    }

    /// Which of `peers` are online.
    ///
    /// # Errors
    ///
    /// See [`Client::issue`].
    pub async fn get_status<I, S>(&self, peers: I) -> Result<Vec<String>, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let params = Params::new().with_session_peer_ids(collect(peers));
        let reply = self
            .issue(Command::Session, Some(Op::Query), params)
            .await?;

        Ok(reply
            .get("onlineSessionPeerIds")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| id.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn authorize(
        &self,
        group_id: &str,
        action: GroupAction,
        peers: &[String],
    ) -> Result<GroupGrant, ClientError> {
        self.inner
            .group_authorizer
            .authorize(&self.inner.config.peer_id, group_id, action, peers)
            .await
            .map_err(|e| ClientError::Auth(e.0))
    }

    /// Join a room.
    ///
    /// # Errors
    ///
    /// [`ClientError::Auth`] if the authorizer refuses; see [`Client::issue`].
    pub async fn join_group(&self, group_id: &str) -> Result<Value, ClientError> {
        let grant = self.authorize(group_id, GroupAction::Join, &[]).await?;
        let params = Params::new().with_room_id(group_id).with_token(grant.token);
        self.issue(Command::Room, Some(Op::Join), params).await
    }

    /// Send a message to a room.
    ///
    /// # Errors
    ///
    /// See [`Client::issue`].
    pub async fn send_to_group(
        &self,
        msg: impl Into<String>,
        group_id: &str,
        transient: bool,
    ) -> Result<Value, ClientError> {
        let params = Params::new()
            .with_msg(msg)
            .with_room_id(group_id)
            .with_transient(transient);
        self.issue(Command::Direct, None, params).await
    }

    /// Invite peers into a room.
    ///
    /// The invitation lists the peers the authorizer granted.
    ///
    /// # Errors
    ///
    /// [`ClientError::Auth`] if the authorizer refuses; see [`Client::issue`].
    pub async fn invite_to_group<I, S>(&self, group_id: &str, peers: I) -> Result<Value, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let grant = self
            .authorize(group_id, GroupAction::Invite, &collect(peers))
            .await?;
        let params = Params::new()
            .with_room_id(group_id)
            .with_room_peer_ids(grant.group_peer_ids)
            .with_token(grant.token);
        self.issue(Command::Room, Some(Op::Invite), params).await
    }

    /// Remove peers from a room.
    ///
    /// Unlike [`Client::invite_to_group`], the kick lists the peers as given;
    /// the authorizer's grant only supplies the signature.
    ///
    /// # Errors
    ///
    /// [`ClientError::Auth`] if the authorizer refuses; see [`Client::issue`].
    pub async fn kick_from_group<I, S>(&self, group_id: &str, peers: I) -> Result<Value, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let peers = collect(peers);
        let grant = self.authorize(group_id, GroupAction::Kick, &peers).await?;
        let params = Params::new()
            .with_room_id(group_id)
            .with_room_peer_ids(peers)
            .with_token(grant.token);
        self.issue(Command::Room, Some(Op::Kick), params).await
    }

    /// Leave a room.
    ///
    /// # Errors
    ///
    /// See [`Client::issue`].
    pub async fn leave_group(&self, group_id: &str) -> Result<Value, ClientError> {
        let params = Params::new().with_room_id(group_id);
        self.issue(Command::Room, Some(Op::Leave), params).await
    }

    /// Register an observer for `kind`. Observers run on the session driver
    /// and must not block.
    pub fn on(&self, kind: EventKind, observer: impl Fn(&Event) + Send + Sync + 'static) {
        self.inner.observers.subscribe(kind, Arc::new(observer));
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Receiver that observes lifecycle state changes.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.inner.state.clone()
    }

    /// Watched peers, pending counts and the cached endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Shutdown`] if the driver is gone.
    pub async fn snapshot(&self) -> Result<Snapshot, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .requests
            .send(Request::Inspect(tx))
            .map_err(|_| ClientError::Shutdown)?;
        rx.await.map_err(|_| ClientError::Shutdown)
    }
}
