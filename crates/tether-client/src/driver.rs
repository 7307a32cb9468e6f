//! Session lifecycle driver.
//!
//! One task owns every piece of session state: the cached descriptor, the
//! transport session, the correlator, the prober and the watch set. Public
//! calls reach it as [`Request`]s; resolver, connector and authenticator
//! results come back as [`Progress`] tagged with the connect attempt that
//! started them, so results of an abandoned attempt are discarded.
//!
//! ```text
//! Closed -> Resolving -> Connecting -> AwaitingOpenAck -> Open -> Closing -> Closed
//!              ^ skipped while the cached lease is valid
//! ```

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tether_protocol::{
    codec, Command, Delivery, Inbound, Op, Params, ReplyKey, SessionToken, KEEPALIVE_FRAME,
};
use tether_transport::{
    CloseReason, Connection, ConnectionId, Connector, ReadyState, SessionEvent, TransportError,
    TransportSession,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, trace, warn};

use crate::auth::{AuthError, AuthGrant, Authenticator};
use crate::config::ClientConfig;
use crate::correlator::{Correlator, Expired, Identity, TimerKey, Waiter};
use crate::error::ClientError;
use crate::events::{Event, Observers};
use crate::metrics;
use crate::prober::Prober;
use crate::resolver::{Endpoint, ResolveError, Resolver, SessionDescriptor};
use crate::watch::WatchSet;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Closed,
    Resolving,
    Connecting,
    AwaitingOpenAck,
    Open,
    Closing,
}

impl SessionState {
    /// Whether a connect attempt is in flight.
    #[must_use]
    pub fn is_connecting(self) -> bool {
        matches!(
            self,
            SessionState::Resolving | SessionState::Connecting | SessionState::AwaitingOpenAck
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Closed => "closed",
            SessionState::Resolving => "resolving",
            SessionState::Connecting => "connecting",
            SessionState::AwaitingOpenAck => "awaiting-open-ack",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
        })
    }
}

/// Point-in-time view of the driver's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub state: SessionState,
    /// Cached endpoint address, if resolved.
    pub address: Option<String>,
    pub watching: Vec<String>,
    pub pending_correlations: usize,
    pub pending_timers: usize,
}

pub(crate) type Reply<T> = oneshot::Sender<Result<T, ClientError>>;

pub(crate) enum Request {
    Open(Reply<()>),
    Close(oneshot::Sender<()>),
    Issue {
        cmd: Command,
        op: Option<Op>,
        params: Params,
        reply: Reply<Value>,
    },
    /// Peers already authorized by the caller.
    Watch {
        peers: Vec<String>,
        token: SessionToken,
        reply: Reply<Value>,
    },
    Unwatch {
        peers: Vec<String>,
        reply: Reply<Value>,
    },
    Inspect(oneshot::Sender<Snapshot>),
}

enum Progress {
    Resolved(Result<Endpoint, ResolveError>),
    Connected(Result<Box<dyn Connection>, TransportError>),
    Authenticated(Result<AuthGrant, AuthError>),
}

/// Why the connection is being torn down.
#[derive(Debug, Clone)]
enum Teardown {
    /// `close()`, or a failed open.
    Local,
    Timeout(TimerKey),
    Remote(CloseReason),
    /// Every client handle was dropped.
    Shutdown,
}

impl Teardown {
    /// Error for correlations drained by the teardown.
    fn pending_error(&self) -> ClientError {
        match self {
            Teardown::Local | Teardown::Timeout(_) => ClientError::Closed,
            Teardown::Remote(reason) => ClientError::RemoteClose(reason.clone()),
            Teardown::Shutdown => ClientError::Shutdown,
        }
    }

    /// Error for an `open()` caller still waiting.
    fn open_error(&self) -> ClientError {
        match self {
            Teardown::Timeout(key) => ClientError::Timeout(key.clone()),
            other => other.pending_error(),
        }
    }

    /// Close event observers see, if any.
    fn close_event(&self) -> Option<CloseReason> {
        match self {
            Teardown::Remote(reason) => Some(reason.clone()),
            Teardown::Timeout(key) => Some(CloseReason::error(format!("timed out waiting for {key}"))),
            Teardown::Local | Teardown::Shutdown => None,
        }
    }
}

/// Collaborators the driver calls out to.
pub(crate) struct Seams {
    pub resolver: Arc<dyn Resolver>,
    pub connector: Arc<dyn Connector>,
    pub authenticator: Arc<dyn Authenticator>,
}

pub(crate) struct Driver {
    config: ClientConfig,
    seams: Seams,
    observers: Arc<Observers>,
    state: watch::Sender<SessionState>,
    descriptor: Option<SessionDescriptor>,
    transport: Option<TransportSession>,
    correlator: Correlator,
    prober: Prober,
    watching: WatchSet,
    open_waiter: Option<Reply<()>>,
    attempt: u64,
    requests: mpsc::UnboundedReceiver<Request>,
    progress_tx: mpsc::UnboundedSender<(u64, Progress)>,
    progress_rx: mpsc::UnboundedReceiver<(u64, Progress)>,
    events_tx: mpsc::UnboundedSender<(ConnectionId, SessionEvent)>,
    events_rx: mpsc::UnboundedReceiver<(ConnectionId, SessionEvent)>,
}

impl Driver {
    pub fn new(
        config: ClientConfig,
        seams: Seams,
        observers: Arc<Observers>,
        state: watch::Sender<SessionState>,
        requests: mpsc::UnboundedReceiver<Request>,
    ) -> Self {
        let identity = Identity {
            peer_id: config.peer_id.clone(),
            app_id: config.app_id.clone(),
        };
        let correlator = Correlator::new(identity, config.timeouts.command_timeout());
        let prober = Prober::new(config.timeouts.keepalive_interval());

        let mut watching = WatchSet::new();
        watching.extend(config.watching_peer_ids.iter().cloned());

        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            config,
            seams,
            observers,
            state,
            descriptor: None,
            transport: None,
            correlator,
            prober,
            watching,
            open_waiter: None,
            attempt: 0,
            requests,
            progress_tx,
            progress_rx,
            events_tx,
            events_rx,
        }
    }

    /// Drive the session until every client handle is dropped.
    pub async fn run(mut self) {
        debug!(peer = %self.config.peer_id, app = %self.config.app_id, "Session driver started");

        loop {
            let deadline = self.next_deadline();

            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => break,
                },
                Some((attempt, progress)) = self.progress_rx.recv() => {
                    self.handle_progress(attempt, progress);
                }
                Some((id, event)) = self.events_rx.recv() => {
                    self.handle_session_event(id, event);
                }
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.handle_deadline();
                }
            }
        }

        self.teardown(Teardown::Shutdown);
        debug!(peer = %self.config.peer_id, "Session driver stopped");
    }

    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(peer = %self.config.peer_id, from = %previous, to = %next, "Session state changed");
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.correlator.next_deadline(), self.prober.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Open(reply) => self.open(reply),
            Request::Close(reply) => {
                self.close();
                let _ = reply.send(());
            }
            Request::Issue {
                cmd,
                op,
                params,
                reply,
            } => {
                self.transmit(cmd, op, params, Waiter::Caller(reply));
            }
            Request::Watch {
                peers,
                token,
                reply,
            } => {
                let added = self.watching.extend(peers.iter().cloned());
                trace!(added, watching = self.watching.len(), "Watch set extended");
                let params = Params::new()
                    .with_session_peer_ids(peers)
                    .with_token(token);
                self.transmit(Command::Session, Some(Op::Add), params, Waiter::Caller(reply));
            }
            Request::Unwatch { peers, reply } => {
                let removed = self.watching.remove(&peers);
                trace!(removed, watching = self.watching.len(), "Watch set reduced");
                let params = Params::new().with_session_peer_ids(peers);
                self.transmit(
                    Command::Session,
                    Some(Op::Remove),
                    params,
                    Waiter::Caller(reply),
                );
            }
            Request::Inspect(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state(),
            address: self.descriptor.as_ref().map(|d| d.address().to_string()),
            watching: self.watching.to_vec(),
            pending_correlations: self.correlator.pending_len(),
            pending_timers: self.correlator.timers_len(),
        }
    }

    // ---- open ----

    fn open(&mut self, reply: Reply<()>) {
        let state = self.state();
        if state == SessionState::Open {
            let _ = reply.send(Ok(()));
            return;
        }
        if state.is_connecting() {
            let _ = reply.send(Err(ClientError::AlreadyConnecting));
            return;
        }

        self.correlator.cancel_timers();
        self.attempt += 1;
        self.open_waiter = Some(reply);

        let now = Instant::now();
        match &self.descriptor {
            Some(descriptor) if descriptor.is_valid_at(now) => {
                let address = descriptor.address().to_string();
                debug!(address = %address, "Reusing cached endpoint");
                self.connect(address);
            }
            _ => self.resolve(),
        }
    }

    fn resolve(&mut self) {
        self.set_state(SessionState::Resolving);

        let resolver = Arc::clone(&self.seams.resolver);
        let app_id = self.config.app_id.clone();
        let secure = self.config.secure;
        let progress = self.progress_tx.clone();
        let attempt = self.attempt;

        tokio::spawn(async move {
            let result = resolver.resolve(&app_id, secure).await;
            let _ = progress.send((attempt, Progress::Resolved(result)));
        });
    }

    fn connect(&mut self, address: String) {
        self.set_state(SessionState::Connecting);
        self.correlator.arm(TimerKey::Handshake, Instant::now());

        let connector = Arc::clone(&self.seams.connector);
        let progress = self.progress_tx.clone();
        let attempt = self.attempt;

        debug!(address = %address, connector = connector.name(), "Connecting");
        tokio::spawn(async move {
            let result = connector.connect(&address).await;
            let _ = progress.send((attempt, Progress::Connected(result)));
        });
    }

    fn authenticate(&mut self) {
        let authenticator = Arc::clone(&self.seams.authenticator);
        let peer_id = self.config.peer_id.clone();
        let watching = self.watching.to_vec();
        let sp = self.config.sp;
        let progress = self.progress_tx.clone();
        let attempt = self.attempt;

        tokio::spawn(async move {
            let result = authenticator.authenticate(&peer_id, &watching, sp).await;
            let _ = progress.send((attempt, Progress::Authenticated(result)));
        });
    }

    fn handle_progress(&mut self, attempt: u64, progress: Progress) {
        if attempt != self.attempt {
            trace!(attempt, current = self.attempt, "Discarding result of abandoned attempt");
            if let Progress::Connected(Ok(mut connection)) = progress {
                tokio::spawn(async move {
                    let _ = connection.close().await;
                });
            }
            return;
        }

        match progress {
            Progress::Resolved(Ok(endpoint)) => {
                metrics::record_resolution(true);
                debug!(address = %endpoint.address, ttl = ?endpoint.ttl, "Endpoint resolved");
                let descriptor = SessionDescriptor::new(endpoint, Instant::now());
                let address = descriptor.address().to_string();
                self.descriptor = Some(descriptor);
                self.connect(address);
            }
            Progress::Resolved(Err(e)) => {
                metrics::record_resolution(false);
                warn!(error = %e, "Endpoint resolution failed");
                self.fail_open(ClientError::Resolution(e.to_string()));
            }
            Progress::Connected(Ok(connection)) => {
                self.correlator.disarm_handshake();
                let session = TransportSession::spawn(connection, self.events_tx.clone());
                debug!(connection = %session.id(), "Transport open");
                self.transport = Some(session);
                self.set_state(SessionState::AwaitingOpenAck);
                self.authenticate();
            }
            Progress::Connected(Err(e)) => {
                error!(error = %e, "Transport connect failed");
                self.fail_open(ClientError::Transport(e));
            }
            Progress::Authenticated(Ok(grant)) => {
                self.watching.replace(grant.watching_peer_ids.iter().cloned());
                let params = Params::new()
                    .with_session_peer_ids(grant.watching_peer_ids)
                    .with_token(grant.token);
                if !self.transmit(Command::Session, Some(Op::Open), params, Waiter::SessionOpen) {
                    self.teardown(Teardown::Local);
                }
            }
            Progress::Authenticated(Err(e)) => {
                warn!(error = %e, "Session authentication refused");
                self.fail_open(ClientError::Auth(e.0));
            }
        }
    }

    /// Fail the pending `open()` with `error` and drop the half-built connection.
    fn fail_open(&mut self, error: ClientError) {
        if let Some(reply) = self.open_waiter.take() {
            let _ = reply.send(Err(error));
        }
        self.teardown(Teardown::Local);
    }

    // ---- close ----

    fn close(&mut self) {
        if self.transport.is_some() {
            self.set_state(SessionState::Closing);
            self.transmit(Command::Session, Some(Op::Close), Params::new(), Waiter::Detached);
        }
        self.teardown(Teardown::Local);
    }

    fn teardown(&mut self, cause: Teardown) {
        let transport = self.transport.take();
        if let Some(session) = &transport {
            debug!(connection = %session.id(), cause = ?cause, "Tearing down transport");
            session.close();
        }

        self.prober.cancel();
        if let Some(reply) = self.open_waiter.take() {
            let _ = reply.send(Err(cause.open_error()));
        }
        for waiter in self.correlator.drain() {
            self.fail(waiter, cause.pending_error());
        }
        metrics::set_pending_correlations(0);

        self.attempt += 1;
        self.set_state(SessionState::Closed);

        if transport.is_some() {
            if let Some(reason) = cause.close_event() {
                self.observers.emit(&Event::Close(reason));
            }
        }
    }

    // ---- outbound ----

    fn ensure_ready(&self) -> Result<(), ClientError> {
        match &self.transport {
            Some(session) => match session.ready_state() {
                ReadyState::Open => Ok(()),
                state => Err(ClientError::TransportNotReady(state)),
            },
            None if self.state().is_connecting() => {
                Err(ClientError::TransportNotReady(ReadyState::Connecting))
            }
            None => Err(ClientError::NotConnected),
        }
    }

    fn send_frame(&self, frame: String) -> Result<(), TransportError> {
        self.transport
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?
            .send(frame)
    }

    /// Build, classify and write a command. The waiter is settled here on
    /// failure or for fire-and-forget commands, otherwise when the reply
    /// arrives. Returns whether the frame was written.
    fn transmit(&mut self, cmd: Command, op: Option<Op>, params: Params, waiter: Waiter) -> bool {
        if let Err(e) = self.ensure_ready() {
            debug!(cmd = %cmd, error = %e, "Command rejected");
            self.fail(waiter, e);
            return false;
        }

        let envelope = self.correlator.envelope(cmd, op, params);
        let frame = match codec::encode(&envelope) {
            Ok(frame) => frame,
            Err(e) => {
                self.fail(waiter, e.into());
                return false;
            }
        };

        let now = Instant::now();
        match envelope.delivery() {
            Delivery::Correlated(key) => {
                trace!(cmd = %cmd, key = %key, "Awaiting reply");
                self.correlator.register(key, waiter, now);
                if let Err(e) = self.send_frame(frame) {
                    if let Some(waiter) = self.correlator.abandon_last() {
                        self.fail(waiter, e.into());
                    }
                    return false;
                }
                metrics::record_command(cmd.as_str(), true);
                metrics::set_pending_correlations(self.correlator.pending_len());
            }
            Delivery::FireAndForget => {
                if let Err(e) = self.send_frame(frame) {
                    self.fail(waiter, e.into());
                    return false;
                }
                metrics::record_command(cmd.as_str(), false);
                self.settle(waiter, Value::Null);
            }
        }

        self.prober.reset(now);
        true
    }

    fn acknowledge(&mut self, inbound: &Inbound) {
        let ids = inbound.ids();
        if ids.is_empty() {
            return;
        }
        self.transmit(
            Command::Ack,
            None,
            Params::new().with_ids(ids),
            Waiter::Detached,
        );
    }

    fn settle(&mut self, waiter: Waiter, value: Value) {
        match waiter {
            Waiter::Caller(reply) => {
                let _ = reply.send(Ok(value));
            }
            Waiter::SessionOpen => {
                self.set_state(SessionState::Open);
                if let Some(reply) = self.open_waiter.take() {
                    let _ = reply.send(Ok(()));
                }
            }
            Waiter::Detached => {}
        }
    }

    fn fail(&mut self, waiter: Waiter, error: ClientError) {
        match waiter {
            Waiter::Caller(reply) => {
                let _ = reply.send(Err(error));
            }
            Waiter::SessionOpen => {
                if let Some(reply) = self.open_waiter.take() {
                    let _ = reply.send(Err(error));
                }
            }
            Waiter::Detached => {}
        }
    }

    // ---- inbound ----

    fn is_current(&self, id: &ConnectionId) -> bool {
        self.transport.as_ref().is_some_and(|t| t.id() == id)
    }

    fn handle_session_event(&mut self, id: ConnectionId, event: SessionEvent) {
        if !self.is_current(&id) {
            trace!(connection = %id, "Ignoring event from a replaced transport");
            return;
        }

        match event {
            SessionEvent::Message(inbound) => self.handle_inbound(inbound),
            SessionEvent::Closed(reason) => {
                warn!(connection = %id, reason = %reason, "Transport closed");
                self.teardown(Teardown::Remote(reason));
            }
        }
    }

    fn handle_inbound(&mut self, inbound: Inbound) {
        metrics::record_inbound();

        if let Some(waiter) = self.correlator.accept(inbound.key()) {
            trace!(key = %inbound.key(), "Reply matched");
            metrics::record_reply_matched();
            metrics::set_pending_correlations(self.correlator.pending_len());
            self.settle(waiter, inbound.to_value());
        }

        if inbound.command() == Some(Command::Direct) {
            self.acknowledge(&inbound);
        }

        if let Some(event) = Event::from_inbound(&inbound) {
            self.observers.emit(&event);
        }
    }

    // ---- timers ----

    fn handle_deadline(&mut self) {
        let now = Instant::now();
        if let Some(expired) = self.correlator.expire(now) {
            self.on_timeout(expired);
            return;
        }
        if self.prober.take_due(now) {
            self.probe(now);
        }
    }

    fn on_timeout(&mut self, expired: Expired) {
        let kind = match &expired.key {
            TimerKey::Handshake => "handshake",
            TimerKey::Reply(ReplyKey::Empty) => "probe",
            TimerKey::Reply(_) => "reply",
        };
        metrics::record_timeout(kind);
        warn!(key = %expired.key, "Deadline expired");

        if let Some(waiter) = expired.waiter {
            self.fail(waiter, ClientError::Timeout(expired.key.clone()));
        }
        self.teardown(Teardown::Timeout(expired.key));
    }

    fn probe(&mut self, now: Instant) {
        let open = self
            .transport
            .as_ref()
            .is_some_and(|t| t.ready_state() == ReadyState::Open);
        if !open {
            trace!("Transport not ready; keepalive stopped");
            return;
        }

        if let Err(e) = self.send_frame(KEEPALIVE_FRAME.to_string()) {
            warn!(error = %e, "Keepalive probe not sent");
            return;
        }

        trace!("Keepalive probe sent");
        metrics::record_probe();
        self.correlator.arm(TimerKey::Reply(ReplyKey::Empty), now);
        self.prober.reset(now);
    }
}
