//! Command correlation.
//!
//! Two FIFO queues: pending correlations (requests waiting for a reply) and
//! pending timers (deadlines for replies, keepalive probes and the transport
//! handshake). The server acknowledges in order, so only the head of each
//! queue is ever eligible: the head correlation is the only one an inbound
//! frame can resolve, and the head timer is the next to expire.
//!
//! Every timer is armed with the same window, so arrival order is also
//! deadline order and the queue needs no sorting.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use serde_json::Value;
use tether_protocol::{Command, Envelope, Op, Params, ReplyKey};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::ClientError;

/// What a pending timer guards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// The transport handshake of a connect attempt.
    Handshake,
    /// A reply (or keepalive echo) with this key.
    Reply(ReplyKey),
}

impl TimerKey {
    fn guards(&self, key: &ReplyKey) -> bool {
        matches!(self, TimerKey::Reply(k) if k == key)
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerKey::Handshake => f.write_str("connect-open"),
            TimerKey::Reply(key) => write!(f, "{key}"),
        }
    }
}

/// Whoever is waiting on a correlated command.
#[derive(Debug)]
pub(crate) enum Waiter {
    /// A public API call.
    Caller(oneshot::Sender<Result<Value, ClientError>>),
    /// The session-open command issued by the lifecycle driver.
    SessionOpen,
    /// Nobody; used for internal fire-and-forget sends.
    Detached,
}

/// Identity stamped on every outbound envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Identity {
    pub peer_id: String,
    pub app_id: String,
}

#[derive(Debug)]
struct Pending {
    id: u64,
    key: ReplyKey,
    waiter: Waiter,
}

#[derive(Debug)]
struct PendingTimer {
    key: TimerKey,
    deadline: Instant,
    correlation: Option<u64>,
}

/// A timer that fired, with the waiter it failed (if it guarded one that was
/// still pending).
#[derive(Debug)]
pub(crate) struct Expired {
    pub key: TimerKey,
    pub waiter: Option<Waiter>,
}

#[derive(Debug)]
pub(crate) struct Correlator {
    identity: Identity,
    window: Duration,
    pending: VecDeque<Pending>,
    timers: VecDeque<PendingTimer>,
    next_id: u64,
}

impl Correlator {
    pub fn new(identity: Identity, window: Duration) -> Self {
        Self {
            identity,
            window,
            pending: VecDeque::new(),
            timers: VecDeque::new(),
            next_id: 0,
        }
    }

    /// Build an envelope carrying this session's identity.
    pub fn envelope(&self, cmd: Command, op: Option<Op>, params: Params) -> Envelope {
        Envelope::new(cmd, &self.identity.peer_id, &self.identity.app_id)
            .with_op(op)
            .with_params(params)
    }

    /// Register a correlation and arm its timer.
    pub fn register(&mut self, key: ReplyKey, waiter: Waiter, now: Instant) {
        let id = self.next_id;
        self.next_id += 1;

        self.timers.push_back(PendingTimer {
            key: TimerKey::Reply(key.clone()),
            deadline: now + self.window,
            correlation: Some(id),
        });
        self.pending.push_back(Pending { id, key, waiter });
    }

    /// Undo the most recent [`register`](Self::register) after its frame
    /// could not be written.
    pub fn abandon_last(&mut self) -> Option<Waiter> {
        let pending = self.pending.pop_back()?;
        if self
            .timers
            .back()
            .is_some_and(|t| t.correlation == Some(pending.id))
        {
            self.timers.pop_back();
        }
        Some(pending.waiter)
    }

    /// Arm a timer with no correlation (handshake, keepalive).
    pub fn arm(&mut self, key: TimerKey, now: Instant) {
        self.timers.push_back(PendingTimer {
            key,
            deadline: now + self.window,
            correlation: None,
        });
    }

    /// Disarm the handshake timer at the head of the queue.
    pub fn disarm_handshake(&mut self) -> bool {
        if self
            .timers
            .front()
            .is_some_and(|t| t.key == TimerKey::Handshake)
        {
            self.timers.pop_front();
            true
        } else {
            false
        }
    }

    /// Match an inbound key against the heads of both queues.
    ///
    /// Returns the resolved waiter when the head correlation matched. The
    /// head timer is cancelled independently when it guards the same key.
    pub fn accept(&mut self, key: &ReplyKey) -> Option<Waiter> {
        let resolved = if self.pending.front().is_some_and(|p| &p.key == key) {
            self.pending.pop_front().map(|p| p.waiter)
        } else {
            None
        };

        if self.timers.front().is_some_and(|t| t.key.guards(key)) {
            self.timers.pop_front();
        }

        resolved
    }

    /// Deadline of the head timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.front().map(|t| t.deadline)
    }

    /// Pop the head timer if it has expired at `now`.
    pub fn expire(&mut self, now: Instant) -> Option<Expired> {
        if self.timers.front().map_or(true, |t| t.deadline > now) {
            return None;
        }
        let timer = self.timers.pop_front()?;

        let waiter = timer.correlation.and_then(|id| {
            let index = self.pending.iter().position(|p| p.id == id)?;
            self.pending.remove(index).map(|p| p.waiter)
        });

        Some(Expired {
            key: timer.key,
            waiter,
        })
    }

    /// Drop every timer.
    pub fn cancel_timers(&mut self) {
        self.timers.clear();
    }

    /// Drop every timer and hand back all pending waiters in FIFO order.
    pub fn drain(&mut self) -> Vec<Waiter> {
        self.timers.clear();
        self.pending.drain(..).map(|p| p.waiter).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn timers_len(&self) -> usize {
        self.timers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(10);

    fn correlator() -> Correlator {
        Correlator::new(
            Identity {
                peer_id: "alice".into(),
                app_id: "app".into(),
            },
            WINDOW,
        )
    }

    fn caller() -> (Waiter, oneshot::Receiver<Result<Value, ClientError>>) {
        let (tx, rx) = oneshot::channel();
        (Waiter::Caller(tx), rx)
    }

    fn resolve(waiter: Waiter, value: Value) {
        match waiter {
            Waiter::Caller(tx) => tx.send(Ok(value)).unwrap(),
            other => panic!("unexpected waiter {:?}", other),
        }
    }

    fn key(cmd: Command, op: Option<Op>) -> ReplyKey {
        ReplyKey::Known(cmd, op)
    }

    #[test]
    fn test_envelope_carries_identity() {
        let envelope = correlator().envelope(Command::Room, Some(Op::Leave), Params::new());
        assert_eq!(envelope.peer_id, "alice");
        assert_eq!(envelope.app_id, "app");
        assert_eq!(envelope.op, Some(Op::Leave));
    }

    #[test]
    fn test_match_removes_head_and_its_timer() {
        let mut c = correlator();
        let now = Instant::now();
        let (waiter, mut rx) = caller();
        let ack = key(Command::Ack, None);

        c.register(ack.clone(), waiter, now);
        assert_eq!((c.pending_len(), c.timers_len()), (1, 1));

        let resolved = c.accept(&ack).expect("head should match");
        resolve(resolved, Value::Null);
        assert_eq!((c.pending_len(), c.timers_len()), (0, 0));
        assert!(rx.try_recv().unwrap().is_ok());
    }

    #[test]
    fn test_only_head_can_match() {
        let mut c = correlator();
        let now = Instant::now();
        let joined = key(Command::Room, Some(Op::Joined));
        let left = key(Command::Room, Some(Op::Left));

        c.register(joined.clone(), caller().0, now);
        c.register(left.clone(), caller().0, now);

        assert!(c.accept(&left).is_none());
        assert_eq!((c.pending_len(), c.timers_len()), (2, 2));

        assert!(c.accept(&joined).is_some());
        assert!(c.accept(&left).is_some());
        assert_eq!((c.pending_len(), c.timers_len()), (0, 0));
    }

    #[test]
    fn test_in_order_replies_resolve_in_order() {
        let mut c = correlator();
        let now = Instant::now();
        let keys = [
            key(Command::Session, Some(Op::Added)),
            key(Command::Room, Some(Op::Joined)),
            key(Command::Ack, None),
        ];

        let mut receivers = Vec::new();
        for k in &keys {
            let (waiter, rx) = caller();
            c.register(k.clone(), waiter, now);
            receivers.push(rx);
        }

        for (i, k) in keys.iter().enumerate() {
            resolve(c.accept(k).unwrap(), Value::from(i));
        }

        for (i, mut rx) in receivers.into_iter().enumerate() {
            assert_eq!(rx.try_recv().unwrap().unwrap(), Value::from(i));
        }
    }

    #[test]
    fn test_timer_cancelled_independently_of_correlation() {
        let mut c = correlator();
        let now = Instant::now();

        c.arm(TimerKey::Reply(ReplyKey::Empty), now);
        assert!(c.accept(&ReplyKey::Empty).is_none());
        assert_eq!(c.timers_len(), 0);
    }

    #[test]
    fn test_expire_fails_guarded_correlation() {
        let mut c = correlator();
        let now = Instant::now();
        let added = key(Command::Session, Some(Op::Added));

        c.register(added.clone(), caller().0, now);
        c.register(key(Command::Ack, None), caller().0, now);

        assert!(c.expire(now + WINDOW - Duration::from_millis(1)).is_none());
        assert_eq!(c.next_deadline(), Some(now + WINDOW));

        let expired = c.expire(now + WINDOW).unwrap();
        assert_eq!(expired.key, TimerKey::Reply(added));
        assert!(matches!(expired.waiter, Some(Waiter::Caller(_))));
        assert_eq!((c.pending_len(), c.timers_len()), (1, 1));
    }

    #[test]
    fn test_expire_after_resolution_has_no_waiter() {
        let mut c = correlator();
        let now = Instant::now();
        let ack = key(Command::Ack, None);

        // Keepalive timer ahead of the correlation's own timer.
        c.arm(TimerKey::Reply(ReplyKey::Empty), now);
        c.register(ack.clone(), caller().0, now);

        // The reply resolves the correlation but the head timer is the probe's.
        assert!(c.accept(&ack).is_some());
        assert_eq!(c.timers_len(), 2);

        let probe = c.expire(now + WINDOW).unwrap();
        assert_eq!(probe.key, TimerKey::Reply(ReplyKey::Empty));
        assert!(probe.waiter.is_none());
    }

    #[test]
    fn test_handshake_timer() {
        let mut c = correlator();
        let now = Instant::now();

        assert!(!c.disarm_handshake());
        c.arm(TimerKey::Handshake, now);
        assert!(c.disarm_handshake());
        assert_eq!(c.timers_len(), 0);
    }

    #[test]
    fn test_drain_preserves_fifo_order() {
        let mut c = correlator();
        let now = Instant::now();
        let (w1, mut rx1) = caller();
        let (w2, mut rx2) = caller();

        c.arm(TimerKey::Handshake, now);
        c.register(key(Command::Ack, None), w1, now);
        c.register(key(Command::Room, Some(Op::Left)), w2, now);

        let drained = c.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!((c.pending_len(), c.timers_len()), (0, 0));
        assert_eq!(c.next_deadline(), None);

        for (i, waiter) in drained.into_iter().enumerate() {
            resolve(waiter, Value::from(i));
        }
        assert_eq!(rx1.try_recv().unwrap().unwrap(), Value::from(0));
        assert_eq!(rx2.try_recv().unwrap().unwrap(), Value::from(1));
    }

    #[test]
    fn test_abandon_last() {
        let mut c = correlator();
        let now = Instant::now();

        c.register(key(Command::Ack, None), caller().0, now);
        c.register(key(Command::Room, Some(Op::Joined)), Waiter::SessionOpen, now);

        assert!(matches!(c.abandon_last(), Some(Waiter::SessionOpen)));
        assert_eq!((c.pending_len(), c.timers_len()), (1, 1));
    }

    #[test]
    fn test_timer_key_display() {
        assert_eq!(TimerKey::Handshake.to_string(), "connect-open");
        assert_eq!(TimerKey::Reply(ReplyKey::Empty).to_string(), "{}");
    }
}
