//! Publish acknowledgement tracking
//!
//! rumqttc reports an outgoing publish as `Outgoing::Publish(pkid)` once it is
//! written to the socket, and the broker's answer as an incoming `PubAck`.
//! Callers enqueue publishes one at a time under the client's publish lock, so
//! outgoing packets appear in the same order waiters were registered. The
//! tracker pairs them FIFO, then resolves each waiter when its PubAck arrives.
//! Packet id 0 means QoS 0: there is no acknowledgement, the write completes it.
//!
//! When the connection drops, rumqttc keeps the abandoned publishes and writes
//! them again after redialing, ahead of anything enqueued later. Those writes
//! are counted as orphans and skipped so later waiters stay aligned.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::oneshot;

/// Final state of one publish as seen by the event loop
#[derive(Debug, Clone, PartialEq)]
pub enum AckOutcome {
    /// Broker acknowledged, or the QoS 0 packet was written
    Delivered,
    /// Broker answered with a failure reason code
    Rejected(String),
    /// Connection dropped before an answer arrived
    Abandoned(String),
}

pub type AckReceiver = oneshot::Receiver<AckOutcome>;

#[derive(Debug, Default)]
struct AckState {
    /// Registered but not yet seen on the wire
    unsent: VecDeque<oneshot::Sender<AckOutcome>>,
    /// Written with a packet id, waiting for PubAck
    inflight: HashMap<u16, oneshot::Sender<AckOutcome>>,
    /// Abandoned publishes rumqttc will still write
    orphans: usize,
}

/// Correlates publish callers with broker acknowledgements
#[derive(Debug, Default)]
pub struct AckTracker {
    state: Mutex<AckState>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for the next publish about to be enqueued
    pub fn register(&self) -> AckReceiver {
        let (tx, rx) = oneshot::channel();
        self.with_state(|state| state.unsent.push_back(tx));
        rx
    }

    /// Drop the most recently registered waiter after a failed enqueue
    pub fn discard_last(&self) {
        self.with_state(|state| {
            state.unsent.pop_back();
        });
    }

    /// The oldest unsent publish went out with `pkid`
    pub fn on_sent(&self, pkid: u16) {
        self.with_state(|state| {
            if state.orphans > 0 {
                state.orphans -= 1;
                return;
            }
            let Some(waiter) = state.unsent.pop_front() else {
                return;
            };
            if pkid == 0 {
                let _ = waiter.send(AckOutcome::Delivered);
            } else {
                state.inflight.insert(pkid, waiter);
            }
        });
    }

    /// The broker answered the publish with `pkid`
    pub fn on_acked(&self, pkid: u16, outcome: AckOutcome) {
        self.with_state(|state| {
            if let Some(waiter) = state.inflight.remove(&pkid) {
                let _ = waiter.send(outcome);
            }
        });
    }

    /// Fail every waiter, used when the connection drops
    pub fn abandon_all(&self, reason: &str) {
        self.with_state(|state| {
            state.orphans += state.unsent.len() + state.inflight.len();
            for waiter in state.unsent.drain(..) {
                let _ = waiter.send(AckOutcome::Abandoned(reason.to_string()));
            }
            for (_, waiter) in state.inflight.drain() {
                let _ = waiter.send(AckOutcome::Abandoned(reason.to_string()));
            }
        });
    }

    /// Publishes still waiting on the wire or on the broker
    pub fn pending(&self) -> usize {
        self.with_state(|state| state.unsent.len() + state.inflight.len())
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut AckState) -> R) -> R {
        // Every mutation is a single queue operation, so poisoning is harmless
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}
