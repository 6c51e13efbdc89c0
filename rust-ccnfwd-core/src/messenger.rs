//! The missive bus: deferred delivery of connection-lifecycle events.
//!
//! `send` only enqueues. The dispatcher drains the queue between loop
//! iterations, so a handler that itself changes connections never re-enters
//! the code that emitted the event.

use rust_ccnfwd_common::types::ConnectionId;
use std::collections::VecDeque;
use tokio::sync::mpsc;

/// What happened to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissiveKind {
    ConnectionCreate,
    ConnectionUp,
    ConnectionDown,
    ConnectionClosed,
}

/// One connection-lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Missive {
    pub kind: MissiveKind,
    pub conn_id: ConnectionId,
}

impl Missive {
    pub fn new(kind: MissiveKind, conn_id: ConnectionId) -> Self {
        Self { kind, conn_id }
    }
}

/// Queues missives for deferred FIFO broadcast.
#[derive(Debug, Default)]
pub struct Messenger {
    pending: VecDeque<Missive>,
    subscribers: Vec<mpsc::UnboundedSender<Missive>>,
}

impl Messenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a missive for the next drain.
    pub fn send(&mut self, missive: Missive) {
        self.pending.push_back(missive);
    }

    /// Register a recipient. Each drained missive is delivered to every
    /// live subscriber in send order.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Missive> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drain the queue, fanning each missive out to subscribers, and return
    /// the drained events for the owner's own bookkeeping.
    pub fn drain(&mut self) -> Vec<Missive> {
        let drained: Vec<Missive> = self.pending.drain(..).collect();
        if !drained.is_empty() {
            self.subscribers.retain(|tx| {
                drained.iter().all(|missive| tx.send(*missive).is_ok())
            });
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_is_deferred_until_drain() {
        let mut messenger = Messenger::new();
        let mut rx = messenger.subscribe();
        messenger.send(Missive::new(MissiveKind::ConnectionUp, ConnectionId(1)));
        assert!(rx.try_recv().is_err());

        let drained = messenger.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            Missive::new(MissiveKind::ConnectionUp, ConnectionId(1))
        );
    }

    #[test]
    fn delivery_is_fifo_per_subscriber() {
        let mut messenger = Messenger::new();
        let mut rx = messenger.subscribe();
        messenger.send(Missive::new(MissiveKind::ConnectionCreate, ConnectionId(2)));
        messenger.send(Missive::new(MissiveKind::ConnectionClosed, ConnectionId(2)));
        messenger.drain();
        assert_eq!(rx.try_recv().unwrap().kind, MissiveKind::ConnectionCreate);
        assert_eq!(rx.try_recv().unwrap().kind, MissiveKind::ConnectionClosed);
    }

    #[test]
    fn dropped_subscribers_are_forgotten() {
        let mut messenger = Messenger::new();
        let rx = messenger.subscribe();
        drop(rx);
        messenger.send(Missive::new(MissiveKind::ConnectionDown, ConnectionId(3)));
        messenger.drain();
        assert!(messenger.subscribers.is_empty());
    }
}
