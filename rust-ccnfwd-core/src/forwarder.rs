//! The message processor: the pipeline gluing codec, tables, strategies
//! and connections.
//!
//! `receive` is the single entry point. It never returns an error: every
//! failure mode ends in a counted drop or a locally emitted response,
//! because the caller is an I/O callback with no recovery path. All state
//! mutation happens on the dispatcher task; nothing here locks.

use crate::clock::Clock;
use crate::conn_table::ConnectionTable;
use crate::connection::{AddressPair, ConnType, Connection, IoOps};
use crate::cs::ContentStore;
use crate::fib::Fib;
use crate::messenger::{Messenger, Missive, MissiveKind};
use crate::pit::{Pit, PitTimeout, PitVerdict};
use crate::strategy::StrategyKind;
use rust_ccnfwd_common::builder;
use rust_ccnfwd_common::message::{Message, ReturnCode};
use rust_ccnfwd_common::metrics::ForwarderMetrics;
use rust_ccnfwd_common::name::Name;
use rust_ccnfwd_common::skeleton::PacketType;
use rust_ccnfwd_common::types::ConnectionId;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Errors surfaced to configuration callers. Data-plane failures are never
/// errors; they are drops.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid route: {0}")]
    InvalidRoute(String),
    #[error("no route registered at prefix {0}")]
    UnknownPrefix(String),
}

/// External collaborator that checks packet signatures. Verification
/// happens inline; implementations must not block.
pub trait SignatureVerifier: Send {
    fn verify(&self, msg: &Message) -> bool;
}

/// External collaborator receiving control packets.
pub trait ControlSink: Send {
    fn handle_control(&mut self, msg: &Message);
}

/// The forwarder data plane: connection table, PIT, FIB, content store and
/// the processing pipeline over them.
pub struct Forwarder {
    conn_table: ConnectionTable,
    pit: Pit,
    fib: Fib,
    cs: ContentStore,
    messenger: Messenger,
    clock: Clock,
    metrics: Arc<ForwarderMetrics>,
    verifier: Option<Box<dyn SignatureVerifier>>,
    control: Option<Box<dyn ControlSink>>,
}

impl Forwarder {
    pub fn new(cs_capacity: usize) -> Self {
        Self::with_clock(cs_capacity, Clock::new())
    }

    pub fn with_clock(cs_capacity: usize, clock: Clock) -> Self {
        Self {
            conn_table: ConnectionTable::new(),
            pit: Pit::new(),
            fib: Fib::new(),
            cs: ContentStore::new(cs_capacity),
            messenger: Messenger::new(),
            clock,
            metrics: Arc::new(ForwarderMetrics::new()),
            verifier: None,
            control: None,
        }
    }

    pub fn metrics(&self) -> Arc<ForwarderMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut Clock {
        &mut self.clock
    }

    pub fn set_verifier(&mut self, verifier: Box<dyn SignatureVerifier>) {
        self.verifier = Some(verifier);
    }

    pub fn set_control_sink(&mut self, sink: Box<dyn ControlSink>) {
        self.control = Some(sink);
    }

    pub fn subscribe_missives(&mut self) -> mpsc::UnboundedReceiver<Missive> {
        self.messenger.subscribe()
    }

    /* ---------------------------------------------------------------- *
     * Connections
     * ---------------------------------------------------------------- */

    /// Create a connection and register it. Emits `ConnectionCreate` and
    /// `ConnectionUp`.
    pub fn add_connection(
        &mut self,
        conn_type: ConnType,
        addr_pair: AddressPair,
        is_local: bool,
        ops: Box<dyn IoOps>,
    ) -> ConnectionId {
        let id = self.conn_table.next_id();
        self.conn_table
            .add(Connection::new(id, conn_type, addr_pair, is_local, ops));
        self.messenger
            .send(Missive::new(MissiveKind::ConnectionCreate, id));
        self.messenger.send(Missive::new(MissiveKind::ConnectionUp, id));
        id
    }

    /// Close and drop a connection. The `ConnectionClosed` missive delivered
    /// on the next drain cascades into FIB and PIT cleanup.
    pub fn remove_connection(&mut self, id: ConnectionId) -> bool {
        self.conn_table
            .remove_by_id(id, &mut self.messenger)
            .is_some()
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.conn_table
    }

    pub fn connection_for_pair(&self, pair: &AddressPair) -> Option<ConnectionId> {
        self.conn_table.find_by_address_pair(pair).map(|c| c.id())
    }

    /* ---------------------------------------------------------------- *
     * Configuration surface
     * ---------------------------------------------------------------- */

    pub fn add_route(
        &mut self,
        prefix: Name,
        conn_id: ConnectionId,
        cost: u32,
        strategy: Option<StrategyKind>,
    ) -> Result<(), ConfigError> {
        if !self.conn_table.contains(conn_id) {
            return Err(ConfigError::InvalidRoute(format!(
                "connection {conn_id} is not in the connection table"
            )));
        }
        self.fib.add_or_update(prefix, conn_id, cost, strategy);
        self.metrics.fib_size.set(self.fib.len() as u64);
        Ok(())
    }

    /// Returns true iff the route entry emptied and was deleted.
    pub fn remove_route(&mut self, prefix: &Name, conn_id: ConnectionId) -> bool {
        let removed = self.fib.remove(prefix, conn_id);
        self.metrics.fib_size.set(self.fib.len() as u64);
        removed
    }

    pub fn set_strategy(&mut self, prefix: &Name, kind: StrategyKind) -> Result<(), ConfigError> {
        if self.fib.set_strategy(prefix, kind) {
            Ok(())
        } else {
            Err(ConfigError::UnknownPrefix(prefix.to_string()))
        }
    }

    pub fn set_cs_capacity(&mut self, capacity: usize) {
        let evicted = self.cs.set_capacity(capacity);
        self.metrics.cs_evictions.add(evicted);
        self.metrics.cs_size.set(self.cs.size() as u64);
    }

    pub fn routes(&self) -> Vec<crate::fib::RouteInfo> {
        self.fib.snapshot()
    }

    #[cfg(test)]
    pub(crate) fn fib_mut(&mut self) -> &mut Fib {
        &mut self.fib
    }

    /* ---------------------------------------------------------------- *
     * The pipeline
     * ---------------------------------------------------------------- */

    /// Process one received packet. Never fails; bad packets are dropped.
    pub fn receive(&mut self, conn_id: ConnectionId, buffer: Bytes) {
        let now = self.clock.ticks();
        self.metrics.bytes_received.add(buffer.len() as u64);
        let msg = match Message::from_wire(buffer, conn_id, now) {
            Ok(msg) => msg,
            Err(err) => {
                debug!(%conn_id, %err, "dropping unparseable packet");
                self.metrics.drops_parse.increment();
                return;
            }
        };
        match msg.packet_type() {
            PacketType::Interest => self.process_interest(msg),
            PacketType::ContentObject => self.process_content_object(msg),
            PacketType::InterestReturn => self.process_interest_return(msg),
            PacketType::Control => self.process_control(msg),
        }
        self.update_gauges();
    }

    fn process_interest(&mut self, msg: Message) {
        self.metrics.interests_received.increment();
        let now = msg.recv_ticks();
        let ingress_is_local = self
            .conn_table
            .find_by_id(msg.ingress())
            .map(|c| c.is_local())
            .unwrap_or(false);

        if msg.hop_limit() == Some(0) && !ingress_is_local {
            debug!(name = %display_name(&msg), "hop limit exhausted");
            self.metrics.drops_hop_limit.increment();
            return;
        }

        if let Some(verifier) = &self.verifier {
            if !verifier.verify(&msg) {
                self.metrics.drops_signature.increment();
                return;
            }
        }

        if let Some(cached) = self.cs.lookup(&msg, self.clock.epoch_ms()) {
            self.metrics.cs_hits.increment();
            self.send_to(msg.ingress(), &cached);
            return;
        }
        self.metrics.cs_misses.increment();

        let (verdict, stale) = self.pit.receive_interest(&msg, now);
        if let Some(timeout) = stale {
            self.notify_timeout(timeout);
        }
        if verdict == PitVerdict::Existing {
            self.metrics.interests_aggregated.increment();
            return;
        }

        let name = msg.name().expect("interest carries a name").clone();
        let lookup = self.fib.lookup(&name).map(|entry| {
            let prefix = entry.prefix().clone();
            let egress = entry.strategy().lookup_nexthop(&msg);
            let probes = entry
                .strategy()
                .take_probe_request()
                .then(|| entry.strategy().nexthops());
            (prefix, egress, probes)
        });
        let Some((prefix, egress, probe_nexthops)) = lookup else {
            debug!(name = %name, "no route");
            self.metrics.drops_no_route.increment();
            self.pit.remove_interest(&msg);
            if ingress_is_local {
                self.send_interest_return(&msg, ReturnCode::NoRoute);
            }
            return;
        };

        if let Some(nexthops) = probe_nexthops {
            for conn_id in nexthops {
                if let Some(conn) = self.conn_table.find_by_id(conn_id) {
                    conn.send_probe();
                }
            }
        }

        // One decrement per forwarder hop, shared by the whole fan-out. A
        // hop limit that reaches zero here still serves local next hops.
        let outgoing = match msg.hop_limit() {
            Some(hl) => msg.with_hop_limit(hl.saturating_sub(1)),
            None => msg.clone(),
        };
        let exhausted = outgoing.hop_limit() == Some(0);

        let mut sent = Vec::with_capacity(egress.len());
        for conn_id in egress {
            let Some(conn) = self.conn_table.find_by_id(conn_id) else {
                self.metrics.drops_conn_down.increment();
                continue;
            };
            if exhausted && !conn.is_local() {
                self.metrics.drops_hop_limit.increment();
                continue;
            }
            if conn.send(&outgoing) {
                self.metrics.bytes_sent.add(outgoing.len() as u64);
                sent.push(conn_id);
            } else {
                self.metrics.drops_conn_down.increment();
            }
        }

        if sent.is_empty() {
            // Nothing left the box; the entry would only sit out its
            // lifetime. Drop it now.
            self.pit.remove_interest(&msg);
            return;
        }
        self.pit.record_forward(&msg, prefix, &sent);
        self.metrics.interests_forwarded.increment();
    }

    fn process_content_object(&mut self, msg: Message) {
        self.metrics.objects_received.increment();
        let now = msg.recv_ticks();

        let result = self.pit.satisfy_interest(&msg, now);
        for timeout in result.timeouts {
            self.notify_timeout(timeout);
        }
        if result.ingress.is_empty() {
            debug!(name = %display_name(&msg), "unsolicited content object");
            self.metrics.drops_unsolicited.increment();
            return;
        }

        if let Some(verifier) = &self.verifier {
            if !verifier.verify(&msg) {
                self.metrics.drops_signature.increment();
                return;
            }
        }

        for satisfied in &result.satisfied {
            if let Some(prefix) = &satisfied.fib_prefix {
                if let Some(entry) = self.fib.get_mut(prefix) {
                    let rtt = now.saturating_sub(satisfied.created);
                    entry
                        .strategy()
                        .on_content_object(&satisfied.egress, &msg, rtt);
                }
            }
        }

        // A recommended cache time of exactly zero vetoes caching; the
        // expiry time governs freshness once stored.
        if msg.recommended_cache_time_ms() != Some(0) {
            let outcome = self.cs.insert(msg.clone(), self.clock.epoch_ms());
            if outcome.stored {
                self.metrics.cs_inserts.increment();
            }
            self.metrics.cs_evictions.add(outcome.evictions);
        }

        for conn_id in result.ingress {
            self.send_to(conn_id, &msg);
        }
        self.metrics.objects_forwarded.increment();
    }

    fn process_interest_return(&mut self, msg: Message) {
        self.metrics.returns_received.increment();
        debug!(
            name = %display_name(&msg),
            code = ?msg.return_code(),
            "interest returned"
        );
        // The failed path settles strategy state the same way a timeout
        // would; the return itself is not forwarded.
        if let Some(timeout) = self.pit.remove_interest(&msg) {
            self.notify_timeout(timeout);
        }
    }

    fn process_control(&mut self, msg: Message) {
        self.metrics.control_received.increment();
        if let Some(sink) = &mut self.control {
            sink.handle_control(&msg);
        }
    }

    /* ---------------------------------------------------------------- *
     * Timers and missives
     * ---------------------------------------------------------------- */

    /// Discard expired PIT entries. The dispatcher runs this every second.
    pub fn sweep_pit(&mut self) {
        let now = self.clock.ticks();
        for timeout in self.pit.sweep(now) {
            self.notify_timeout(timeout);
        }
        self.update_gauges();
    }

    /// Drain the missive queue, applying the forwarder's own cascades and
    /// fanning events out to subscribers. Handlers may enqueue further
    /// missives; the drain repeats until quiescent.
    pub fn deliver_missives(&mut self) {
        while self.messenger.has_pending() {
            for missive in self.messenger.drain() {
                if missive.kind == MissiveKind::ConnectionClosed {
                    self.fib.remove_connection_from_all_routes(missive.conn_id);
                    for timeout in self.pit.remove_connection(missive.conn_id) {
                        self.notify_timeout(timeout);
                    }
                }
            }
        }
        self.update_gauges();
    }

    fn notify_timeout(&mut self, timeout: PitTimeout) {
        let Some(prefix) = timeout.fib_prefix else {
            return;
        };
        if let Some(entry) = self.fib.get_mut(&prefix) {
            entry.strategy().on_timeout(&timeout.egress);
        }
    }

    fn send_to(&self, conn_id: ConnectionId, msg: &Message) -> bool {
        match self.conn_table.find_by_id(conn_id) {
            Some(conn) if conn.send(msg) => {
                self.metrics.bytes_sent.add(msg.len() as u64);
                true
            }
            _ => {
                self.metrics.drops_conn_down.increment();
                false
            }
        }
    }

    fn send_interest_return(&mut self, interest: &Message, code: ReturnCode) {
        let wire = builder::interest_return(interest, code);
        match Message::from_wire(wire, interest.ingress(), interest.recv_ticks()) {
            Ok(ret) => {
                self.send_to(interest.ingress(), &ret);
            }
            Err(err) => debug!(%err, "could not build interest return"),
        }
    }

    fn update_gauges(&self) {
        self.metrics.pit_size.set(self.pit.len() as u64);
        self.metrics.fib_size.set(self.fib.len() as u64);
        self.metrics.cs_size.set(self.cs.size() as u64);
    }
}

fn display_name(msg: &Message) -> String {
    msg.name()
        .map(|n| n.to_string())
        .unwrap_or_else(|| "(nameless)".to_string())
}

#[cfg(test)]
mod tests;
