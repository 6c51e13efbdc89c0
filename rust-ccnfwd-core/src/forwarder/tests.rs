//! End-to-end pipeline tests over mock connections.

use super::*;
use crate::clock::Clock;
use crate::connection::{Address, AddressPair, ConnType, IoOps};
use crate::strategy::StrategyKind;
use rust_ccnfwd_common::builder::{ContentObjectBuilder, InterestBuilder};
use rust_ccnfwd_common::message::Message;
use rust_ccnfwd_common::name::Name;
use rust_ccnfwd_common::skeleton::PacketType;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct MockOps {
    sent: Arc<Mutex<Vec<Bytes>>>,
    up: Arc<AtomicBool>,
    probes: Arc<AtomicU64>,
}

impl MockOps {
    fn new() -> Self {
        let ops = Self::default();
        ops.up.store(true, Ordering::Relaxed);
        ops
    }

    fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }
}

impl IoOps for MockOps {
    fn send(&self, message: &Message) -> bool {
        self.sent.lock().unwrap().push(message.bytes().clone());
        true
    }

    fn is_up(&self) -> bool {
        self.up.load(Ordering::Relaxed)
    }

    fn close(&self) {
        self.up.store(false, Ordering::Relaxed);
    }

    fn send_probe(&self) {
        self.probes.fetch_add(1, Ordering::Relaxed);
    }
}

fn forwarder(cs_capacity: usize) -> Forwarder {
    Forwarder::with_clock(cs_capacity, Clock::manual())
}

fn add_conn(fwd: &mut Forwarder, endpoint: u64, local: bool) -> (ConnectionId, MockOps) {
    let ops = MockOps::new();
    let id = fwd.add_connection(
        ConnType::Local,
        AddressPair::new(Address::Local(0), Address::Local(endpoint)),
        local,
        Box::new(ops.clone()),
    );
    fwd.deliver_missives();
    (id, ops)
}

fn interest(uri: &str) -> Bytes {
    InterestBuilder::new(Name::from_uri(uri).unwrap()).build()
}

fn interest_with_lifetime(uri: &str, lifetime_ms: u64) -> Bytes {
    InterestBuilder::new(Name::from_uri(uri).unwrap())
        .lifetime_ms(lifetime_ms)
        .build()
}

fn content(uri: &str) -> Bytes {
    ContentObjectBuilder::new(Name::from_uri(uri).unwrap(), b"some payload".as_ref()).build()
}

/// Everything but the hop-limit byte, which the forwarder decrements.
fn without_hop_limit(bytes: &Bytes) -> (&[u8], &[u8]) {
    (&bytes[..4], &bytes[5..])
}

#[test]
fn interest_forwards_to_fib_nexthop() {
    let mut fwd = forwarder(10);
    let (consumer, consumer_ops) = add_conn(&mut fwd, 1, false);
    let (producer, producer_ops) = add_conn(&mut fwd, 7, false);
    fwd.add_route(Name::from_uri("lci:/a").unwrap(), producer, 1, None)
        .unwrap();

    let wire = interest("lci:/a/b");
    fwd.receive(consumer, wire.clone());

    let sent = producer_ops.sent();
    assert_eq!(sent.len(), 1, "exactly one packet on the next hop");
    assert_eq!(without_hop_limit(&sent[0]), without_hop_limit(&wire));
    assert!(consumer_ops.sent().is_empty());
    assert_eq!(fwd.metrics().pit_size.value(), 1);
    assert_eq!(fwd.metrics().interests_forwarded.value(), 1);
}

#[test]
fn same_interest_aggregates_without_forwarding() {
    let mut fwd = forwarder(10);
    let (conn1, _) = add_conn(&mut fwd, 1, false);
    let (conn2, _) = add_conn(&mut fwd, 2, false);
    let (producer, producer_ops) = add_conn(&mut fwd, 7, false);
    fwd.add_route(Name::from_uri("lci:/a").unwrap(), producer, 1, None)
        .unwrap();

    fwd.receive(conn1, interest("lci:/a/b"));
    fwd.receive(conn2, interest("lci:/a/b"));

    assert_eq!(producer_ops.sent().len(), 1, "aggregated interest not re-sent");
    assert_eq!(fwd.metrics().interests_aggregated.value(), 1);
    assert_eq!(fwd.metrics().pit_size.value(), 1);
}

#[test]
fn content_object_satisfies_all_requesters() {
    let mut fwd = forwarder(10);
    let (conn1, ops1) = add_conn(&mut fwd, 1, false);
    let (conn2, ops2) = add_conn(&mut fwd, 2, false);
    let (producer, _) = add_conn(&mut fwd, 7, false);
    fwd.add_route(Name::from_uri("lci:/a").unwrap(), producer, 1, None)
        .unwrap();

    fwd.receive(conn1, interest("lci:/a/b"));
    fwd.receive(conn2, interest("lci:/a/b"));

    let object = content("lci:/a/b");
    fwd.receive(producer, object.clone());

    assert_eq!(ops1.sent().len(), 1);
    assert_eq!(ops2.sent().len(), 1);
    assert_eq!(ops1.sent()[0], object, "byte-identical delivery");
    assert_eq!(fwd.metrics().pit_size.value(), 0, "entry satisfied");
    assert_eq!(fwd.metrics().cs_inserts.value(), 1, "cached on the way through");
}

#[test]
fn cached_object_answers_without_touching_pit() {
    let mut fwd = forwarder(10);
    let (conn1, _) = add_conn(&mut fwd, 1, false);
    let (conn2, ops2) = add_conn(&mut fwd, 2, false);
    let (producer, producer_ops) = add_conn(&mut fwd, 7, false);
    fwd.add_route(Name::from_uri("lci:/a").unwrap(), producer, 1, None)
        .unwrap();

    // Prime the cache through the normal exchange.
    fwd.receive(conn1, interest("lci:/a/b"));
    let object = content("lci:/a/b");
    fwd.receive(producer, object.clone());
    let upstream_before = producer_ops.sent().len();

    // A later requester is answered from the store, byte for byte.
    fwd.receive(conn2, interest("lci:/a/b"));
    assert_eq!(ops2.sent().len(), 1);
    assert_eq!(ops2.sent()[0], object);
    assert_eq!(producer_ops.sent().len(), upstream_before, "no upstream traffic");
    assert_eq!(fwd.metrics().pit_size.value(), 0, "PIT unchanged");
    assert_eq!(fwd.metrics().cs_hits.value(), 1);
}

#[test]
fn cache_disabled_when_capacity_zero() {
    let mut fwd = forwarder(0);
    let (conn1, _) = add_conn(&mut fwd, 1, false);
    let (producer, _) = add_conn(&mut fwd, 7, false);
    fwd.add_route(Name::from_uri("lci:/a").unwrap(), producer, 1, None)
        .unwrap();

    fwd.receive(conn1, interest("lci:/a/b"));
    fwd.receive(producer, content("lci:/a/b"));
    assert_eq!(fwd.metrics().cs_inserts.value(), 0);
    assert_eq!(fwd.metrics().cs_size.value(), 0);
}

#[test]
fn zero_cache_time_vetoes_insertion() {
    let mut fwd = forwarder(10);
    let (conn1, _) = add_conn(&mut fwd, 1, false);
    let (producer, _) = add_conn(&mut fwd, 7, false);
    fwd.add_route(Name::from_uri("lci:/a").unwrap(), producer, 1, None)
        .unwrap();

    fwd.receive(conn1, interest("lci:/a/b"));
    let wire = ContentObjectBuilder::new(
        Name::from_uri("lci:/a/b").unwrap(),
        b"uncacheable".as_ref(),
    )
    .recommended_cache_time_ms(0)
    .build();
    fwd.receive(producer, wire);
    assert_eq!(fwd.metrics().objects_forwarded.value(), 1, "still delivered");
    assert_eq!(fwd.metrics().cs_inserts.value(), 0);
}

#[test]
fn unsolicited_content_object_is_dropped() {
    let mut fwd = forwarder(10);
    let (producer, _) = add_conn(&mut fwd, 7, false);
    fwd.receive(producer, content("lci:/nobody/asked"));
    assert_eq!(fwd.metrics().drops_unsolicited.value(), 1);
    assert_eq!(fwd.metrics().cs_size.value(), 0);
}

#[test]
fn no_route_returns_interest_to_local_caller() {
    let mut fwd = forwarder(10);
    let (local_app, app_ops) = add_conn(&mut fwd, 1, true);

    fwd.receive(local_app, interest("lci:/nowhere"));
    let sent = app_ops.sent();
    assert_eq!(sent.len(), 1);
    let ret = Message::from_wire(sent[0].clone(), local_app, 0).unwrap();
    assert_eq!(ret.packet_type(), PacketType::InterestReturn);
    assert_eq!(ret.return_code(), Some(ReturnCode::NoRoute));
    assert_eq!(fwd.metrics().drops_no_route.value(), 1);
    assert_eq!(fwd.metrics().pit_size.value(), 0, "no stranded entry");
}

#[test]
fn no_route_is_silent_for_remote_caller() {
    let mut fwd = forwarder(10);
    let (remote, remote_ops) = add_conn(&mut fwd, 1, false);
    fwd.receive(remote, interest("lci:/nowhere"));
    assert!(remote_ops.sent().is_empty());
    assert_eq!(fwd.metrics().drops_no_route.value(), 1);
}

#[test]
fn zero_hop_limit_dropped_from_remote_accepted_from_local() {
    let mut fwd = forwarder(10);
    let (remote, _) = add_conn(&mut fwd, 1, false);
    let (local_app, _) = add_conn(&mut fwd, 2, true);
    let (producer, producer_ops) = add_conn(&mut fwd, 7, true);
    fwd.add_route(Name::from_uri("lci:/a").unwrap(), producer, 1, None)
        .unwrap();

    let exhausted = InterestBuilder::new(Name::from_uri("lci:/a/b").unwrap())
        .hop_limit(0)
        .build();
    fwd.receive(remote, exhausted.clone());
    assert_eq!(fwd.metrics().drops_hop_limit.value(), 1);
    assert!(producer_ops.sent().is_empty());

    // From a local application the same packet may still reach a local
    // producer.
    fwd.receive(local_app, exhausted);
    assert_eq!(producer_ops.sent().len(), 1);
}

#[test]
fn exhausted_hop_limit_skips_remote_nexthops() {
    let mut fwd = forwarder(10);
    let (local_app, _) = add_conn(&mut fwd, 1, true);
    let (remote_producer, remote_ops) = add_conn(&mut fwd, 7, false);
    fwd.add_route(Name::from_uri("lci:/a").unwrap(), remote_producer, 1, None)
        .unwrap();

    // Hop limit 1 decrements to 0 on egress: a remote next hop is off
    // limits.
    let wire = InterestBuilder::new(Name::from_uri("lci:/a/b").unwrap())
        .hop_limit(1)
        .build();
    fwd.receive(local_app, wire);
    assert!(remote_ops.sent().is_empty());
    assert_eq!(fwd.metrics().drops_hop_limit.value(), 1);
}

#[test]
fn pit_expiry_notifies_strategy_once() {
    let mut fwd = forwarder(10);
    let (conn1, _) = add_conn(&mut fwd, 1, false);
    let (producer, _) = add_conn(&mut fwd, 7, false);
    let prefix = Name::from_uri("lci:/a").unwrap();
    fwd.add_route(prefix.clone(), producer, 1, Some(StrategyKind::Loadbalancer))
        .unwrap();

    fwd.receive(conn1, interest_with_lifetime("lci:/a/b", 100));
    assert_eq!(pending_on(&mut fwd, &prefix, producer), 1);

    // 200 ms later the sweep discards the entry and settles the strategy.
    fwd.clock_mut().advance(200);
    fwd.sweep_pit();
    assert_eq!(fwd.metrics().pit_size.value(), 0);
    assert_eq!(pending_on(&mut fwd, &prefix, producer), 0);

    // A second sweep must not settle again.
    fwd.sweep_pit();
    assert_eq!(pending_on(&mut fwd, &prefix, producer), 0);
}

#[test]
fn interest_return_settles_pit_and_strategy() {
    let mut fwd = forwarder(10);
    let (conn1, _) = add_conn(&mut fwd, 1, false);
    let (producer, producer_ops) = add_conn(&mut fwd, 7, false);
    let prefix = Name::from_uri("lci:/a").unwrap();
    fwd.add_route(prefix.clone(), producer, 1, Some(StrategyKind::Loadbalancer))
        .unwrap();

    fwd.receive(conn1, interest("lci:/a/b"));
    let forwarded = producer_ops.sent()[0].clone();

    // The producer bounces the interest back.
    let bounced = {
        let msg = Message::from_wire(forwarded, producer, 0).unwrap();
        rust_ccnfwd_common::builder::interest_return(&msg, ReturnCode::NoResources)
    };
    fwd.receive(producer, bounced);
    assert_eq!(fwd.metrics().returns_received.value(), 1);
    assert_eq!(fwd.metrics().pit_size.value(), 0);
    assert_eq!(pending_on(&mut fwd, &prefix, producer), 0);
}

#[test]
fn closing_connection_cascades_into_fib_and_pit() {
    let mut fwd = forwarder(10);
    let (conn1, _) = add_conn(&mut fwd, 1, false);
    let (producer, _) = add_conn(&mut fwd, 7, false);
    fwd.add_route(Name::from_uri("lci:/a").unwrap(), producer, 1, None)
        .unwrap();

    fwd.receive(conn1, interest("lci:/a/b"));
    assert_eq!(fwd.metrics().pit_size.value(), 1);

    fwd.remove_connection(producer);
    fwd.deliver_missives();
    assert_eq!(fwd.metrics().fib_size.value(), 0, "route cascaded away");

    // The requester is still waiting; its entry stays until it expires.
    assert_eq!(fwd.metrics().pit_size.value(), 1);

    // Now the requester leaves too: the entry loses its last ingress.
    fwd.remove_connection(conn1);
    fwd.deliver_missives();
    assert_eq!(fwd.metrics().pit_size.value(), 0);
}

#[test]
fn route_to_unknown_connection_is_rejected() {
    let mut fwd = forwarder(10);
    let err = fwd
        .add_route(Name::from_uri("lci:/a").unwrap(), ConnectionId(99), 1, None)
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidRoute(_)));
}

#[test]
fn control_packets_reach_the_sink() {
    #[derive(Default)]
    struct CountingSink(Arc<AtomicU64>);
    impl ControlSink for CountingSink {
        fn handle_control(&mut self, _msg: &Message) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    let mut fwd = forwarder(10);
    let counter = Arc::new(AtomicU64::new(0));
    fwd.set_control_sink(Box::new(CountingSink(Arc::clone(&counter))));
    let (conn1, _) = add_conn(&mut fwd, 1, true);

    fwd.receive(conn1, rust_ccnfwd_common::builder::probe_packet());
    assert_eq!(counter.load(Ordering::Relaxed), 1);
    assert_eq!(fwd.metrics().control_received.value(), 1);
}

#[test]
fn failed_verification_drops_interest() {
    struct RejectAll;
    impl SignatureVerifier for RejectAll {
        fn verify(&self, _msg: &Message) -> bool {
            false
        }
    }

    let mut fwd = forwarder(10);
    fwd.set_verifier(Box::new(RejectAll));
    let (conn1, _) = add_conn(&mut fwd, 1, false);
    let (producer, producer_ops) = add_conn(&mut fwd, 7, false);
    fwd.add_route(Name::from_uri("lci:/a").unwrap(), producer, 1, None)
        .unwrap();

    fwd.receive(conn1, interest("lci:/a/b"));
    assert!(producer_ops.sent().is_empty());
    assert_eq!(fwd.metrics().drops_signature.value(), 1);
}

#[test]
fn parse_failure_is_counted_and_contained() {
    let mut fwd = forwarder(10);
    let (conn1, _) = add_conn(&mut fwd, 1, false);
    fwd.receive(conn1, Bytes::from_static(&[0xFF, 0x00, 0x00]));
    assert_eq!(fwd.metrics().drops_parse.value(), 1);
}

#[test]
fn subscribers_see_connection_lifecycle() {
    use crate::messenger::MissiveKind;

    let mut fwd = forwarder(4);
    let mut missives = fwd.subscribe_missives();
    let (conn1, _) = add_conn(&mut fwd, 1, false);

    assert_eq!(missives.try_recv().unwrap().kind, MissiveKind::ConnectionCreate);
    assert_eq!(missives.try_recv().unwrap().kind, MissiveKind::ConnectionUp);

    fwd.remove_connection(conn1);
    fwd.deliver_missives();
    let closed = missives.try_recv().unwrap();
    assert_eq!(closed.kind, MissiveKind::ConnectionClosed);
    assert_eq!(closed.conn_id, conn1);
}

/// Pending count of the load-balancer strategy at `prefix` for `conn_id`.
fn pending_on(fwd: &mut Forwarder, prefix: &Name, conn_id: ConnectionId) -> u64 {
    match fwd.fib_mut().get_mut(prefix).unwrap().strategy() {
        crate::strategy::Strategy::LoadBalancer(lb) => lb.pending(conn_id).unwrap(),
        other => panic!("unexpected strategy {other:?}"),
    }
}
