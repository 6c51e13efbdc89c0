//! Forwarding strategies: per-FIB-entry next-hop selection.
//!
//! A strategy owns the mutable selection state for one FIB entry. The
//! processor calls `lookup_nexthop` once per forwarded Interest and feeds
//! back content-object arrivals (with measured RTT) and timeouts.

use rust_ccnfwd_common::message::Message;
use rust_ccnfwd_common::types::{ConnectionId, Ticks};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

mod load_balancer;
mod load_balancer_delay;
mod random;
mod random_per_segment;

pub use load_balancer::LoadBalancer;
pub use load_balancer_delay::{LoadBalancerWithDelay, PROBE_FREQUENCY};
pub use random::Random;
pub use random_per_segment::RandomPerSegment;

pub const FWD_STRATEGY_LOADBALANCER: &str = "loadbalancer";
pub const FWD_STRATEGY_RANDOM: &str = "random";
pub const FWD_STRATEGY_RANDOM_PER_DASH_SEGMENT: &str = "random-per-dash-segment";
pub const FWD_STRATEGY_LOADBALANCER_WITH_DELAY: &str = "loadbalancer-with-delay";

/// The recognized strategy names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyKind {
    Loadbalancer,
    #[default]
    Random,
    RandomPerDashSegment,
    LoadbalancerWithDelay,
}

impl StrategyKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Loadbalancer => FWD_STRATEGY_LOADBALANCER,
            Self::Random => FWD_STRATEGY_RANDOM,
            Self::RandomPerDashSegment => FWD_STRATEGY_RANDOM_PER_DASH_SEGMENT,
            Self::LoadbalancerWithDelay => FWD_STRATEGY_LOADBALANCER_WITH_DELAY,
        }
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            FWD_STRATEGY_LOADBALANCER => Ok(Self::Loadbalancer),
            FWD_STRATEGY_RANDOM => Ok(Self::Random),
            FWD_STRATEGY_RANDOM_PER_DASH_SEGMENT => Ok(Self::RandomPerDashSegment),
            FWD_STRATEGY_LOADBALANCER_WITH_DELAY => Ok(Self::LoadbalancerWithDelay),
            other => Err(format!("unknown strategy {other:?}")),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One strategy instance, dispatched by kind.
pub enum Strategy {
    Random(Random),
    LoadBalancer(LoadBalancer),
    RandomPerSegment(RandomPerSegment),
    LoadBalancerWithDelay(LoadBalancerWithDelay),
}

impl Strategy {
    pub fn new(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::Random => Self::Random(Random::new()),
            StrategyKind::Loadbalancer => Self::LoadBalancer(LoadBalancer::new()),
            StrategyKind::RandomPerDashSegment => Self::RandomPerSegment(RandomPerSegment::new()),
            StrategyKind::LoadbalancerWithDelay => {
                Self::LoadBalancerWithDelay(LoadBalancerWithDelay::new())
            }
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Random(_) => StrategyKind::Random,
            Self::LoadBalancer(_) => StrategyKind::Loadbalancer,
            Self::RandomPerSegment(_) => StrategyKind::RandomPerDashSegment,
            Self::LoadBalancerWithDelay(_) => StrategyKind::LoadbalancerWithDelay,
        }
    }

    /// Select the egress subset for one Interest. Always a subset of the
    /// next hops registered on this entry.
    pub fn lookup_nexthop(&mut self, msg: &Message) -> Vec<ConnectionId> {
        match self {
            Self::Random(s) => s.lookup_nexthop(),
            Self::LoadBalancer(s) => s.lookup_nexthop(),
            Self::RandomPerSegment(s) => s.lookup_nexthop(msg),
            Self::LoadBalancerWithDelay(s) => s.lookup_nexthop(),
        }
    }

    /// A matching content object came back on `egress` after `rtt_ticks`.
    pub fn on_content_object(
        &mut self,
        egress: &HashSet<ConnectionId>,
        _msg: &Message,
        rtt_ticks: Ticks,
    ) {
        match self {
            Self::Random(_) | Self::RandomPerSegment(_) => {}
            Self::LoadBalancer(s) => s.on_content_object(egress),
            Self::LoadBalancerWithDelay(s) => s.on_content_object(egress, rtt_ticks),
        }
    }

    /// The PIT entry that used `egress` expired unanswered.
    pub fn on_timeout(&mut self, egress: &HashSet<ConnectionId>) {
        match self {
            Self::Random(_) | Self::RandomPerSegment(_) => {}
            Self::LoadBalancer(s) => s.on_timeout(egress),
            Self::LoadBalancerWithDelay(s) => s.on_timeout(egress),
        }
    }

    pub fn add_nexthop(&mut self, conn_id: ConnectionId, cost: u32) {
        match self {
            Self::Random(s) => s.add_nexthop(conn_id),
            Self::LoadBalancer(s) => s.add_nexthop(conn_id),
            Self::RandomPerSegment(s) => s.add_nexthop(conn_id),
            Self::LoadBalancerWithDelay(s) => s.add_nexthop(conn_id),
        }
        let _ = cost;
    }

    pub fn remove_nexthop(&mut self, conn_id: ConnectionId) {
        match self {
            Self::Random(s) => s.remove_nexthop(conn_id),
            Self::LoadBalancer(s) => s.remove_nexthop(conn_id),
            Self::RandomPerSegment(s) => s.remove_nexthop(conn_id),
            Self::LoadBalancerWithDelay(s) => s.remove_nexthop(conn_id),
        }
    }

    pub fn nexthops(&self) -> Vec<ConnectionId> {
        match self {
            Self::Random(s) => s.nexthops().to_vec(),
            Self::LoadBalancer(s) => s.nexthops(),
            Self::RandomPerSegment(s) => s.nexthops().to_vec(),
            Self::LoadBalancerWithDelay(s) => s.nexthops(),
        }
    }

    pub fn nexthop_count(&self) -> usize {
        self.nexthops().len()
    }

    /// True when the strategy wants a probe emitted on each next hop.
    /// Cleared by the call.
    pub fn take_probe_request(&mut self) -> bool {
        match self {
            Self::LoadBalancerWithDelay(s) => s.take_probe_request(),
            _ => false,
        }
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Strategy({})", self.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_ccnfwd_common::builder::InterestBuilder;
    use rust_ccnfwd_common::name::Name;

    fn interest(uri: &str) -> Message {
        let wire = InterestBuilder::new(Name::from_uri(uri).unwrap()).build();
        Message::from_wire(wire, ConnectionId(1), 0).unwrap()
    }

    #[test]
    fn names_round_trip() {
        for kind in [
            StrategyKind::Random,
            StrategyKind::Loadbalancer,
            StrategyKind::RandomPerDashSegment,
            StrategyKind::LoadbalancerWithDelay,
        ] {
            assert_eq!(kind.name().parse::<StrategyKind>().unwrap(), kind);
        }
        assert!("best-route".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn default_strategy_is_random() {
        assert_eq!(StrategyKind::default(), StrategyKind::Random);
    }

    #[test]
    fn lookup_returns_subset_of_nexthops() {
        let msg = interest("lci:/a/b/c");
        for kind in [
            StrategyKind::Random,
            StrategyKind::Loadbalancer,
            StrategyKind::RandomPerDashSegment,
            StrategyKind::LoadbalancerWithDelay,
        ] {
            let mut strategy = Strategy::new(kind);
            for id in [4, 8, 15] {
                strategy.add_nexthop(ConnectionId(id), 1);
            }
            let registered: HashSet<ConnectionId> = strategy.nexthops().into_iter().collect();
            for _ in 0..64 {
                let egress = strategy.lookup_nexthop(&msg);
                assert!(!egress.is_empty(), "{kind} returned no next hop");
                assert!(egress.iter().all(|id| registered.contains(id)));
            }
        }
    }

    #[test]
    fn empty_entry_yields_no_nexthops() {
        let msg = interest("lci:/a");
        for kind in [StrategyKind::Random, StrategyKind::Loadbalancer] {
            let mut strategy = Strategy::new(kind);
            assert!(strategy.lookup_nexthop(&msg).is_empty());
        }
    }

    #[test]
    fn removed_nexthop_is_never_selected() {
        let msg = interest("lci:/a");
        let mut strategy = Strategy::new(StrategyKind::Random);
        strategy.add_nexthop(ConnectionId(1), 1);
        strategy.add_nexthop(ConnectionId(2), 1);
        strategy.remove_nexthop(ConnectionId(1));
        for _ in 0..32 {
            assert_eq!(strategy.lookup_nexthop(&msg), vec![ConnectionId(2)]);
        }
    }
}
