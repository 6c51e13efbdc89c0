//! Pending-weighted load balancing.
//!
//! Each next hop is weighted by `1 / (pending + 1)^2`, where `pending`
//! counts the Interests forwarded to it that have not yet been answered or
//! timed out. Sampling is proportional to weight, so lightly loaded paths
//! attract new Interests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_ccnfwd_common::types::ConnectionId;
use std::collections::HashSet;

pub struct LoadBalancer {
    state: Vec<(ConnectionId, u64)>,
    rng: StdRng,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self {
            state: Vec::new(),
            rng: StdRng::from_entropy(),
        }
    }

    fn weight(pending: u64) -> f64 {
        let loaded = (pending + 1) as f64;
        1.0 / (loaded * loaded)
    }

    pub fn lookup_nexthop(&mut self) -> Vec<ConnectionId> {
        if self.state.is_empty() {
            return Vec::new();
        }
        let total: f64 = self.state.iter().map(|&(_, p)| Self::weight(p)).sum();
        let mut remaining = self.rng.gen::<f64>() * total;
        let mut chosen = self.state.len() - 1;
        for (i, &(_, pending)) in self.state.iter().enumerate() {
            remaining -= Self::weight(pending);
            if remaining <= 0.0 {
                chosen = i;
                break;
            }
        }
        self.state[chosen].1 += 1;
        vec![self.state[chosen].0]
    }

    pub fn on_content_object(&mut self, egress: &HashSet<ConnectionId>) {
        self.settle(egress);
    }

    pub fn on_timeout(&mut self, egress: &HashSet<ConnectionId>) {
        self.settle(egress);
    }

    fn settle(&mut self, egress: &HashSet<ConnectionId>) {
        for (conn_id, pending) in &mut self.state {
            if egress.contains(conn_id) {
                *pending = pending.saturating_sub(1);
            }
        }
    }

    pub fn add_nexthop(&mut self, conn_id: ConnectionId) {
        if !self.state.iter().any(|&(id, _)| id == conn_id) {
            self.state.push((conn_id, 0));
        }
    }

    pub fn remove_nexthop(&mut self, conn_id: ConnectionId) {
        self.state.retain(|&(id, _)| id != conn_id);
    }

    pub fn nexthops(&self) -> Vec<ConnectionId> {
        self.state.iter().map(|&(id, _)| id).collect()
    }

    pub fn pending(&self, conn_id: ConnectionId) -> Option<u64> {
        self.state
            .iter()
            .find(|&&(id, _)| id == conn_id)
            .map(|&(_, p)| p)
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_rises_on_lookup_and_settles_on_answer() {
        let mut strategy = LoadBalancer::new();
        strategy.add_nexthop(ConnectionId(1));
        let egress = strategy.lookup_nexthop();
        assert_eq!(egress, vec![ConnectionId(1)]);
        assert_eq!(strategy.pending(ConnectionId(1)), Some(1));

        strategy.on_content_object(&egress.into_iter().collect());
        assert_eq!(strategy.pending(ConnectionId(1)), Some(0));
    }

    #[test]
    fn timeout_settles_pending() {
        let mut strategy = LoadBalancer::new();
        strategy.add_nexthop(ConnectionId(1));
        strategy.lookup_nexthop();
        strategy.on_timeout(&HashSet::from([ConnectionId(1)]));
        assert_eq!(strategy.pending(ConnectionId(1)), Some(0));
    }

    #[test]
    fn settle_never_underflows() {
        let mut strategy = LoadBalancer::new();
        strategy.add_nexthop(ConnectionId(1));
        strategy.on_timeout(&HashSet::from([ConnectionId(1)]));
        assert_eq!(strategy.pending(ConnectionId(1)), Some(0));
    }

    #[test]
    fn load_shifts_away_from_busy_nexthop() {
        let mut strategy = LoadBalancer::new();
        strategy.add_nexthop(ConnectionId(1));
        strategy.add_nexthop(ConnectionId(2));
        // Pile pending load onto conn 1 without settling.
        for _ in 0..64 {
            strategy.lookup_nexthop();
        }
        let one = strategy.pending(ConnectionId(1)).unwrap();
        let two = strategy.pending(ConnectionId(2)).unwrap();
        assert_eq!(one + two, 64);
        // The split cannot be grossly lopsided given the quadratic penalty.
        assert!(one >= 16 && two >= 16, "unbalanced split {one}/{two}");
    }
}
