//! Uniform random next-hop selection.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rust_ccnfwd_common::types::ConnectionId;

pub struct Random {
    nexthops: Vec<ConnectionId>,
    rng: StdRng,
}

impl Random {
    pub fn new() -> Self {
        Self {
            nexthops: Vec::new(),
            rng: StdRng::from_entropy(),
        }
    }

    pub fn lookup_nexthop(&mut self) -> Vec<ConnectionId> {
        self.nexthops
            .choose(&mut self.rng)
            .copied()
            .into_iter()
            .collect()
    }

    pub fn add_nexthop(&mut self, conn_id: ConnectionId) {
        if !self.nexthops.contains(&conn_id) {
            self.nexthops.push(conn_id);
        }
    }

    pub fn remove_nexthop(&mut self, conn_id: ConnectionId) {
        self.nexthops.retain(|&id| id != conn_id);
    }

    pub fn nexthops(&self) -> &[ConnectionId] {
        &self.nexthops
    }
}

impl Default for Random {
    fn default() -> Self {
        Self::new()
    }
}
