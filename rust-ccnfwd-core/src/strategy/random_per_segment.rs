//! Random selection, sticky per dash-segment.
//!
//! The dash-segment of a name is its prefix with the final segment dropped
//! (for `/video/seg3/chunk7`, the segment is `/video/seg3`). Interests in
//! the same dash-segment keep flowing to one next hop so a consumer pulling
//! consecutive chunks sees a stable path; a new dash-segment rolls the die
//! again.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rust_ccnfwd_common::message::Message;
use rust_ccnfwd_common::name::Name;
use rust_ccnfwd_common::types::ConnectionId;

pub struct RandomPerSegment {
    nexthops: Vec<ConnectionId>,
    segment: Option<Name>,
    last_used: Option<ConnectionId>,
    rng: StdRng,
}

impl RandomPerSegment {
    pub fn new() -> Self {
        Self {
            nexthops: Vec::new(),
            segment: None,
            last_used: None,
            rng: StdRng::from_entropy(),
        }
    }

    fn dash_segment(name: &Name) -> Name {
        match name.segment_count() {
            0 => name.clone(),
            n => name.prefix(n - 1),
        }
    }

    pub fn lookup_nexthop(&mut self, msg: &Message) -> Vec<ConnectionId> {
        if self.nexthops.is_empty() {
            return Vec::new();
        }
        let segment = match msg.name() {
            Some(name) => Self::dash_segment(name),
            None => return Vec::new(),
        };

        if self.segment.as_ref() == Some(&segment) {
            if let Some(last) = self.last_used {
                if self.nexthops.contains(&last) {
                    return vec![last];
                }
            }
        }

        let chosen = *self
            .nexthops
            .choose(&mut self.rng)
            .expect("nexthops nonempty");
        self.segment = Some(segment);
        self.last_used = Some(chosen);
        vec![chosen]
    }

    pub fn add_nexthop(&mut self, conn_id: ConnectionId) {
        if !self.nexthops.contains(&conn_id) {
            self.nexthops.push(conn_id);
        }
    }

    pub fn remove_nexthop(&mut self, conn_id: ConnectionId) {
        self.nexthops.retain(|&id| id != conn_id);
        if self.last_used == Some(conn_id) {
            self.last_used = None;
        }
    }

    pub fn nexthops(&self) -> &[ConnectionId] {
        &self.nexthops
    }
}

impl Default for RandomPerSegment {
    fn default() -> Self {
        Self::new()
    }
}
