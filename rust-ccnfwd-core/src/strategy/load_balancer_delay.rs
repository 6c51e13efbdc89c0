//! Load balancing weighted by pending Interests and path delay.
//!
//! Weight is `1 / (pending + 1)^2 / max(1, delay - min_delay)`: among
//! equally loaded paths, the ones closest to the fastest observed delay
//! win. Delay per next hop is an EWMA of content-object RTTs; every
//! `PROBE_FREQUENCY` forwarded packets the strategy asks for a probe on
//! each next hop so idle paths keep producing measurements.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_ccnfwd_common::types::{ConnectionId, Ticks};
use std::collections::HashSet;

/// Forwarded packets between probe rounds.
pub const PROBE_FREQUENCY: u64 = 1024;

const EWMA_OLD: f64 = 0.875;
const EWMA_NEW: f64 = 0.125;

#[derive(Debug, Clone, Copy, Default)]
struct NexthopState {
    pending: u64,
    delay_ms: f64,
}

pub struct LoadBalancerWithDelay {
    state: Vec<(ConnectionId, NexthopState)>,
    min_delay_ms: f64,
    forwarded: u64,
    probe_due: bool,
    rng: StdRng,
}

impl LoadBalancerWithDelay {
    pub fn new() -> Self {
        Self {
            state: Vec::new(),
            min_delay_ms: 0.0,
            forwarded: 0,
            probe_due: false,
            rng: StdRng::from_entropy(),
        }
    }

    fn weight(&self, state: &NexthopState) -> f64 {
        let loaded = (state.pending + 1) as f64;
        let lag = (state.delay_ms - self.min_delay_ms).max(1.0);
        1.0 / (loaded * loaded) / lag
    }

    pub fn lookup_nexthop(&mut self) -> Vec<ConnectionId> {
        if self.state.is_empty() {
            return Vec::new();
        }
        self.forwarded += 1;
        if self.forwarded % PROBE_FREQUENCY == 0 {
            self.probe_due = true;
        }

        let total: f64 = self.state.iter().map(|(_, s)| self.weight(s)).sum();
        let mut remaining = self.rng.gen::<f64>() * total;
        let mut chosen = self.state.len() - 1;
        for (i, (_, state)) in self.state.iter().enumerate() {
            remaining -= self.weight(state);
            if remaining <= 0.0 {
                chosen = i;
                break;
            }
        }
        self.state[chosen].1.pending += 1;
        vec![self.state[chosen].0]
    }

    pub fn on_content_object(&mut self, egress: &HashSet<ConnectionId>, rtt_ticks: Ticks) {
        let rtt = rtt_ticks as f64;
        for (conn_id, state) in &mut self.state {
            if egress.contains(conn_id) {
                state.pending = state.pending.saturating_sub(1);
                state.delay_ms = if state.delay_ms == 0.0 {
                    rtt
                } else {
                    EWMA_OLD * state.delay_ms + EWMA_NEW * rtt
                };
            }
        }
        self.recompute_min_delay();
    }

    pub fn on_timeout(&mut self, egress: &HashSet<ConnectionId>) {
        for (conn_id, state) in &mut self.state {
            if egress.contains(conn_id) {
                state.pending = state.pending.saturating_sub(1);
            }
        }
    }

    fn recompute_min_delay(&mut self) {
        self.min_delay_ms = self
            .state
            .iter()
            .map(|(_, s)| s.delay_ms)
            .filter(|&d| d > 0.0)
            .fold(f64::INFINITY, f64::min);
        if self.min_delay_ms.is_infinite() {
            self.min_delay_ms = 0.0;
        }
    }

    pub fn add_nexthop(&mut self, conn_id: ConnectionId) {
        if !self.state.iter().any(|&(id, _)| id == conn_id) {
            self.state.push((conn_id, NexthopState::default()));
        }
    }

    pub fn remove_nexthop(&mut self, conn_id: ConnectionId) {
        self.state.retain(|&(id, _)| id != conn_id);
        self.recompute_min_delay();
    }

    pub fn nexthops(&self) -> Vec<ConnectionId> {
        self.state.iter().map(|&(id, _)| id).collect()
    }

    /// True once per probe round; cleared by the call.
    pub fn take_probe_request(&mut self) -> bool {
        std::mem::take(&mut self.probe_due)
    }
}

impl Default for LoadBalancerWithDelay {
    fn default() -> Self {
        Self::new()
    }
}
