//! The Forwarding Information Base: longest-prefix match from name
//! prefixes to next-hop sets and their strategies.

use crate::strategy::{Strategy, StrategyKind};
use rust_ccnfwd_common::name::Name;
use rust_ccnfwd_common::types::ConnectionId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One registered next hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nexthop {
    pub conn_id: ConnectionId,
    pub cost: u32,
}

/// A FIB entry: the prefix, its next hops, and the strategy state that
/// picks among them.
#[derive(Debug)]
pub struct FibEntry {
    prefix: Name,
    nexthops: Vec<Nexthop>,
    strategy: Strategy,
}

impl FibEntry {
    fn new(prefix: Name, kind: StrategyKind) -> Self {
        Self {
            prefix,
            nexthops: Vec::new(),
            strategy: Strategy::new(kind),
        }
    }

    pub fn prefix(&self) -> &Name {
        &self.prefix
    }

    pub fn nexthops(&self) -> &[Nexthop] {
        &self.nexthops
    }

    pub fn strategy(&mut self) -> &mut Strategy {
        &mut self.strategy
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    fn add_nexthop(&mut self, conn_id: ConnectionId, cost: u32) {
        match self.nexthops.iter_mut().find(|n| n.conn_id == conn_id) {
            Some(nexthop) => nexthop.cost = cost,
            None => {
                self.nexthops.push(Nexthop { conn_id, cost });
                self.strategy.add_nexthop(conn_id, cost);
            }
        }
    }

    fn remove_nexthop(&mut self, conn_id: ConnectionId) -> bool {
        let before = self.nexthops.len();
        self.nexthops.retain(|n| n.conn_id != conn_id);
        if self.nexthops.len() != before {
            self.strategy.remove_nexthop(conn_id);
            true
        } else {
            false
        }
    }

    /// Replace the strategy, re-registering the current next hops.
    fn set_strategy(&mut self, kind: StrategyKind) {
        let mut strategy = Strategy::new(kind);
        for nexthop in &self.nexthops {
            strategy.add_nexthop(nexthop.conn_id, nexthop.cost);
        }
        self.strategy = strategy;
    }
}

/// A route row for management snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteInfo {
    pub prefix: String,
    pub nexthops: Vec<Nexthop>,
    pub strategy: String,
}

#[derive(Debug, Default)]
pub struct Fib {
    entries: HashMap<Name, FibEntry>,
}

impl Fib {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a next hop under `prefix`, creating the entry (with `kind`, or
    /// the default strategy) when the prefix is new. Re-adding an existing
    /// next hop updates its cost.
    pub fn add_or_update(
        &mut self,
        prefix: Name,
        conn_id: ConnectionId,
        cost: u32,
        kind: Option<StrategyKind>,
    ) {
        let entry = self
            .entries
            .entry(prefix.clone())
            .or_insert_with(|| FibEntry::new(prefix, kind.unwrap_or_default()));
        entry.add_nexthop(conn_id, cost);
    }

    /// Remove one next hop. Returns true iff the entry emptied and was
    /// deleted.
    pub fn remove(&mut self, prefix: &Name, conn_id: ConnectionId) -> bool {
        let Some(entry) = self.entries.get_mut(prefix) else {
            return false;
        };
        entry.remove_nexthop(conn_id);
        if entry.nexthops.is_empty() {
            self.entries.remove(prefix);
            true
        } else {
            false
        }
    }

    /// Drop a closed connection from every route; entries left without
    /// next hops are deleted.
    pub fn remove_connection_from_all_routes(&mut self, conn_id: ConnectionId) {
        self.entries.retain(|_, entry| {
            entry.remove_nexthop(conn_id);
            !entry.nexthops.is_empty()
        });
    }

    /// Longest-prefix match: walk prefix lengths from the full name down to
    /// the default route, returning the first registered entry with a
    /// non-empty next-hop set.
    pub fn lookup(&mut self, name: &Name) -> Option<&mut FibEntry> {
        let mut found = None;
        for k in (0..=name.segment_count()).rev() {
            if let Some(entry) = self.entries.get(&name.prefix(k)) {
                if !entry.nexthops.is_empty() {
                    found = Some(name.prefix(k));
                    break;
                }
            }
        }
        self.entries.get_mut(&found?)
    }

    /// The entry registered at exactly `prefix`.
    pub fn get_mut(&mut self, prefix: &Name) -> Option<&mut FibEntry> {
        self.entries.get_mut(prefix)
    }

    /// Replace the strategy on the entry at `prefix`.
    pub fn set_strategy(&mut self, prefix: &Name, kind: StrategyKind) -> bool {
        match self.entries.get_mut(prefix) {
            Some(entry) => {
                entry.set_strategy(kind);
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Vec<RouteInfo> {
        let mut routes: Vec<RouteInfo> = self
            .entries
            .values()
            .map(|entry| RouteInfo {
                prefix: entry.prefix.to_string(),
                nexthops: entry.nexthops.clone(),
                strategy: entry.strategy_kind().name().to_string(),
            })
            .collect();
        routes.sort_by(|a, b| a.prefix.cmp(&b.prefix));
        routes
    }

    #[cfg(test)]
    pub(crate) fn nexthop_connections(&self) -> Vec<ConnectionId> {
        self.entries
            .values()
            .flat_map(|e| e.nexthops.iter().map(|n| n.conn_id))
            .collect()
    }
}
