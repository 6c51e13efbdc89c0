//! Listener bookkeeping.
//!
//! `add_listener` is idempotent on (transport, local address); the set
//! remembers what is already up and owns the abort handles of every
//! listener task so shutdown can cancel them.

use std::collections::HashSet;
use tokio::task::AbortHandle;

#[derive(Debug, Default)]
pub(crate) struct ListenerSet {
    keys: HashSet<String>,
    tasks: Vec<AbortHandle>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn register(&mut self, key: String, tasks: Vec<AbortHandle>) {
        self.keys.insert(key);
        self.tasks.extend(tasks);
    }

    /// Track a connection task that should die with the dispatcher.
    pub fn adopt(&mut self, task: AbortHandle) {
        self.tasks.push(task);
    }

    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}
