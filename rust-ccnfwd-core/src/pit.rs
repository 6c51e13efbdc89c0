//! The Pending Interest Table.
//!
//! Interests aggregate by name plus whichever restrictions they carry; a
//! returning content object collects every entry it matches and the union
//! of their ingress sets is the reverse path. Entries expire lazily at
//! lookup and eagerly on the periodic sweep.

use bytes::Bytes;
use rust_ccnfwd_common::message::Message;
use rust_ccnfwd_common::name::Name;
use rust_ccnfwd_common::types::{ConnectionId, Ticks};
use std::collections::{HashMap, HashSet};

/// Outcome of receiving an Interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PitVerdict {
    /// A new entry was created; the processor must forward.
    New,
    /// Aggregated into an existing entry; the processor drops.
    Existing,
}

/// An Interest is indexed in exactly the most-specific table consistent
/// with its restrictions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PitKey {
    Name(Name),
    NameKeyId(Name, Bytes),
    NameHash(Name, Bytes),
}

impl PitKey {
    fn for_interest(msg: &Message) -> Option<Self> {
        let name = msg.name()?.clone();
        if let Some(digest) = msg.hash_restriction() {
            Some(Self::NameHash(name, Bytes::copy_from_slice(digest)))
        } else if let Some(digest) = msg.keyid_restriction() {
            Some(Self::NameKeyId(name, Bytes::copy_from_slice(digest)))
        } else {
            Some(Self::Name(name))
        }
    }
}

#[derive(Debug)]
pub struct PitEntry {
    ingress: HashSet<ConnectionId>,
    egress: HashSet<ConnectionId>,
    created: Ticks,
    deadline: Ticks,
    fib_prefix: Option<Name>,
}

impl PitEntry {
    fn new(ingress: ConnectionId, now: Ticks, lifetime_ms: u64) -> Self {
        Self {
            ingress: HashSet::from([ingress]),
            egress: HashSet::new(),
            created: now,
            deadline: now + lifetime_ms,
            fib_prefix: None,
        }
    }

    pub fn ingress(&self) -> &HashSet<ConnectionId> {
        &self.ingress
    }

    pub fn egress(&self) -> &HashSet<ConnectionId> {
        &self.egress
    }

    pub fn deadline(&self) -> Ticks {
        self.deadline
    }
}

/// Notification data for an entry that died without being satisfied.
#[derive(Debug)]
pub struct PitTimeout {
    pub fib_prefix: Option<Name>,
    pub egress: HashSet<ConnectionId>,
}

/// One satisfied entry, as the strategy plane needs to see it.
#[derive(Debug)]
pub struct SatisfiedEntry {
    pub fib_prefix: Option<Name>,
    pub egress: HashSet<ConnectionId>,
    pub created: Ticks,
}

/// Result of matching a content object against the table.
#[derive(Debug, Default)]
pub struct Satisfaction {
    /// Union of the ingress sets of every matched live entry.
    pub ingress: HashSet<ConnectionId>,
    pub satisfied: Vec<SatisfiedEntry>,
    /// Entries that had already expired when the object arrived.
    pub timeouts: Vec<PitTimeout>,
}

#[derive(Debug, Default)]
pub struct Pit {
    entries: HashMap<PitKey, PitEntry>,
}

impl Pit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Receive an Interest: aggregate into a live entry or create one.
    ///
    /// An expired entry found under the same key is discarded (reported as
    /// the second tuple element) and replaced by a fresh entry.
    pub fn receive_interest(
        &mut self,
        msg: &Message,
        now: Ticks,
    ) -> (PitVerdict, Option<PitTimeout>) {
        let Some(key) = PitKey::for_interest(msg) else {
            return (PitVerdict::Existing, None);
        };
        let lifetime = msg.interest_lifetime_ms();
        if let Some(entry) = self.entries.get_mut(&key) {
            if entry.deadline > now {
                entry.ingress.insert(msg.ingress());
                entry.deadline = entry.deadline.max(now + lifetime);
                return (PitVerdict::Existing, None);
            }
        }
        let stale = self
            .entries
            .insert(key, PitEntry::new(msg.ingress(), now, lifetime))
            .map(timeout_of);
        (PitVerdict::New, stale)
    }

    /// Record where an Interest was forwarded and which FIB prefix chose
    /// the next hops.
    pub fn record_forward(&mut self, msg: &Message, fib_prefix: Name, egress: &[ConnectionId]) {
        let Some(key) = PitKey::for_interest(msg) else {
            return;
        };
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.egress.extend(egress.iter().copied());
            entry.fib_prefix = Some(fib_prefix);
        }
    }

    /// Match a content object, removing and reporting every hit.
    ///
    /// Lookup order: (name, object hash), then (name, keyid), then name.
    pub fn satisfy_interest(&mut self, obj: &Message, now: Ticks) -> Satisfaction {
        let mut result = Satisfaction::default();
        let Some(name) = obj.name() else {
            return result;
        };

        let mut keys = Vec::with_capacity(3);
        if let Some(hash) = obj.object_hash() {
            keys.push(PitKey::NameHash(
                name.clone(),
                Bytes::copy_from_slice(&hash.0),
            ));
        }
        if let Some(keyid) = obj.keyid() {
            keys.push(PitKey::NameKeyId(name.clone(), Bytes::copy_from_slice(keyid)));
        }
        keys.push(PitKey::Name(name.clone()));

        for key in keys {
            if let Some(entry) = self.entries.remove(&key) {
                if entry.deadline > now {
                    result.ingress.extend(entry.ingress.iter().copied());
                    result.satisfied.push(SatisfiedEntry {
                        fib_prefix: entry.fib_prefix,
                        egress: entry.egress,
                        created: entry.created,
                    });
                } else {
                    result.timeouts.push(timeout_of(entry));
                }
            }
        }
        result
    }

    /// Unconditionally remove the entry matching this Interest.
    pub fn remove_interest(&mut self, msg: &Message) -> Option<PitTimeout> {
        let key = PitKey::for_interest(msg)?;
        self.entries.remove(&key).map(timeout_of)
    }

    /// Discard every expired entry. Runs on the 1-second timer.
    pub fn sweep(&mut self, now: Ticks) -> Vec<PitTimeout> {
        let mut timeouts = Vec::new();
        self.entries.retain(|_, entry| {
            if entry.deadline > now {
                true
            } else {
                timeouts.push(PitTimeout {
                    fib_prefix: entry.fib_prefix.take(),
                    egress: std::mem::take(&mut entry.egress),
                });
                false
            }
        });
        timeouts
    }

    /// Remove a closed connection from every entry; entries whose ingress
    /// set empties are discarded.
    pub fn remove_connection(&mut self, conn_id: ConnectionId) -> Vec<PitTimeout> {
        let mut timeouts = Vec::new();
        self.entries.retain(|_, entry| {
            entry.ingress.remove(&conn_id);
            entry.egress.remove(&conn_id);
            if entry.ingress.is_empty() {
                timeouts.push(PitTimeout {
                    fib_prefix: entry.fib_prefix.take(),
                    egress: std::mem::take(&mut entry.egress),
                });
                false
            } else {
                true
            }
        });
        timeouts
    }

    /// The live entry for this Interest, if any.
    pub fn get_entry(&self, msg: &Message) -> Option<&PitEntry> {
        let key = PitKey::for_interest(msg)?;
        self.entries.get(&key)
    }
}

fn timeout_of(entry: PitEntry) -> PitTimeout {
    PitTimeout {
        fib_prefix: entry.fib_prefix,
        egress: entry.egress,
    }
}
