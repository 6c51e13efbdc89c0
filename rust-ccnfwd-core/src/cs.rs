//! The Content Store: a bounded LRU cache of content objects.
//!
//! Primary storage is keyed by object hash; auxiliary indices by name and
//! by (name, keyid) serve Interests that restrict less precisely. The
//! three tables always agree: an entry is reachable through its auxiliary
//! keys exactly while it lives in the primary table.

use bytes::Bytes;
use rust_ccnfwd_common::message::{Message, ObjectHash};
use rust_ccnfwd_common::name::Name;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug)]
struct StoreEntry {
    message: Message,
    expiry_ms: Option<u64>,
    lru_token: u64,
}

/// Counters a single store operation produced, folded into the forwarder
/// metrics by the caller.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct StoreOutcome {
    pub stored: bool,
    pub evictions: u64,
}

#[derive(Debug, Default)]
pub struct ContentStore {
    capacity: usize,
    by_hash: HashMap<ObjectHash, StoreEntry>,
    by_name: HashMap<Name, ObjectHash>,
    by_name_keyid: HashMap<(Name, Bytes), ObjectHash>,
    // LRU order: smallest token is the coldest entry.
    lru: BTreeMap<u64, ObjectHash>,
    access_counter: u64,
}

impl ContentStore {
    /// Capacity is an object count; 0 disables the store entirely.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn size(&self) -> usize {
        self.by_hash.len()
    }

    /// Insert a content object.
    ///
    /// Returns `stored: false` when the store is disabled, the object lacks
    /// a hash, or an object with this hash is already present. A same-name
    /// object replaces its predecessor so every index keeps pointing at a
    /// live entry.
    pub fn insert(&mut self, message: Message, now_epoch_ms: u64) -> StoreOutcome {
        let mut outcome = StoreOutcome::default();
        if self.capacity == 0 {
            return outcome;
        }
        let Some(&hash) = message.object_hash() else {
            return outcome;
        };
        if self.by_hash.contains_key(&hash) {
            return outcome;
        }
        let expiry_ms = message.expiry_time_ms();
        if expiry_ms.is_some_and(|expiry| expiry <= now_epoch_ms) {
            // Already stale; there is nothing to serve from it.
            return outcome;
        }

        let name = message.name().cloned();
        let keyid = message.keyid().map(Bytes::copy_from_slice);

        if let Some(name) = &name {
            if let Some(&old) = self.by_name.get(name) {
                self.evict(old);
                outcome.evictions += 1;
            }
            if let Some(keyid) = &keyid {
                if let Some(&old) = self.by_name_keyid.get(&(name.clone(), keyid.clone())) {
                    self.evict(old);
                    outcome.evictions += 1;
                }
            }
        }

        while self.by_hash.len() >= self.capacity {
            let Some((_, coldest)) = self.lru.pop_first() else {
                break;
            };
            self.remove_indices(coldest);
            outcome.evictions += 1;
        }

        self.access_counter += 1;
        let token = self.access_counter;
        if let Some(name) = name.clone() {
            self.by_name.insert(name, hash);
        }
        if let (Some(name), Some(keyid)) = (name, keyid) {
            self.by_name_keyid.insert((name, keyid), hash);
        }
        self.lru.insert(token, hash);
        self.by_hash.insert(
            hash,
            StoreEntry {
                message,
                expiry_ms,
                lru_token: token,
            },
        );
        outcome.stored = true;
        outcome
    }

    /// Match an Interest against the store.
    ///
    /// The most-specific index consistent with the Interest's restrictions
    /// is consulted; at most one object comes back. A hit is promoted to
    /// most-recently-used. A stale entry (expiry time passed) is a miss and
    /// is evicted on the spot.
    pub fn lookup(&mut self, interest: &Message, now_epoch_ms: u64) -> Option<Message> {
        if self.capacity == 0 {
            return None;
        }
        let name = interest.name()?;

        let hash = if let Some(digest) = interest.hash_restriction() {
            let hash = ObjectHash(digest.try_into().ok()?);
            // A hash restriction still binds the name when the cached
            // object carries one.
            let entry = self.by_hash.get(&hash)?;
            if entry.message.name().is_some_and(|n| n != name) {
                return None;
            }
            hash
        } else if let Some(keyid) = interest.keyid_restriction() {
            *self
                .by_name_keyid
                .get(&(name.clone(), Bytes::copy_from_slice(keyid)))?
        } else {
            *self.by_name.get(name)?
        };

        let entry = self.by_hash.get(&hash)?;
        if entry
            .expiry_ms
            .is_some_and(|expiry| expiry <= now_epoch_ms)
        {
            self.evict(hash);
            return None;
        }

        self.promote(hash);
        Some(self.by_hash[&hash].message.clone())
    }

    /// Resize the store; shrinking evicts from the cold end.
    pub fn set_capacity(&mut self, capacity: usize) -> u64 {
        self.capacity = capacity;
        let mut evicted = 0;
        while self.by_hash.len() > capacity {
            let Some((_, coldest)) = self.lru.pop_first() else {
                break;
            };
            self.remove_indices(coldest);
            evicted += 1;
        }
        evicted
    }

    fn promote(&mut self, hash: ObjectHash) {
        self.access_counter += 1;
        let token = self.access_counter;
        if let Some(entry) = self.by_hash.get_mut(&hash) {
            self.lru.remove(&entry.lru_token);
            entry.lru_token = token;
            self.lru.insert(token, hash);
        }
    }

    fn evict(&mut self, hash: ObjectHash) {
        if let Some(entry) = self.by_hash.get(&hash) {
            self.lru.remove(&entry.lru_token);
        }
        self.remove_indices(hash);
    }

    /// Remove an entry from the primary and auxiliary tables. The LRU map
    /// must already have been updated by the caller.
    fn remove_indices(&mut self, hash: ObjectHash) {
        let Some(entry) = self.by_hash.remove(&hash) else {
            return;
        };
        if let Some(name) = entry.message.name() {
            if self.by_name.get(name) == Some(&hash) {
                self.by_name.remove(name);
            }
            if let Some(keyid) = entry.message.keyid() {
                let key = (name.clone(), Bytes::copy_from_slice(keyid));
                if self.by_name_keyid.get(&key) == Some(&hash) {
                    self.by_name_keyid.remove(&key);
                }
            }
        }
    }

    /// Index-consistency check used by tests: every auxiliary key points at
    /// a live primary entry and every LRU token is live.
    #[cfg(test)]
    pub(crate) fn check_consistency(&self) -> bool {
        self.lru.len() == self.by_hash.len()
            && self
                .lru
                .iter()
                .all(|(token, hash)| {
                    self.by_hash
                        .get(hash)
                        .is_some_and(|e| e.lru_token == *token)
                })
            && self.by_name.values().all(|h| self.by_hash.contains_key(h))
            && self
                .by_name_keyid
                .values()
                .all(|h| self.by_hash.contains_key(h))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_ccnfwd_common::builder::{ContentObjectBuilder, InterestBuilder};
    use rust_ccnfwd_common::types::ConnectionId;

    const NOW: u64 = 1_000_000;

    fn object(uri: &str) -> Message {
        let wire = ContentObjectBuilder::new(
            Name::from_uri(uri).unwrap(),
            format!("payload for {uri}").into_bytes(),
        )
        .build();
        Message::from_wire(wire, ConnectionId(7), 0).unwrap()
    }

    fn object_with_expiry(uri: &str, expiry_ms: u64) -> Message {
        let wire = ContentObjectBuilder::new(
            Name::from_uri(uri).unwrap(),
            b"payload".as_ref(),
        )
        .expiry_time_ms(expiry_ms)
        .build();
        Message::from_wire(wire, ConnectionId(7), 0).unwrap()
    }

    fn interest(uri: &str) -> Message {
        let wire = InterestBuilder::new(Name::from_uri(uri).unwrap()).build();
        Message::from_wire(wire, ConnectionId(1), 0).unwrap()
    }

    #[test]
    fn fresh_insert_then_match_returns_object() {
        let mut cs = ContentStore::new(10);
        let obj = object("lci:/a/b");
        assert!(cs.insert(obj.clone(), NOW).stored);
        let hit = cs.lookup(&interest("lci:/a/b"), NOW).unwrap();
        assert_eq!(hit.bytes(), obj.bytes());
        assert!(cs.check_consistency());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut cs = ContentStore::new(10);
        let obj = object("lci:/a");
        assert!(cs.insert(obj.clone(), NOW).stored);
        assert!(!cs.insert(obj, NOW).stored);
        assert_eq!(cs.size(), 1);
    }

    #[test]
    fn capacity_zero_disables_store() {
        let mut cs = ContentStore::new(0);
        assert!(!cs.insert(object("lci:/a"), NOW).stored);
        assert!(cs.lookup(&interest("lci:/a"), NOW).is_none());
        assert_eq!(cs.size(), 0);
    }

    #[test]
    fn eviction_removes_coldest_entry() {
        let mut cs = ContentStore::new(2);
        cs.insert(object("lci:/a"), NOW);
        cs.insert(object("lci:/b"), NOW);
        // Touch /a so /b becomes the LRU tail.
        cs.lookup(&interest("lci:/a"), NOW).unwrap();

        let outcome = cs.insert(object("lci:/c"), NOW);
        assert!(outcome.stored);
        assert_eq!(outcome.evictions, 1);
        assert_eq!(cs.size(), 2);
        assert!(cs.lookup(&interest("lci:/b"), NOW).is_none());
        assert!(cs.lookup(&interest("lci:/a"), NOW).is_some());
        assert!(cs.check_consistency());
    }

    #[test]
    fn hash_restriction_matches_exact_object() {
        let mut cs = ContentStore::new(10);
        let obj = object("lci:/a");
        let hash = obj.object_hash().unwrap().0;
        cs.insert(obj, NOW);
        cs.insert(object("lci:/b"), NOW);

        let wire = InterestBuilder::new(Name::from_uri("lci:/a").unwrap())
            .hash_restriction(hash.to_vec())
            .build();
        let restricted = Message::from_wire(wire, ConnectionId(1), 0).unwrap();
        assert!(cs.lookup(&restricted, NOW).is_some());

        // The same restriction under the wrong name misses.
        let wire = InterestBuilder::new(Name::from_uri("lci:/other").unwrap())
            .hash_restriction(hash.to_vec())
            .build();
        let mismatched = Message::from_wire(wire, ConnectionId(1), 0).unwrap();
        assert!(cs.lookup(&mismatched, NOW).is_none());
    }

    #[test]
    fn keyid_restriction_uses_keyid_index() {
        let mut cs = ContentStore::new(10);
        let name = Name::from_uri("lci:/signed").unwrap();
        let wire = ContentObjectBuilder::new(name.clone(), b"payload".as_ref())
            .keyid(vec![0x77; 32])
            .build();
        cs.insert(Message::from_wire(wire, ConnectionId(7), 0).unwrap(), NOW);

        let hit = InterestBuilder::new(name.clone())
            .keyid_restriction(vec![0x77; 32])
            .build();
        assert!(cs
            .lookup(&Message::from_wire(hit, ConnectionId(1), 0).unwrap(), NOW)
            .is_some());

        let miss = InterestBuilder::new(name)
            .keyid_restriction(vec![0x78; 32])
            .build();
        assert!(cs
            .lookup(&Message::from_wire(miss, ConnectionId(1), 0).unwrap(), NOW)
            .is_none());
        assert!(cs.check_consistency());
    }

    #[test]
    fn already_stale_object_is_not_stored() {
        let mut cs = ContentStore::new(10);
        assert!(!cs.insert(object_with_expiry("lci:/a", NOW - 1), NOW).stored);
        assert_eq!(cs.size(), 0);
    }

    #[test]
    fn stale_entry_is_a_miss_and_gets_evicted() {
        let mut cs = ContentStore::new(10);
        cs.insert(object_with_expiry("lci:/a", NOW + 100), NOW);
        assert!(cs.lookup(&interest("lci:/a"), NOW).is_some());
        assert!(cs.lookup(&interest("lci:/a"), NOW + 100).is_none());
        assert_eq!(cs.size(), 0);
        assert!(cs.check_consistency());
    }

    #[test]
    fn same_name_insert_replaces_predecessor() {
        let mut cs = ContentStore::new(10);
        let name = Name::from_uri("lci:/a").unwrap();
        let old = ContentObjectBuilder::new(name.clone(), b"old".as_ref()).build();
        let new = ContentObjectBuilder::new(name, b"new".as_ref()).build();
        cs.insert(Message::from_wire(old, ConnectionId(7), 0).unwrap(), NOW);
        let outcome = cs.insert(Message::from_wire(new, ConnectionId(7), 0).unwrap(), NOW);
        assert!(outcome.stored);
        assert_eq!(outcome.evictions, 1);
        assert_eq!(cs.size(), 1);
        let hit = cs.lookup(&interest("lci:/a"), NOW).unwrap();
        assert_eq!(hit.payload().unwrap(), b"new");
        assert!(cs.check_consistency());
    }

    #[test]
    fn shrinking_capacity_evicts_cold_entries() {
        let mut cs = ContentStore::new(4);
        for uri in ["lci:/a", "lci:/b", "lci:/c", "lci:/d"] {
            cs.insert(object(uri), NOW);
        }
        cs.lookup(&interest("lci:/a"), NOW).unwrap();

        let evicted = cs.set_capacity(2);
        assert_eq!(evicted, 2);
        assert_eq!(cs.size(), 2);
        assert!(cs.lookup(&interest("lci:/a"), NOW).is_some());
        assert!(cs.lookup(&interest("lci:/b"), NOW).is_none());
        assert!(cs.check_consistency());
    }

    #[test]
    fn match_promotes_to_mru() {
        let mut cs = ContentStore::new(2);
        cs.insert(object("lci:/a"), NOW);
        cs.insert(object("lci:/b"), NOW);
        cs.lookup(&interest("lci:/a"), NOW).unwrap();
        cs.insert(object("lci:/c"), NOW);
        // /b was the tail after /a's promotion.
        assert!(cs.lookup(&interest("lci:/a"), NOW).is_some());
        assert!(cs.lookup(&interest("lci:/b"), NOW).is_none());
        assert!(cs.lookup(&interest("lci:/c"), NOW).is_some());
    }
}
