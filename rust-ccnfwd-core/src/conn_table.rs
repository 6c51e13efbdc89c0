//! The connection table: id map plus (local, remote) reverse index.

use crate::connection::{AddressPair, Connection, ConnectionInfo};
use crate::messenger::{Messenger, Missive, MissiveKind};
use rust_ccnfwd_common::types::ConnectionId;
use std::collections::HashMap;

/// Owns every connection in the forwarder. All operations are O(1)
/// expected.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    by_id: HashMap<ConnectionId, Connection>,
    by_addr: HashMap<AddressPair, ConnectionId>,
    next_id: u32,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next connection id. Ids increase monotonically and are
    /// never reused.
    pub fn next_id(&mut self) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Insert a connection. Panics if its id is already present.
    pub fn add(&mut self, connection: Connection) {
        let id = connection.id();
        self.by_addr.insert(connection.address_pair().clone(), id);
        let previous = self.by_id.insert(id, connection);
        assert!(previous.is_none(), "duplicate connection id {id}");
    }

    /// Remove and close a connection, emitting `ConnectionClosed`.
    pub fn remove_by_id(
        &mut self,
        id: ConnectionId,
        messenger: &mut Messenger,
    ) -> Option<Connection> {
        let connection = self.by_id.remove(&id)?;
        self.by_addr.remove(connection.address_pair());
        connection.close();
        messenger.send(Missive::new(MissiveKind::ConnectionClosed, id));
        Some(connection)
    }

    pub fn find_by_id(&self, id: ConnectionId) -> Option<&Connection> {
        self.by_id.get(&id)
    }

    pub fn find_by_address_pair(&self, pair: &AddressPair) -> Option<&Connection> {
        self.by_addr.get(pair).and_then(|id| self.by_id.get(id))
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Summary of every connection, for management callers.
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        let mut rows: Vec<ConnectionInfo> = self.by_id.values().map(Into::into).collect();
        rows.sort_by_key(|row| row.id);
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Address, ConnType, IoOps};
    use rust_ccnfwd_common::message::Message;

    struct NullOps;

    impl IoOps for NullOps {
        fn send(&self, _message: &Message) -> bool {
            true
        }
        fn is_up(&self) -> bool {
            true
        }
        fn close(&self) {}
    }

    fn pair(n: u64) -> AddressPair {
        AddressPair::new(Address::Local(0), Address::Local(n))
    }

    fn connection(table: &mut ConnectionTable, n: u64) -> ConnectionId {
        let id = table.next_id();
        table.add(Connection::new(
            id,
            ConnType::Local,
            pair(n),
            true,
            Box::new(NullOps),
        ));
        id
    }

    #[test]
    fn add_and_find() {
        let mut table = ConnectionTable::new();
        let id = connection(&mut table, 1);
        assert!(table.find_by_id(id).is_some());
        assert_eq!(
            table.find_by_address_pair(&pair(1)).unwrap().id(),
            id
        );
        assert!(table.find_by_address_pair(&pair(2)).is_none());
    }

    #[test]
    fn ids_are_monotonic() {
        let mut table = ConnectionTable::new();
        let a = connection(&mut table, 1);
        let b = connection(&mut table, 2);
        assert!(b > a);
    }

    #[test]
    fn remove_emits_closed_missive() {
        let mut table = ConnectionTable::new();
        let mut messenger = Messenger::new();
        let id = connection(&mut table, 1);
        table.remove_by_id(id, &mut messenger).unwrap();
        assert!(table.find_by_id(id).is_none());
        assert!(table.find_by_address_pair(&pair(1)).is_none());
        let drained = messenger.drain();
        assert_eq!(
            drained,
            vec![Missive::new(MissiveKind::ConnectionClosed, id)]
        );
    }

    #[test]
    #[should_panic(expected = "duplicate connection id")]
    fn duplicate_id_panics() {
        let mut table = ConnectionTable::new();
        let id = connection(&mut table, 1);
        table.add(Connection::new(
            id,
            ConnType::Local,
            pair(2),
            true,
            Box::new(NullOps),
        ));
    }
}
