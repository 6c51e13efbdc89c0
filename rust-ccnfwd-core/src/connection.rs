//! The connection model: a duplex link identified by an integer id.
//!
//! Transport specifics live behind the `IoOps` capability trait; the data
//! plane only ever sees `Connection` values and ids.

use rust_ccnfwd_common::message::Message;
use rust_ccnfwd_common::types::ConnectionId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

/// One endpoint address across the supported transports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Address {
    Inet(SocketAddr),
    Unix(PathBuf),
    Ether([u8; 6]),
    /// In-process endpoint, keyed by an opaque pair id.
    Local(u64),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Inet(addr) => write!(f, "{addr}"),
            Address::Unix(path) => write!(f, "unix:{}", path.display()),
            Address::Ether(mac) => write!(
                f,
                "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
            ),
            Address::Local(id) => write!(f, "local:{id}"),
        }
    }
}

/// The (local, remote) addresses of a connection; the reverse-lookup key of
/// the connection table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressPair {
    pub local: Address,
    pub remote: Address,
}

impl AddressPair {
    pub fn new(local: Address, remote: Address) -> Self {
        Self { local, remote }
    }
}

impl fmt::Display for AddressPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.local, self.remote)
    }
}

/// Transport family of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnType {
    Udp,
    Tcp,
    Unix,
    Ether,
    /// An application inside the forwarder process.
    Local,
}

/// Capabilities a transport provides to the data plane.
///
/// `send` is non-blocking: a connection that is down or back-pressured
/// reports `false` and the packet is gone. There is no queueing beyond one
/// frame inside the transport.
pub trait IoOps: Send {
    fn send(&self, message: &Message) -> bool;
    fn is_up(&self) -> bool;
    fn close(&self);
    /// Emit a lightweight probe for delay-measuring strategies.
    fn send_probe(&self) {}
}

/// A duplex link in the connection table.
pub struct Connection {
    id: ConnectionId,
    conn_type: ConnType,
    addr_pair: AddressPair,
    is_local: bool,
    ops: Box<dyn IoOps>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        conn_type: ConnType,
        addr_pair: AddressPair,
        is_local: bool,
        ops: Box<dyn IoOps>,
    ) -> Self {
        Self {
            id,
            conn_type,
            addr_pair,
            is_local,
            ops,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn conn_type(&self) -> ConnType {
        self.conn_type
    }

    pub fn address_pair(&self) -> &AddressPair {
        &self.addr_pair
    }

    pub fn remote_address(&self) -> &Address {
        &self.addr_pair.remote
    }

    /// True when both endpoints are on this host.
    pub fn is_local(&self) -> bool {
        self.is_local
    }

    pub fn is_up(&self) -> bool {
        self.ops.is_up()
    }

    /// Hand one message to the transport. `false` means it was dropped.
    pub fn send(&self, message: &Message) -> bool {
        self.ops.is_up() && self.ops.send(message)
    }

    pub fn send_probe(&self) {
        self.ops.send_probe();
    }

    pub fn close(&self) {
        self.ops.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("type", &self.conn_type)
            .field("addr", &self.addr_pair)
            .field("local", &self.is_local)
            .finish()
    }
}

/// A summary row for snapshots handed to management callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub conn_type: ConnType,
    pub local: Address,
    pub remote: Address,
    pub is_local: bool,
    pub up: bool,
}

impl From<&Connection> for ConnectionInfo {
    fn from(conn: &Connection) -> Self {
        Self {
            id: conn.id,
            conn_type: conn.conn_type,
            local: conn.addr_pair.local.clone(),
            remote: conn.addr_pair.remote.clone(),
            is_local: conn.is_local,
            up: conn.is_up(),
        }
    }
}
