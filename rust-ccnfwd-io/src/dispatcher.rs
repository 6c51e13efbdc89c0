//! The dispatcher: one event-loop task that owns the forwarder.
//!
//! Transport tasks push complete packets into a channel; configuration
//! callers push commands into the same channel through `ForwarderHandle`.
//! The loop processes one event at a time, runs the 1-second PIT sweep,
//! and drains missives after every iteration, so the data plane sees
//! strictly serialized mutation.

use crate::handle::ForwarderHandle;
use crate::listener::ListenerSet;
use crate::local::{local_pair, LocalEndpoint};
use crate::stream::{spawn_stream_tasks, spawn_tcp_listener, spawn_unix_listener};
use crate::udp::{spawn_udp_reader, UdpConnOps};
use anyhow::Context;
use bytes::Bytes;
use rust_ccnfwd_common::name::Name;
use rust_ccnfwd_common::types::ConnectionId;
use rust_ccnfwd_core::connection::{Address, AddressPair, ConnType, ConnectionInfo, IoOps};
use rust_ccnfwd_core::fib::RouteInfo;
use rust_ccnfwd_core::forwarder::{ConfigError, Forwarder};
use rust_ccnfwd_core::strategy::StrategyKind;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// How a listener is brought up.
#[derive(Debug, Clone)]
pub enum ListenerSpec {
    Udp(SocketAddr),
    Tcp(SocketAddr),
    Unix(PathBuf),
    #[cfg(target_os = "linux")]
    Ether {
        interface: String,
        ethertype: u16,
        mtu: usize,
    },
}

impl ListenerSpec {
    /// Idempotency key: one listener per (transport, local address).
    fn key(&self) -> String {
        match self {
            Self::Udp(addr) => format!("udp:{addr}"),
            Self::Tcp(addr) => format!("tcp:{addr}"),
            Self::Unix(path) => format!("unix:{}", path.display()),
            #[cfg(target_os = "linux")]
            Self::Ether { interface, ethertype, .. } => {
                format!("ether:{interface}:{ethertype:04x}")
            }
        }
    }
}

/// How an outbound connection is brought up. Ethernet peers come up
/// implicitly when their first frame arrives on an Ethernet listener.
#[derive(Debug, Clone)]
pub enum ConnectSpec {
    Udp { local: SocketAddr, remote: SocketAddr },
    Tcp { remote: SocketAddr },
    Unix { path: PathBuf },
}

pub(crate) enum IoEvent {
    /// A stream transport came up (accepted or connected).
    Opened {
        conn_type: ConnType,
        pair: AddressPair,
        is_local: bool,
        ops: Box<dyn IoOps>,
    },
    /// A transport saw EOF or a fatal error.
    Closed { pair: AddressPair },
    /// One complete packet from an established connection.
    Packet { pair: AddressPair, buffer: Bytes },
    /// A datagram, possibly from a peer with no connection yet.
    Datagram {
        local: SocketAddr,
        remote: SocketAddr,
        socket: Arc<UdpSocket>,
        buffer: Bytes,
    },
    /// A reassembled packet from an Ethernet listener.
    #[cfg(target_os = "linux")]
    EtherFrame {
        io: Arc<crate::ether::EtherSocket>,
        remote_mac: crate::ether::MacAddr,
        mtu: usize,
        buffer: Bytes,
    },
}

pub(crate) enum Command {
    AddListener {
        spec: ListenerSpec,
        reply: oneshot::Sender<anyhow::Result<()>>,
    },
    AddConnection {
        spec: ConnectSpec,
        reply: oneshot::Sender<anyhow::Result<ConnectionId>>,
    },
    RemoveConnection {
        conn_id: ConnectionId,
        reply: oneshot::Sender<bool>,
    },
    AddRoute {
        prefix: Name,
        conn_id: ConnectionId,
        cost: u32,
        strategy: Option<StrategyKind>,
        reply: oneshot::Sender<Result<(), ConfigError>>,
    },
    RemoveRoute {
        prefix: Name,
        conn_id: ConnectionId,
        reply: oneshot::Sender<bool>,
    },
    SetCsCapacity {
        capacity: usize,
        reply: oneshot::Sender<()>,
    },
    SetStrategy {
        prefix: Name,
        kind: StrategyKind,
        reply: oneshot::Sender<Result<(), ConfigError>>,
    },
    OpenLocal {
        reply: oneshot::Sender<(ConnectionId, LocalEndpoint)>,
    },
    Connections {
        reply: oneshot::Sender<Vec<ConnectionInfo>>,
    },
    Routes {
        reply: oneshot::Sender<Vec<RouteInfo>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

pub(crate) enum Event {
    Io(IoEvent),
    Command(Command),
}

/// Queue depth between transports and the loop.
const EVENT_QUEUE_DEPTH: usize = 1024;

pub struct Dispatcher {
    forwarder: Forwarder,
    rx: mpsc::Receiver<Event>,
    tx: mpsc::Sender<Event>,
    listeners: ListenerSet,
    next_local: u64,
    shutdown: bool,
}

impl Dispatcher {
    pub fn new(forwarder: Forwarder) -> (Self, ForwarderHandle) {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let dispatcher = Self {
            forwarder,
            rx,
            tx: tx.clone(),
            listeners: ListenerSet::new(),
            next_local: 0,
            shutdown: false,
        };
        (dispatcher, ForwarderHandle::new(tx))
    }

    /// Run until every handle is dropped or a shutdown command arrives.
    pub async fn run(mut self) {
        let mut sweep = tokio::time::interval(Duration::from_secs(1));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(Event::Io(io_event)) => self.handle_io(io_event),
                    Some(Event::Command(command)) => self.handle_command(command).await,
                    None => break,
                },
                _ = sweep.tick() => self.forwarder.sweep_pit(),
            }
            self.forwarder.deliver_missives();
            if self.shutdown {
                break;
            }
        }
        self.listeners.shutdown();
        info!("dispatcher stopped");
    }

    fn handle_io(&mut self, event: IoEvent) {
        match event {
            IoEvent::Opened {
                conn_type,
                pair,
                is_local,
                ops,
            } => {
                // A reconnecting peer supersedes its old connection.
                if let Some(existing) = self.forwarder.connection_for_pair(&pair) {
                    self.forwarder.remove_connection(existing);
                }
                let id = self
                    .forwarder
                    .add_connection(conn_type, pair.clone(), is_local, ops);
                debug!(%id, %pair, "connection up");
            }
            IoEvent::Closed { pair } => {
                if let Some(id) = self.forwarder.connection_for_pair(&pair) {
                    debug!(%id, %pair, "connection lost");
                    self.forwarder.remove_connection(id);
                }
            }
            IoEvent::Packet { pair, buffer } => match self.forwarder.connection_for_pair(&pair) {
                Some(id) => self.forwarder.receive(id, buffer),
                None => debug!(%pair, "packet from unknown connection"),
            },
            IoEvent::Datagram {
                local,
                remote,
                socket,
                buffer,
            } => {
                let pair = AddressPair::new(Address::Inet(local), Address::Inet(remote));
                let id = match self.forwarder.connection_for_pair(&pair) {
                    Some(id) => id,
                    None => self.forwarder.add_connection(
                        ConnType::Udp,
                        pair,
                        remote.ip().is_loopback(),
                        Box::new(UdpConnOps::new(socket, remote)),
                    ),
                };
                self.forwarder.receive(id, buffer);
            }
            #[cfg(target_os = "linux")]
            IoEvent::EtherFrame {
                io,
                remote_mac,
                mtu,
                buffer,
            } => {
                let pair = AddressPair::new(
                    Address::Ether(io.mac()),
                    Address::Ether(remote_mac),
                );
                let id = match self.forwarder.connection_for_pair(&pair) {
                    Some(id) => id,
                    None => self.forwarder.add_connection(
                        ConnType::Ether,
                        pair,
                        false,
                        Box::new(crate::ether::EtherConnOps::new(io, remote_mac, mtu)),
                    ),
                };
                self.forwarder.receive(id, buffer);
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::AddListener { spec, reply } => {
                let _ = reply.send(self.add_listener(spec).await);
            }
            Command::AddConnection { spec, reply } => {
                let _ = reply.send(self.add_connection(spec).await);
            }
            Command::RemoveConnection { conn_id, reply } => {
                let _ = reply.send(self.forwarder.remove_connection(conn_id));
            }
            Command::AddRoute {
                prefix,
                conn_id,
                cost,
                strategy,
                reply,
            } => {
                let _ = reply.send(self.forwarder.add_route(prefix, conn_id, cost, strategy));
            }
            Command::RemoveRoute {
                prefix,
                conn_id,
                reply,
            } => {
                let _ = reply.send(self.forwarder.remove_route(&prefix, conn_id));
            }
            Command::SetCsCapacity { capacity, reply } => {
                self.forwarder.set_cs_capacity(capacity);
                let _ = reply.send(());
            }
            Command::SetStrategy {
                prefix,
                kind,
                reply,
            } => {
                let _ = reply.send(self.forwarder.set_strategy(&prefix, kind));
            }
            Command::OpenLocal { reply } => {
                self.next_local += 1;
                let pair =
                    AddressPair::new(Address::Local(0), Address::Local(self.next_local));
                let (endpoint, ops) = local_pair(pair.clone(), self.tx.clone());
                let id =
                    self.forwarder
                        .add_connection(ConnType::Local, pair, true, Box::new(ops));
                let _ = reply.send((id, endpoint));
            }
            Command::Connections { reply } => {
                let _ = reply.send(self.forwarder.connections().snapshot());
            }
            Command::Routes { reply } => {
                let _ = reply.send(self.forwarder.routes());
            }
            Command::Shutdown { reply } => {
                self.shutdown = true;
                let _ = reply.send(());
            }
        }
    }

    async fn add_listener(&mut self, spec: ListenerSpec) -> anyhow::Result<()> {
        let key = spec.key();
        if self.listeners.contains(&key) {
            return Ok(());
        }
        match spec {
            ListenerSpec::Udp(addr) => {
                let socket = UdpSocket::bind(addr)
                    .await
                    .with_context(|| format!("binding udp {addr}"))?;
                let local = socket.local_addr()?;
                info!(%local, "udp listener up");
                let task = spawn_udp_reader(Arc::new(socket), local, self.tx.clone());
                self.listeners.register(key, vec![task]);
            }
            ListenerSpec::Tcp(addr) => {
                let listener = tokio::net::TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("binding tcp {addr}"))?;
                info!(local = %listener.local_addr()?, "tcp listener up");
                let task = spawn_tcp_listener(listener, self.tx.clone());
                self.listeners.register(key, vec![task]);
            }
            ListenerSpec::Unix(path) => {
                // A daemon restart leaves the old socket file behind.
                let _ = std::fs::remove_file(&path);
                let listener = tokio::net::UnixListener::bind(&path)
                    .with_context(|| format!("binding unix {}", path.display()))?;
                info!(path = %path.display(), "unix listener up");
                let task = spawn_unix_listener(listener, path, self.tx.clone());
                self.listeners.register(key, vec![task]);
            }
            #[cfg(target_os = "linux")]
            ListenerSpec::Ether {
                interface,
                ethertype,
                mtu,
            } => {
                let io = Arc::new(
                    crate::ether::EtherSocket::open(&interface, ethertype)
                        .with_context(|| format!("opening ether listener on {interface}"))?,
                );
                info!(%interface, ethertype, "ether listener up");
                let task = crate::ether::spawn_ether_listener(io, mtu, self.tx.clone());
                self.listeners.register(key, vec![task]);
            }
        }
        Ok(())
    }

    async fn add_connection(&mut self, spec: ConnectSpec) -> anyhow::Result<ConnectionId> {
        match spec {
            ConnectSpec::Udp { local, remote } => {
                let socket = Arc::new(
                    UdpSocket::bind(local)
                        .await
                        .with_context(|| format!("binding udp {local}"))?,
                );
                let local = socket.local_addr()?;
                let task = spawn_udp_reader(Arc::clone(&socket), local, self.tx.clone());
                self.listeners.adopt(task);
                let pair = AddressPair::new(Address::Inet(local), Address::Inet(remote));
                let ops = UdpConnOps::new(socket, remote);
                Ok(self.forwarder.add_connection(
                    ConnType::Udp,
                    pair,
                    remote.ip().is_loopback(),
                    Box::new(ops),
                ))
            }
            ConnectSpec::Tcp { remote } => {
                let stream = tokio::net::TcpStream::connect(remote)
                    .await
                    .with_context(|| format!("connecting tcp {remote}"))?;
                let local = stream.local_addr()?;
                let pair = AddressPair::new(Address::Inet(local), Address::Inet(remote));
                let ops = spawn_stream_tasks(stream, pair.clone(), self.tx.clone());
                Ok(self.forwarder.add_connection(
                    ConnType::Tcp,
                    pair,
                    remote.ip().is_loopback(),
                    Box::new(ops),
                ))
            }
            ConnectSpec::Unix { path } => {
                let stream = tokio::net::UnixStream::connect(&path)
                    .await
                    .with_context(|| format!("connecting unix {}", path.display()))?;
                self.next_local += 1;
                let pair = AddressPair::new(
                    Address::Local(self.next_local),
                    Address::Unix(path),
                );
                let ops = spawn_stream_tasks(stream, pair.clone(), self.tx.clone());
                Ok(self
                    .forwarder
                    .add_connection(ConnType::Unix, pair, true, Box::new(ops)))
            }
        }
    }
}
