//! UDP transport.
//!
//! One socket serves a listener; peers are demultiplexed into connections
//! by their (local, remote) address pair, created implicitly when the
//! first datagram arrives. Egress is `try_send_to`: a full socket buffer
//! drops the packet rather than queueing.

use crate::dispatcher::{Event, IoEvent};
use bytes::Bytes;
use rust_ccnfwd_common::message::Message;
use rust_ccnfwd_core::connection::IoOps;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

/// Largest packet a single datagram may carry.
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Read datagrams off `socket` and hand them to the dispatcher. Used for
/// listeners and for the local socket of outbound UDP connections alike.
pub(crate) fn spawn_udp_reader(
    socket: Arc<UdpSocket>,
    local: SocketAddr,
    events: mpsc::Sender<Event>,
) -> AbortHandle {
    let task = tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, remote)) => {
                    trace!(%remote, len, "udp datagram");
                    let event = Event::Io(IoEvent::Datagram {
                        local,
                        remote,
                        socket: Arc::clone(&socket),
                        buffer: Bytes::copy_from_slice(&buf[..len]),
                    });
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    debug!(%local, %err, "udp receive error");
                    return;
                }
            }
        }
    });
    task.abort_handle()
}

pub(crate) struct UdpConnOps {
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    up: AtomicBool,
}

impl UdpConnOps {
    pub fn new(socket: Arc<UdpSocket>, remote: SocketAddr) -> Self {
        Self {
            socket,
            remote,
            up: AtomicBool::new(true),
        }
    }
}

impl IoOps for UdpConnOps {
    fn send(&self, message: &Message) -> bool {
        match self.socket.try_send_to(message.bytes(), self.remote) {
            Ok(sent) => sent == message.len(),
            Err(err) => {
                trace!(remote = %self.remote, %err, "udp send dropped");
                false
            }
        }
    }

    fn is_up(&self) -> bool {
        self.up.load(Ordering::Relaxed)
    }

    fn close(&self) {
        self.up.store(false, Ordering::Relaxed);
    }

    fn send_probe(&self) {
        let _ = self
            .socket
            .try_send_to(&rust_ccnfwd_common::builder::probe_packet(), self.remote);
    }
}
