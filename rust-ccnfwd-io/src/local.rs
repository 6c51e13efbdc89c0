//! In-process connections for applications embedded in the forwarder.
//!
//! A local connection is a pair of channels: the application pushes wire
//! buffers into the dispatcher and receives whatever the forwarder sends
//! back. `is_local` is always true for these connections.

use crate::dispatcher::{Event, IoEvent};
use anyhow::{anyhow, Result};
use bytes::Bytes;
use rust_ccnfwd_core::connection::{AddressPair, IoOps};
use rust_ccnfwd_common::message::Message;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Buffered frames towards a local application. Applications are trusted
/// to drain promptly; overflow still drops like any other transport.
const LOCAL_QUEUE_DEPTH: usize = 64;

/// The application side of a local connection.
pub struct LocalEndpoint {
    pair: AddressPair,
    events: mpsc::Sender<Event>,
    from_forwarder: mpsc::Receiver<Bytes>,
}

impl LocalEndpoint {
    /// Submit one wire-format packet to the forwarder.
    pub async fn send(&self, packet: Bytes) -> Result<()> {
        self.events
            .send(Event::Io(IoEvent::Packet {
                pair: self.pair.clone(),
                buffer: packet,
            }))
            .await
            .map_err(|_| anyhow!("forwarder is gone"))
    }

    /// Wait for the next packet the forwarder sends this application.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.from_forwarder.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.from_forwarder.try_recv().ok()
    }
}

pub(crate) struct LocalConnOps {
    to_app: mpsc::Sender<Bytes>,
    up: Arc<AtomicBool>,
}

impl IoOps for LocalConnOps {
    fn send(&self, message: &Message) -> bool {
        self.to_app.try_send(message.bytes().clone()).is_ok()
    }

    fn is_up(&self) -> bool {
        self.up.load(Ordering::Relaxed)
    }

    fn close(&self) {
        self.up.store(false, Ordering::Relaxed);
    }
}

/// Build the two halves of a local connection.
pub(crate) fn local_pair(
    pair: AddressPair,
    events: mpsc::Sender<Event>,
) -> (LocalEndpoint, LocalConnOps) {
    let (to_app, from_forwarder) = mpsc::channel(LOCAL_QUEUE_DEPTH);
    let endpoint = LocalEndpoint {
        pair,
        events,
        from_forwarder,
    };
    let ops = LocalConnOps {
        to_app,
        up: Arc::new(AtomicBool::new(true)),
    };
    (endpoint, ops)
}
