//! TCP and UNIX stream transports.
//!
//! Each stream gets a framed reader task and a writer task. The writer is
//! fed through a depth-1 channel: if the previous frame has not drained,
//! the next send drops, keeping back-pressure out of the data plane.

use crate::dispatcher::{Event, IoEvent};
use crate::framing::PacketCodec;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use rust_ccnfwd_common::message::Message;
use rust_ccnfwd_core::connection::{AddressPair, ConnType, IoOps};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, trace};

pub(crate) struct StreamConnOps {
    outbound: mpsc::Sender<Bytes>,
    up: Arc<AtomicBool>,
    reader: AbortHandle,
    writer: AbortHandle,
}

impl IoOps for StreamConnOps {
    fn send(&self, message: &Message) -> bool {
        // Depth-1 queue: refuse rather than buffer a backlog.
        self.outbound.try_send(message.bytes().clone()).is_ok()
    }

    fn is_up(&self) -> bool {
        self.up.load(Ordering::Relaxed)
    }

    fn close(&self) {
        self.up.store(false, Ordering::Relaxed);
        self.reader.abort();
        self.writer.abort();
    }
}

/// Wire a connected stream into the dispatcher: reader emits `Packet`
/// events until EOF (then `Closed`), writer drains the depth-1 queue.
pub(crate) fn spawn_stream_tasks<S>(
    stream: S,
    pair: AddressPair,
    events: mpsc::Sender<Event>,
) -> StreamConnOps
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let up = Arc::new(AtomicBool::new(true));
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Bytes>(1);

    let reader_pair = pair.clone();
    let reader_events = events.clone();
    let reader_up = Arc::clone(&up);
    let reader = tokio::spawn(async move {
        let mut frames = FramedRead::new(read_half, PacketCodec);
        while let Some(frame) = frames.next().await {
            match frame {
                Ok(buffer) => {
                    let event = Event::Io(IoEvent::Packet {
                        pair: reader_pair.clone(),
                        buffer,
                    });
                    if reader_events.send(event).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    debug!(pair = %reader_pair, %err, "stream read error");
                    break;
                }
            }
        }
        reader_up.store(false, Ordering::Relaxed);
        let _ = reader_events
            .send(Event::Io(IoEvent::Closed { pair: reader_pair }))
            .await;
    });

    let writer_up = Arc::clone(&up);
    let writer_pair = pair;
    let writer = tokio::spawn(async move {
        let mut sink = FramedWrite::new(write_half, PacketCodec);
        while let Some(frame) = outbound_rx.recv().await {
            if let Err(err) = sink.send(frame).await {
                debug!(pair = %writer_pair, %err, "stream write error");
                break;
            }
        }
        writer_up.store(false, Ordering::Relaxed);
    });

    StreamConnOps {
        outbound: outbound_tx,
        up,
        reader: reader.abort_handle(),
        writer: writer.abort_handle(),
    }
}

/// Accept TCP connections, announcing each to the dispatcher.
pub(crate) fn spawn_tcp_listener(
    listener: tokio::net::TcpListener,
    events: mpsc::Sender<Event>,
) -> AbortHandle {
    let task = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, remote)) => {
                    let Ok(local) = stream.local_addr() else {
                        continue;
                    };
                    trace!(%remote, "tcp accepted");
                    let pair = AddressPair::new(
                        rust_ccnfwd_core::connection::Address::Inet(local),
                        rust_ccnfwd_core::connection::Address::Inet(remote),
                    );
                    let ops = spawn_stream_tasks(stream, pair.clone(), events.clone());
                    let opened = Event::Io(IoEvent::Opened {
                        conn_type: ConnType::Tcp,
                        pair,
                        is_local: remote.ip().is_loopback(),
                        ops: Box::new(ops),
                    });
                    if events.send(opened).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    debug!(%err, "tcp accept error");
                    return;
                }
            }
        }
    });
    task.abort_handle()
}

/// Accept UNIX-domain connections, announcing each to the dispatcher.
pub(crate) fn spawn_unix_listener(
    listener: tokio::net::UnixListener,
    local_path: std::path::PathBuf,
    events: mpsc::Sender<Event>,
) -> AbortHandle {
    let task = tokio::spawn(async move {
        let mut peer_seq = 0u64;
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    // Unix peers are usually unnamed; synthesize a stable
                    // remote address per accepted stream.
                    peer_seq += 1;
                    let pair = AddressPair::new(
                        rust_ccnfwd_core::connection::Address::Unix(local_path.clone()),
                        rust_ccnfwd_core::connection::Address::Local(peer_seq),
                    );
                    let ops = spawn_stream_tasks(stream, pair.clone(), events.clone());
                    let opened = Event::Io(IoEvent::Opened {
                        conn_type: ConnType::Unix,
                        pair,
                        is_local: true,
                        ops: Box::new(ops),
                    });
                    if events.send(opened).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    debug!(%err, "unix accept error");
                    return;
                }
            }
        }
    });
    task.abort_handle()
}
