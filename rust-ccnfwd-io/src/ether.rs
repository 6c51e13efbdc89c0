//! Raw-Ethernet transport with hop-by-hop fragmentation.
//!
//! Frames carry a 4-byte fragmentation header (sequence, fragment-number,
//! total-fragments, flags) after the Ethernet II header. Packets above the
//! link MTU are split on send; the listener reassembles per source MAC
//! with a 250 ms timeout and a bound on in-flight reassemblies.

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Ethernet II header: destination, source, ethertype.
pub const ETH_HEADER_LENGTH: usize = 14;
/// Fragmentation header carried in every frame.
pub const FRAG_HEADER_LENGTH: usize = 4;
/// Ethertype used when the listener does not choose one.
pub const DEFAULT_ETHERTYPE: u16 = 0x0801;
/// A reassembly that has not completed in this long is discarded.
pub const REASSEMBLY_TIMEOUT: Duration = Duration::from_millis(250);
/// Bound on concurrent reassemblies per source MAC; the oldest is evicted
/// when a new sequence arrives at the cap.
pub const MAX_INFLIGHT_PER_SOURCE: usize = 64;

pub type MacAddr = [u8; 6];

/// The per-fragment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragHeader {
    pub sequence: u8,
    pub index: u8,
    pub count: u8,
    pub flags: u8,
}

impl FragHeader {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < FRAG_HEADER_LENGTH {
            return None;
        }
        let header = Self {
            sequence: bytes[0],
            index: bytes[1],
            count: bytes[2],
            flags: bytes[3],
        };
        (header.count > 0 && header.index < header.count).then_some(header)
    }

    pub fn encode(&self) -> [u8; FRAG_HEADER_LENGTH] {
        [self.sequence, self.index, self.count, self.flags]
    }
}

/// Split one packet into fragment frames (header + chunk, no Ethernet
/// header). `mtu` is the link payload budget per frame.
pub fn fragment(packet: &[u8], mtu: usize, sequence: u8) -> Vec<Bytes> {
    let chunk_size = mtu.saturating_sub(FRAG_HEADER_LENGTH).max(1);
    let count = packet.len().div_ceil(chunk_size).max(1);
    debug_assert!(count <= u8::MAX as usize, "packet too large for 8-bit fragment count");

    let mut frames = Vec::with_capacity(count);
    for (index, chunk) in packet.chunks(chunk_size).enumerate() {
        let header = FragHeader {
            sequence,
            index: index as u8,
            count: count as u8,
            flags: 0,
        };
        let mut frame = BytesMut::with_capacity(FRAG_HEADER_LENGTH + chunk.len());
        frame.put_slice(&header.encode());
        frame.put_slice(chunk);
        frames.push(frame.freeze());
    }
    frames
}

#[derive(Debug)]
struct Partial {
    chunks: Vec<Option<Bytes>>,
    received: usize,
    started: Instant,
}

/// Per-source-MAC reassembly buffers.
#[derive(Debug, Default)]
pub struct Reassembler {
    partial: HashMap<(MacAddr, u8), Partial>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> usize {
        self.partial.len()
    }

    /// Accept one fragment; returns the whole packet once every piece of
    /// its sequence has arrived.
    pub fn accept(
        &mut self,
        src: MacAddr,
        header: FragHeader,
        payload: Bytes,
        now: Instant,
    ) -> Option<Bytes> {
        self.expire(now);

        if header.count == 1 {
            return Some(payload);
        }

        let key = (src, header.sequence);
        if !self.partial.contains_key(&key) {
            self.evict_for(src);
            self.partial.insert(
                key,
                Partial {
                    chunks: vec![None; header.count as usize],
                    received: 0,
                    started: now,
                },
            );
        }

        let partial = self.partial.get_mut(&key).expect("just inserted");
        if partial.chunks.len() != header.count as usize {
            // The sequence number wrapped onto a different packet; start
            // over with the new framing.
            *partial = Partial {
                chunks: vec![None; header.count as usize],
                received: 0,
                started: now,
            };
        }
        let slot = &mut partial.chunks[header.index as usize];
        if slot.is_none() {
            *slot = Some(payload);
            partial.received += 1;
        }
        if partial.received < partial.chunks.len() {
            return None;
        }

        let partial = self.partial.remove(&key).expect("complete");
        let total: usize = partial
            .chunks
            .iter()
            .map(|c| c.as_ref().map_or(0, |b| b.len()))
            .sum();
        let mut packet = BytesMut::with_capacity(total);
        for chunk in partial.chunks {
            packet.put_slice(&chunk.expect("all chunks received"));
        }
        Some(packet.freeze())
    }

    /// Drop reassemblies older than the timeout.
    pub fn expire(&mut self, now: Instant) {
        self.partial
            .retain(|_, partial| now.duration_since(partial.started) < REASSEMBLY_TIMEOUT);
    }

    /// Enforce the per-source cap, evicting the oldest reassembly.
    fn evict_for(&mut self, src: MacAddr) {
        let count = self.partial.keys().filter(|(mac, _)| *mac == src).count();
        if count < MAX_INFLIGHT_PER_SOURCE {
            return;
        }
        let oldest = self
            .partial
            .iter()
            .filter(|((mac, _), _)| *mac == src)
            .min_by_key(|(_, partial)| partial.started)
            .map(|(key, _)| *key);
        if let Some(key) = oldest {
            self.partial.remove(&key);
        }
    }
}

#[cfg(target_os = "linux")]
pub(crate) use afpacket::{spawn_ether_listener, EtherConnOps, EtherSocket};

#[cfg(target_os = "linux")]
mod afpacket {
    use super::*;
    use crate::dispatcher::{Event, IoEvent};
    use rust_ccnfwd_common::message::Message;
    use rust_ccnfwd_core::connection::IoOps;
    use std::ffi::CString;
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
    use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
    use std::sync::Arc;
    use tokio::io::unix::AsyncFd;
    use tokio::sync::mpsc;
    use tokio::task::AbortHandle;
    use tracing::{debug, trace};

    const BROADCAST: MacAddr = [0xFF; 6];
    const RECV_BUFFER: usize = 9216;

    /// A non-blocking AF_PACKET socket bound to one interface and
    /// ethertype.
    pub(crate) struct EtherSocket {
        fd: OwnedFd,
        mac: MacAddr,
        ethertype: u16,
    }

    impl EtherSocket {
        pub fn open(interface: &str, ethertype: u16) -> io::Result<Self> {
            let name = CString::new(interface)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "bad interface name"))?;

            let raw = unsafe {
                libc::socket(
                    libc::AF_PACKET,
                    libc::SOCK_RAW | libc::SOCK_NONBLOCK,
                    ethertype.to_be() as libc::c_int,
                )
            };
            if raw < 0 {
                return Err(io::Error::last_os_error());
            }
            let fd = unsafe { OwnedFd::from_raw_fd(raw) };

            let ifindex = unsafe { libc::if_nametoindex(name.as_ptr()) };
            if ifindex == 0 {
                return Err(io::Error::last_os_error());
            }

            let mut req: libc::ifreq = unsafe { std::mem::zeroed() };
            for (dst, src) in req
                .ifr_name
                .iter_mut()
                .zip(name.as_bytes_with_nul().iter())
            {
                *dst = *src as libc::c_char;
            }
            if unsafe { libc::ioctl(fd.as_raw_fd(), libc::SIOCGIFHWADDR, &mut req) } < 0 {
                return Err(io::Error::last_os_error());
            }
            let mut mac = [0u8; 6];
            let hwaddr = unsafe { req.ifr_ifru.ifru_hwaddr.sa_data };
            for (dst, src) in mac.iter_mut().zip(hwaddr.iter()) {
                *dst = *src as u8;
            }

            let mut sll: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
            sll.sll_family = libc::AF_PACKET as libc::sa_family_t;
            sll.sll_protocol = ethertype.to_be();
            sll.sll_ifindex = ifindex as libc::c_int;
            let rc = unsafe {
                libc::bind(
                    fd.as_raw_fd(),
                    &sll as *const libc::sockaddr_ll as *const libc::sockaddr,
                    std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
                )
            };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }

            Ok(Self { fd, mac, ethertype })
        }

        pub fn mac(&self) -> MacAddr {
            self.mac
        }

        fn try_recv(&self, buf: &mut [u8]) -> io::Result<usize> {
            let rc = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    libc::MSG_DONTWAIT,
                )
            };
            if rc < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(rc as usize)
            }
        }

        fn try_send(&self, frame: &[u8]) -> io::Result<usize> {
            let rc = unsafe {
                libc::send(
                    self.fd.as_raw_fd(),
                    frame.as_ptr() as *const libc::c_void,
                    frame.len(),
                    libc::MSG_DONTWAIT,
                )
            };
            if rc < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(rc as usize)
            }
        }
    }

    impl AsRawFd for EtherSocket {
        fn as_raw_fd(&self) -> RawFd {
            self.fd.as_raw_fd()
        }
    }

    struct SharedFd(Arc<EtherSocket>);

    impl AsRawFd for SharedFd {
        fn as_raw_fd(&self) -> RawFd {
            self.0.as_raw_fd()
        }
    }

    /// Receive loop: drain ready frames, reassemble, and hand complete
    /// packets to the dispatcher. A timer sweeps stale reassemblies.
    pub(crate) fn spawn_ether_listener(
        io: Arc<EtherSocket>,
        mtu: usize,
        events: mpsc::Sender<Event>,
    ) -> AbortHandle {
        let task = tokio::spawn(async move {
            let async_fd = match AsyncFd::new(SharedFd(Arc::clone(&io))) {
                Ok(fd) => fd,
                Err(err) => {
                    debug!(%err, "ether listener registration failed");
                    return;
                }
            };
            let mut reassembler = Reassembler::new();
            let mut sweep = tokio::time::interval(REASSEMBLY_TIMEOUT);
            let mut buf = vec![0u8; RECV_BUFFER];
            loop {
                tokio::select! {
                    ready = async_fd.readable() => {
                        let mut guard = match ready {
                            Ok(guard) => guard,
                            Err(err) => {
                                debug!(%err, "ether readiness error");
                                return;
                            }
                        };
                        loop {
                            match io.try_recv(&mut buf) {
                                Ok(len) => {
                                    if let Some(event) =
                                        frame_to_event(&io, &buf[..len], mtu, &mut reassembler)
                                    {
                                        if events.send(event).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                                    guard.clear_ready();
                                    break;
                                }
                                Err(err) => {
                                    debug!(%err, "ether receive error");
                                    return;
                                }
                            }
                        }
                    }
                    _ = sweep.tick() => reassembler.expire(Instant::now()),
                }
            }
        });
        task.abort_handle()
    }

    fn frame_to_event(
        io: &Arc<EtherSocket>,
        frame: &[u8],
        mtu: usize,
        reassembler: &mut Reassembler,
    ) -> Option<Event> {
        if frame.len() < ETH_HEADER_LENGTH + FRAG_HEADER_LENGTH {
            return None;
        }
        let mut dst = [0u8; 6];
        dst.copy_from_slice(&frame[0..6]);
        if dst != io.mac() && dst != BROADCAST {
            return None;
        }
        let mut src = [0u8; 6];
        src.copy_from_slice(&frame[6..12]);

        let header = FragHeader::parse(&frame[ETH_HEADER_LENGTH..])?;
        let payload =
            Bytes::copy_from_slice(&frame[ETH_HEADER_LENGTH + FRAG_HEADER_LENGTH..]);
        let packet = reassembler.accept(src, header, payload, Instant::now())?;
        trace!(?src, len = packet.len(), "ether packet reassembled");
        Some(Event::Io(IoEvent::EtherFrame {
            io: Arc::clone(io),
            remote_mac: src,
            mtu,
            buffer: packet,
        }))
    }

    /// Egress half of an Ethernet connection.
    pub(crate) struct EtherConnOps {
        io: Arc<EtherSocket>,
        remote: MacAddr,
        mtu: usize,
        sequence: AtomicU8,
        up: AtomicBool,
    }

    impl EtherConnOps {
        pub fn new(io: Arc<EtherSocket>, remote: MacAddr, mtu: usize) -> Self {
            Self {
                io,
                remote,
                mtu,
                sequence: AtomicU8::new(0),
                up: AtomicBool::new(true),
            }
        }

        fn send_bytes(&self, packet: &[u8]) -> bool {
            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
            for fragment in fragment(packet, self.mtu, sequence) {
                let mut frame =
                    BytesMut::with_capacity(ETH_HEADER_LENGTH + fragment.len());
                frame.put_slice(&self.remote);
                frame.put_slice(&self.io.mac());
                frame.put_u16(self.io.ethertype);
                frame.put_slice(&fragment);
                if self.io.try_send(&frame).is_err() {
                    return false;
                }
            }
            true
        }
    }

    impl IoOps for EtherConnOps {
        fn send(&self, message: &Message) -> bool {
            self.send_bytes(message.bytes())
        }

        fn is_up(&self) -> bool {
            self.up.load(Ordering::Relaxed)
        }

        fn close(&self) {
            self.up.store(false, Ordering::Relaxed);
        }

        fn send_probe(&self) {
            self.send_bytes(&rust_ccnfwd_common::builder::probe_packet());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: MacAddr = [0x02, 0, 0, 0, 0, 0x01];

    #[test]
    fn small_packet_is_a_single_fragment() {
        let frames = fragment(&[0xAB; 50], 128, 9);
        assert_eq!(frames.len(), 1);
        let header = FragHeader::parse(&frames[0]).unwrap();
        assert_eq!(header.sequence, 9);
        assert_eq!(header.count, 1);
        assert_eq!(&frames[0][FRAG_HEADER_LENGTH..], &[0xAB; 50][..]);
    }

    #[test]
    fn three_hundred_bytes_at_mtu_128_is_three_fragments() {
        let packet: Vec<u8> = (0..300u16).map(|i| i as u8).collect();
        let frames = fragment(&packet, 128, 1);
        assert_eq!(frames.len(), 3);
        for (i, frame) in frames.iter().enumerate() {
            let header = FragHeader::parse(frame).unwrap();
            assert_eq!(header.index, i as u8);
            assert_eq!(header.count, 3);
            assert!(frame.len() <= 128);
        }
    }

    #[test]
    fn fragments_reassemble_byte_identical() {
        let packet: Vec<u8> = (0..300u16).map(|i| i as u8).collect();
        let frames = fragment(&packet, 128, 1);

        let mut reassembler = Reassembler::new();
        let now = Instant::now();
        let mut result = None;
        for frame in &frames {
            let header = FragHeader::parse(frame).unwrap();
            let payload = frame.slice(FRAG_HEADER_LENGTH..);
            result = reassembler.accept(SRC, header, payload, now);
        }
        assert_eq!(result.unwrap().as_ref(), &packet[..]);
        assert_eq!(reassembler.in_flight(), 0);
    }

    #[test]
    fn out_of_order_fragments_reassemble() {
        let packet: Vec<u8> = (0..300u16).map(|i| i as u8).collect();
        let mut frames = fragment(&packet, 128, 2);
        frames.reverse();

        let mut reassembler = Reassembler::new();
        let now = Instant::now();
        let mut result = None;
        for frame in &frames {
            let header = FragHeader::parse(frame).unwrap();
            result = reassembler.accept(SRC, header, frame.slice(FRAG_HEADER_LENGTH..), now);
        }
        assert_eq!(result.unwrap().as_ref(), &packet[..]);
    }

    #[test]
    fn duplicate_fragment_is_ignored() {
        let packet = vec![0x11u8; 300];
        let frames = fragment(&packet, 128, 3);
        let mut reassembler = Reassembler::new();
        let now = Instant::now();
        let header0 = FragHeader::parse(&frames[0]).unwrap();
        assert!(reassembler
            .accept(SRC, header0, frames[0].slice(FRAG_HEADER_LENGTH..), now)
            .is_none());
        assert!(reassembler
            .accept(SRC, header0, frames[0].slice(FRAG_HEADER_LENGTH..), now)
            .is_none());
        assert_eq!(reassembler.in_flight(), 1);
    }

    #[test]
    fn stale_reassembly_times_out() {
        let packet = vec![0x22u8; 300];
        let frames = fragment(&packet, 128, 4);
        let mut reassembler = Reassembler::new();
        let start = Instant::now();
        let header = FragHeader::parse(&frames[0]).unwrap();
        reassembler.accept(SRC, header, frames[0].slice(FRAG_HEADER_LENGTH..), start);

        // The remaining fragments arrive after the window has closed; the
        // first fragment is gone, so nothing completes.
        let late = start + REASSEMBLY_TIMEOUT;
        let mut result = None;
        for frame in &frames[1..] {
            let header = FragHeader::parse(frame).unwrap();
            result = reassembler.accept(SRC, header, frame.slice(FRAG_HEADER_LENGTH..), late);
        }
        assert!(result.is_none());
    }

    #[test]
    fn per_source_cap_evicts_oldest() {
        let mut reassembler = Reassembler::new();
        let now = Instant::now();
        // Open MAX_INFLIGHT_PER_SOURCE+1 partial reassemblies from one MAC.
        for seq in 0..=MAX_INFLIGHT_PER_SOURCE {
            let header = FragHeader {
                sequence: seq as u8,
                index: 0,
                count: 2,
                flags: 0,
            };
            reassembler.accept(SRC, header, Bytes::from_static(&[0u8; 8]), now);
        }
        assert_eq!(reassembler.in_flight(), MAX_INFLIGHT_PER_SOURCE);
    }

    #[test]
    fn distinct_sources_do_not_interfere() {
        let other: MacAddr = [0x02, 0, 0, 0, 0, 0x02];
        let packet = vec![0x33u8; 200];
        let frames = fragment(&packet, 128, 5);
        let mut reassembler = Reassembler::new();
        let now = Instant::now();

        let header0 = FragHeader::parse(&frames[0]).unwrap();
        let header1 = FragHeader::parse(&frames[1]).unwrap();
        // Interleave the two sources with the same sequence number.
        reassembler.accept(SRC, header0, frames[0].slice(FRAG_HEADER_LENGTH..), now);
        reassembler.accept(other, header0, frames[0].slice(FRAG_HEADER_LENGTH..), now);
        let a = reassembler.accept(SRC, header1, frames[1].slice(FRAG_HEADER_LENGTH..), now);
        assert_eq!(a.unwrap().as_ref(), &packet[..]);
        assert_eq!(reassembler.in_flight(), 1, "other source still pending");
    }
}
