//! The in-forwarder representation of one parsed packet.
//!
//! A `Message` owns an immutable wire buffer plus the skeleton of extents
//! into it. Cloning a message is cheap: the buffer is shared, the skeleton
//! is copied. Forwarding to N egress connections is N clones of one handle.

use crate::error::CodecError;
use crate::name::Name;
use crate::skeleton::{PacketType, TlvSkeleton};
use crate::tlv::{self, Extent};
use crate::types::{ConnectionId, Ticks};
use bytes::{Bytes, BytesMut};
use sha2::{Digest, Sha256};
use std::fmt;

/// Interest lifetime applied when the packet carries none.
pub const DEFAULT_INTEREST_LIFETIME_MS: u64 = 4000;

/// SHA-256 hash of a content object message body.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHash(pub [u8; 32]);

impl fmt::Debug for ObjectHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHash(")?;
        for b in &self.0[..8] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..)")
    }
}

/// RFC 8609 Interest Return codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReturnCode {
    NoRoute = 1,
    HopLimitExceeded = 2,
    NoResources = 3,
    PathError = 4,
    Prohibited = 5,
    Congestion = 6,
    MtuTooLarge = 7,
    UnsupportedHashRestriction = 8,
    MalformedInterest = 9,
}

impl ReturnCode {
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::NoRoute),
            2 => Some(Self::HopLimitExceeded),
            3 => Some(Self::NoResources),
            4 => Some(Self::PathError),
            5 => Some(Self::Prohibited),
            6 => Some(Self::Congestion),
            7 => Some(Self::MtuTooLarge),
            8 => Some(Self::UnsupportedHashRestriction),
            9 => Some(Self::MalformedInterest),
            _ => None,
        }
    }
}

/// One parsed packet: shared wire buffer, skeleton, receive metadata.
#[derive(Debug, Clone)]
pub struct Message {
    buffer: Bytes,
    skeleton: TlvSkeleton,
    name: Option<Name>,
    object_hash: Option<ObjectHash>,
    ingress: ConnectionId,
    recv_ticks: Ticks,
}

impl Message {
    /// Parse a wire buffer received on `ingress` at `recv_ticks`.
    pub fn from_wire(
        buffer: Bytes,
        ingress: ConnectionId,
        recv_ticks: Ticks,
    ) -> Result<Self, CodecError> {
        let skeleton = TlvSkeleton::parse(&buffer)?;
        let name = match skeleton.name() {
            Some(extent) => Some(
                Name::from_wire(&buffer[extent.range()])
                    .map_err(|_| CodecError::new(crate::error::CodecErrorKind::Overrun, extent.offset as usize))?,
            ),
            None => None,
        };
        // Content objects are keyed by hash in the store and matched against
        // hash restrictions, so the digest is computed up front. It covers
        // the message body and validation sections.
        let object_hash = (skeleton.packet_type() == PacketType::ContentObject).then(|| {
            let digest = Sha256::digest(&buffer[skeleton.body_offset()..]);
            ObjectHash(digest.into())
        });
        Ok(Self {
            buffer,
            skeleton,
            name,
            object_hash,
            ingress,
            recv_ticks,
        })
    }

    pub fn packet_type(&self) -> PacketType {
        self.skeleton.packet_type()
    }

    pub fn bytes(&self) -> &Bytes {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn ingress(&self) -> ConnectionId {
        self.ingress
    }

    pub fn recv_ticks(&self) -> Ticks {
        self.recv_ticks
    }

    pub fn name(&self) -> Option<&Name> {
        self.name.as_ref()
    }

    pub fn hop_limit(&self) -> Option<u8> {
        self.skeleton.hop_limit()
    }

    pub fn return_code(&self) -> Option<ReturnCode> {
        self.skeleton.return_code().and_then(ReturnCode::from_wire)
    }

    /// Interest lifetime in milliseconds, defaulted when absent.
    pub fn interest_lifetime_ms(&self) -> u64 {
        self.extent_uint(self.skeleton.interest_lifetime())
            .unwrap_or(DEFAULT_INTEREST_LIFETIME_MS)
    }

    /// Recommended cache time in milliseconds, if present.
    pub fn recommended_cache_time_ms(&self) -> Option<u64> {
        self.extent_uint(self.skeleton.recommended_cache_time())
    }

    /// Absolute expiry time in milliseconds since the epoch, if present.
    pub fn expiry_time_ms(&self) -> Option<u64> {
        self.extent_uint(self.skeleton.expiry_time())
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.extent_bytes(self.skeleton.payload())
    }

    /// KeyId restriction digest carried by an Interest.
    pub fn keyid_restriction(&self) -> Option<&[u8]> {
        self.extent_bytes(self.skeleton.keyid_restriction())
            .map(unwrap_hash_value)
    }

    /// Content-object-hash restriction digest carried by an Interest.
    pub fn hash_restriction(&self) -> Option<&[u8]> {
        self.extent_bytes(self.skeleton.hash_restriction())
            .map(unwrap_hash_value)
    }

    /// KeyId of a content object's validation section.
    pub fn keyid(&self) -> Option<&[u8]> {
        self.extent_bytes(self.skeleton.keyid()).map(unwrap_hash_value)
    }

    /// SHA-256 over the message body; present on content objects only.
    pub fn object_hash(&self) -> Option<&ObjectHash> {
        self.object_hash.as_ref()
    }

    pub fn validation_alg(&self) -> Option<&[u8]> {
        self.extent_bytes(self.skeleton.validation_alg())
    }

    pub fn validation_payload(&self) -> Option<&[u8]> {
        self.extent_bytes(self.skeleton.validation_payload())
    }

    /// Control message payload (the value of the control TLV).
    pub fn control_payload(&self) -> Option<&[u8]> {
        if self.packet_type() != PacketType::Control {
            return None;
        }
        self.extent_bytes(self.skeleton.message())
    }

    /// A copy of this message with the hop-limit byte rewritten.
    ///
    /// The one buffer copy happens here; the egress fan-out then clones the
    /// patched handle.
    pub fn with_hop_limit(&self, hop_limit: u8) -> Self {
        let mut patched = BytesMut::from(self.buffer.as_ref());
        patched[tlv::OFF_HOP_LIMIT] = hop_limit;
        Self {
            buffer: patched.freeze(),
            ..self.clone()
        }
    }

    fn extent_bytes(&self, extent: Option<Extent>) -> Option<&[u8]> {
        extent.map(|e| &self.buffer[e.range()])
    }

    fn extent_uint(&self, extent: Option<Extent>) -> Option<u64> {
        self.extent_bytes(extent).map(tlv::read_be_uint)
    }
}

/// Restriction and keyid values usually wrap the digest in a hash TLV
/// (`T_SHA256`, length 32). Matching happens on the digest bytes, so the
/// wrapper is stripped when present.
fn unwrap_hash_value(value: &[u8]) -> &[u8] {
    if value.len() >= tlv::TLV_HEADER_LENGTH {
        let inner_type = tlv::read_u16(value, 0);
        let inner_len = tlv::read_u16(value, 2) as usize;
        if inner_type == tlv::T_SHA256 && inner_len + tlv::TLV_HEADER_LENGTH == value.len() {
            return &value[tlv::TLV_HEADER_LENGTH..];
        }
    }
    value
}
