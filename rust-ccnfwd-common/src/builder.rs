//! Wire-format builders for Interest and Content Object packets.
//!
//! The fixed header is written with placeholder lengths and back-patched
//! once the body size is known, mirroring the encoder's container handling.

use crate::message::{Message, ReturnCode};
use crate::name::Name;
use crate::tlv::{self, TlvEncoder};
use bytes::{BufMut, Bytes, BytesMut};

/// Hop limit applied to built Interests unless overridden.
pub const DEFAULT_HOP_LIMIT: u8 = 255;

/// Builds a v1 Interest packet.
#[derive(Debug, Clone)]
pub struct InterestBuilder {
    name: Name,
    hop_limit: u8,
    lifetime_ms: Option<u64>,
    keyid_restriction: Option<Bytes>,
    hash_restriction: Option<Bytes>,
    payload: Option<Bytes>,
}

impl InterestBuilder {
    pub fn new(name: Name) -> Self {
        Self {
            name,
            hop_limit: DEFAULT_HOP_LIMIT,
            lifetime_ms: None,
            keyid_restriction: None,
            hash_restriction: None,
            payload: None,
        }
    }

    pub fn hop_limit(mut self, hop_limit: u8) -> Self {
        self.hop_limit = hop_limit;
        self
    }

    pub fn lifetime_ms(mut self, lifetime_ms: u64) -> Self {
        self.lifetime_ms = Some(lifetime_ms);
        self
    }

    /// Restrict matching to objects signed with this keyid digest.
    pub fn keyid_restriction(mut self, digest: impl Into<Bytes>) -> Self {
        self.keyid_restriction = Some(digest.into());
        self
    }

    /// Restrict matching to the object with this content hash.
    pub fn hash_restriction(mut self, digest: impl Into<Bytes>) -> Self {
        self.hash_restriction = Some(digest.into());
        self
    }

    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn build(self) -> Bytes {
        let mut optional = TlvEncoder::new();
        if let Some(lifetime) = self.lifetime_ms {
            optional.append_tlv(tlv::OPT_INTEREST_LIFETIME, &tlv::be_uint_bytes(lifetime));
        }

        let mut body = TlvEncoder::new();
        body.open_container(tlv::T_INTEREST);
        body.append_tlv(tlv::T_NAME, &self.name.to_wire());
        if let Some(digest) = &self.keyid_restriction {
            body.open_container(tlv::T_KEYID_RESTRICTION);
            body.append_tlv(tlv::T_SHA256, digest);
            body.close_container();
        }
        if let Some(digest) = &self.hash_restriction {
            body.open_container(tlv::T_HASH_RESTRICTION);
            body.append_tlv(tlv::T_SHA256, digest);
            body.close_container();
        }
        if let Some(payload) = &self.payload {
            body.append_tlv(tlv::T_PAYLOAD, payload);
        }
        body.close_container();

        assemble(tlv::PT_INTEREST, self.hop_limit, 0, optional, body)
    }
}

/// Builds a v1 Content Object packet.
#[derive(Debug, Clone)]
pub struct ContentObjectBuilder {
    name: Option<Name>,
    payload: Bytes,
    expiry_time_ms: Option<u64>,
    cache_time_ms: Option<u64>,
    keyid: Option<Bytes>,
    signature: Option<Bytes>,
}

impl ContentObjectBuilder {
    pub fn new(name: Name, payload: impl Into<Bytes>) -> Self {
        Self {
            name: Some(name),
            payload: payload.into(),
            expiry_time_ms: None,
            cache_time_ms: None,
            keyid: None,
            signature: None,
        }
    }

    /// A nameless object, reachable only through a hash restriction.
    pub fn nameless(payload: impl Into<Bytes>) -> Self {
        Self {
            name: None,
            payload: payload.into(),
            expiry_time_ms: None,
            cache_time_ms: None,
            keyid: None,
            signature: None,
        }
    }

    /// Absolute freshness deadline, milliseconds since the epoch.
    pub fn expiry_time_ms(mut self, expiry_time_ms: u64) -> Self {
        self.expiry_time_ms = Some(expiry_time_ms);
        self
    }

    /// Caching hint carried in the hop-by-hop header.
    pub fn recommended_cache_time_ms(mut self, cache_time_ms: u64) -> Self {
        self.cache_time_ms = Some(cache_time_ms);
        self
    }

    /// Attach a validation section naming the signing key. The signature
    /// bytes themselves come from an external signer.
    pub fn keyid(mut self, digest: impl Into<Bytes>) -> Self {
        self.keyid = Some(digest.into());
        self
    }

    pub fn signature(mut self, signature: impl Into<Bytes>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn build(self) -> Bytes {
        let mut optional = TlvEncoder::new();
        if let Some(cache_time) = self.cache_time_ms {
            optional.append_tlv(
                tlv::OPT_RECOMMENDED_CACHE_TIME,
                &cache_time.to_be_bytes(),
            );
        }

        let mut body = TlvEncoder::new();
        body.open_container(tlv::T_CONTENT_OBJECT);
        if let Some(name) = &self.name {
            body.append_tlv(tlv::T_NAME, &name.to_wire());
        }
        if let Some(expiry) = self.expiry_time_ms {
            body.append_tlv(tlv::T_EXPIRY_TIME, &expiry.to_be_bytes());
        }
        body.append_tlv(tlv::T_PAYLOAD, &self.payload);
        body.close_container();

        if let Some(keyid) = &self.keyid {
            body.open_container(tlv::T_VALIDATION_ALG);
            // Crypto suite container; the forwarder only reads the KeyId.
            body.open_container(0x0004);
            body.open_container(tlv::T_KEYID);
            body.append_tlv(tlv::T_SHA256, keyid);
            body.close_container();
            body.close_container();
            body.close_container();
            if let Some(signature) = &self.signature {
                body.append_tlv(tlv::T_VALIDATION_PAYLOAD, signature);
            }
        }

        assemble(tlv::PT_CONTENT_OBJECT, 0, 0, optional, body)
    }
}

/// Rewrite an Interest into an Interest Return carrying `code`.
///
/// Only the packet-type and return-code header bytes change; the message
/// body goes back to the requester untouched.
pub fn interest_return(interest: &Message, code: ReturnCode) -> Bytes {
    let mut patched = BytesMut::from(interest.bytes().as_ref());
    patched[tlv::OFF_PACKET_TYPE] = tlv::PT_INTEREST_RETURN;
    patched[tlv::OFF_RETURN_CODE] = code as u8;
    patched.freeze()
}

fn assemble(
    packet_type: u8,
    hop_limit: u8,
    flags: u8,
    optional_headers: TlvEncoder,
    body: TlvEncoder,
) -> Bytes {
    let header_length = tlv::FIXED_HEADER_LENGTH + optional_headers.len();
    let packet_length = header_length + body.len();
    debug_assert!(header_length <= u8::MAX as usize);
    debug_assert!(packet_length <= u16::MAX as usize);

    let mut out = BytesMut::with_capacity(packet_length);
    out.put_u8(tlv::WIRE_VERSION);
    out.put_u8(packet_type);
    out.put_u16(packet_length as u16);
    out.put_u8(hop_limit);
    out.put_u8(0); // reserved / return code
    out.put_u8(flags);
    out.put_u8(header_length as u8);
    out.extend_from_slice(&optional_headers.finish());
    out.extend_from_slice(&body.finish());
    out.freeze()
}

/// An 8-byte header-only probe packet, used by delay-measuring strategies.
pub fn probe_packet() -> Bytes {
    let mut out = BytesMut::with_capacity(tlv::FIXED_HEADER_LENGTH);
    out.put_u8(tlv::WIRE_VERSION);
    out.put_u8(tlv::PT_CONTROL);
    out.put_u16(tlv::FIXED_HEADER_LENGTH as u16);
    out.put_u8(0);
    out.put_u8(0);
    out.put_u8(0);
    out.put_u8(tlv::FIXED_HEADER_LENGTH as u8);
    out.freeze()
}
