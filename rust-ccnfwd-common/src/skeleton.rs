//! One-pass parse of a CCNx v1 packet into a skeleton of field extents.
//!
//! The skeleton records where each forwarder-relevant field sits inside the
//! wire buffer. It allocates nothing per TLV and copies no value bytes; the
//! buffer must outlive the skeleton.

use crate::error::{CodecError, CodecErrorKind};
use crate::tlv::{self, Extent, TlvIter};


/// The four packet types the data plane accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Interest,
    ContentObject,
    InterestReturn,
    Control,
}

impl PacketType {
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            tlv::PT_INTEREST => Some(Self::Interest),
            tlv::PT_CONTENT_OBJECT => Some(Self::ContentObject),
            tlv::PT_INTEREST_RETURN => Some(Self::InterestReturn),
            tlv::PT_CONTROL => Some(Self::Control),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Self::Interest => tlv::PT_INTEREST,
            Self::ContentObject => tlv::PT_CONTENT_OBJECT,
            Self::InterestReturn => tlv::PT_INTEREST_RETURN,
            Self::Control => tlv::PT_CONTROL,
        }
    }

    /// Does this packet carry an Interest message body?
    pub fn is_interest_form(self) -> bool {
        matches!(self, Self::Interest | Self::InterestReturn)
    }
}

/// Parsed field extents of one packet.
#[derive(Debug, Clone, Copy)]
pub struct TlvSkeleton {
    packet_type: PacketType,
    packet_length: u16,
    header_length: u8,
    hop_limit: Option<u8>,
    return_code: Option<u8>,
    message: Option<Extent>,
    name: Option<Extent>,
    keyid_restriction: Option<Extent>,
    hash_restriction: Option<Extent>,
    interest_lifetime: Option<Extent>,
    recommended_cache_time: Option<Extent>,
    expiry_time: Option<Extent>,
    payload: Option<Extent>,
    keyid: Option<Extent>,
    validation_alg: Option<Extent>,
    validation_payload: Option<Extent>,
}

impl TlvSkeleton {
    /// Parse `buf` into a skeleton.
    ///
    /// Bounded linear in the buffer length; the only state built is the
    /// extent set.
    pub fn parse(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < tlv::FIXED_HEADER_LENGTH {
            return Err(CodecError::new(CodecErrorKind::BeyondPacketEnd, buf.len()));
        }
        if buf[tlv::OFF_VERSION] != tlv::WIRE_VERSION {
            return Err(CodecError::new(CodecErrorKind::VersionMismatch, tlv::OFF_VERSION));
        }
        let packet_type = PacketType::from_wire(buf[tlv::OFF_PACKET_TYPE])
            .ok_or_else(|| CodecError::new(CodecErrorKind::UnsupportedType, tlv::OFF_PACKET_TYPE))?;

        let packet_length = tlv::read_u16(buf, tlv::OFF_PACKET_LENGTH);
        if (packet_length as usize) > buf.len() {
            return Err(CodecError::new(CodecErrorKind::BeyondPacketEnd, tlv::OFF_PACKET_LENGTH));
        }
        if (packet_length as usize) < buf.len() {
            return Err(CodecError::new(CodecErrorKind::Overrun, tlv::OFF_PACKET_LENGTH));
        }

        let header_length = buf[tlv::OFF_HEADER_LENGTH];
        if (header_length as usize) < tlv::FIXED_HEADER_LENGTH {
            return Err(CodecError::new(CodecErrorKind::Overrun, tlv::OFF_HEADER_LENGTH));
        }
        if header_length as u16 > packet_length {
            return Err(CodecError::new(CodecErrorKind::BeyondPacketEnd, tlv::OFF_HEADER_LENGTH));
        }

        let mut skeleton = Self {
            packet_type,
            packet_length,
            header_length,
            hop_limit: packet_type
                .is_interest_form()
                .then(|| buf[tlv::OFF_HOP_LIMIT]),
            return_code: (packet_type == PacketType::InterestReturn)
                .then(|| buf[tlv::OFF_RETURN_CODE]),
            message: None,
            name: None,
            keyid_restriction: None,
            hash_restriction: None,
            interest_lifetime: None,
            recommended_cache_time: None,
            expiry_time: None,
            payload: None,
            keyid: None,
            validation_alg: None,
            validation_payload: None,
        };

        skeleton.parse_optional_headers(buf)?;
        skeleton.parse_body(buf)?;
        Ok(skeleton)
    }

    fn parse_optional_headers(&mut self, buf: &[u8]) -> Result<(), CodecError> {
        let span = Extent::new(
            tlv::FIXED_HEADER_LENGTH,
            self.header_length as usize - tlv::FIXED_HEADER_LENGTH,
        );
        let mut it = TlvIter::new(buf, span);
        while !it.is_done() {
            let (tlv_type, value) = it.next_tlv()?;
            match tlv_type {
                tlv::OPT_INTEREST_LIFETIME if self.packet_type.is_interest_form() => {
                    if value.length > 8 {
                        return Err(CodecError::new(
                            CodecErrorKind::NotFixedSize,
                            value.offset as usize,
                        ));
                    }
                    self.interest_lifetime = Some(value);
                }
                tlv::OPT_RECOMMENDED_CACHE_TIME
                    if self.packet_type == PacketType::ContentObject =>
                {
                    if value.length != 8 {
                        return Err(CodecError::new(
                            CodecErrorKind::NotFixedSize,
                            value.offset as usize,
                        ));
                    }
                    self.recommended_cache_time = Some(value);
                }
                // Fragment headers and anything unknown are skipped by length.
                _ => {}
            }
        }
        Ok(())
    }

    fn parse_body(&mut self, buf: &[u8]) -> Result<(), CodecError> {
        let body_offset = self.header_length as usize;
        let span = Extent::new(body_offset, self.packet_length as usize - body_offset);
        let mut it = TlvIter::new(buf, span);
        while !it.is_done() {
            let at = it.position();
            let (tlv_type, value) = it.next_tlv()?;
            match tlv_type {
                tlv::T_INTEREST if self.message.is_none() => {
                    if !self.packet_type.is_interest_form() {
                        return Err(CodecError::new(CodecErrorKind::UnsupportedType, at));
                    }
                    self.message = Some(value);
                    self.parse_interest_body(buf, value)?;
                }
                tlv::T_CONTENT_OBJECT | tlv::T_MANIFEST if self.message.is_none() => {
                    if self.packet_type != PacketType::ContentObject {
                        return Err(CodecError::new(CodecErrorKind::UnsupportedType, at));
                    }
                    self.message = Some(value);
                    self.parse_content_body(buf, value)?;
                }
                tlv::T_CONTROL if self.message.is_none() => {
                    if self.packet_type != PacketType::Control {
                        return Err(CodecError::new(CodecErrorKind::UnsupportedType, at));
                    }
                    self.message = Some(value);
                }
                tlv::T_VALIDATION_ALG => {
                    self.validation_alg = Some(value);
                    self.parse_validation_alg(buf, value)?;
                }
                tlv::T_VALIDATION_PAYLOAD => {
                    self.validation_payload = Some(value);
                }
                // Unknown top-level TLVs are skipped by length.
                _ => {}
            }
        }

        match self.packet_type {
            PacketType::Control => {}
            _ if self.message.is_none() => {
                return Err(CodecError::new(CodecErrorKind::MissingMandatory, body_offset));
            }
            PacketType::Interest | PacketType::InterestReturn if self.name.is_none() => {
                return Err(CodecError::new(
                    CodecErrorKind::MissingMandatory,
                    self.message.expect("checked above").offset as usize,
                ));
            }
            _ => {}
        }
        Ok(())
    }

    fn parse_interest_body(&mut self, buf: &[u8], span: Extent) -> Result<(), CodecError> {
        let mut it = TlvIter::new(buf, span);
        while !it.is_done() {
            let (tlv_type, value) = it.next_tlv()?;
            match tlv_type {
                tlv::T_NAME => self.name = Some(value),
                tlv::T_KEYID_RESTRICTION => self.keyid_restriction = Some(value),
                tlv::T_HASH_RESTRICTION => self.hash_restriction = Some(value),
                tlv::T_PAYLOAD => self.payload = Some(value),
                _ => {}
            }
        }
        Ok(())
    }

    fn parse_content_body(&mut self, buf: &[u8], span: Extent) -> Result<(), CodecError> {
        let mut it = TlvIter::new(buf, span);
        while !it.is_done() {
            let (tlv_type, value) = it.next_tlv()?;
            match tlv_type {
                tlv::T_NAME => self.name = Some(value),
                tlv::T_PAYLOAD => self.payload = Some(value),
                tlv::T_EXPIRY_TIME => {
                    if value.length != 8 {
                        return Err(CodecError::new(
                            CodecErrorKind::NotFixedSize,
                            value.offset as usize,
                        ));
                    }
                    self.expiry_time = Some(value);
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// The validation algorithm value is one crypto-suite container; the
    /// KeyId TLV inside it identifies the signing key.
    fn parse_validation_alg(&mut self, buf: &[u8], span: Extent) -> Result<(), CodecError> {
        let mut it = TlvIter::new(buf, span);
        if it.is_done() {
            return Ok(());
        }
        let (_suite, suite_value) = it.next_tlv()?;
        let mut inner = TlvIter::new(buf, suite_value);
        while !inner.is_done() {
            let (tlv_type, value) = inner.next_tlv()?;
            if tlv_type == tlv::T_KEYID {
                self.keyid = Some(value);
            }
        }
        Ok(())
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn packet_length(&self) -> usize {
        self.packet_length as usize
    }

    pub fn header_length(&self) -> usize {
        self.header_length as usize
    }

    /// Offset where the message body (and the span hashed for the
    /// content-object hash) begins.
    pub fn body_offset(&self) -> usize {
        self.header_length as usize
    }

    pub fn hop_limit(&self) -> Option<u8> {
        self.hop_limit
    }

    pub fn return_code(&self) -> Option<u8> {
        self.return_code
    }

    pub fn message(&self) -> Option<Extent> {
        self.message
    }

    pub fn name(&self) -> Option<Extent> {
        self.name
    }

    pub fn keyid_restriction(&self) -> Option<Extent> {
        self.keyid_restriction
    }

    pub fn hash_restriction(&self) -> Option<Extent> {
        self.hash_restriction
    }

    pub fn interest_lifetime(&self) -> Option<Extent> {
        self.interest_lifetime
    }

    pub fn recommended_cache_time(&self) -> Option<Extent> {
        self.recommended_cache_time
    }

    pub fn expiry_time(&self) -> Option<Extent> {
        self.expiry_time
    }

    pub fn payload(&self) -> Option<Extent> {
        self.payload
    }

    pub fn keyid(&self) -> Option<Extent> {
        self.keyid
    }

    pub fn validation_alg(&self) -> Option<Extent> {
        self.validation_alg
    }

    pub fn validation_payload(&self) -> Option<Extent> {
        self.validation_payload
    }
}
