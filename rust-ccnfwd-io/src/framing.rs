//! Packet framing for stream transports.
//!
//! TCP and UNIX streams carry back-to-back packets; the fixed header's
//! packet-length field is the frame boundary.

use bytes::{Bytes, BytesMut};
use rust_ccnfwd_common::tlv;
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Splits a byte stream into whole packets by the fixed-header length.
#[derive(Debug, Default)]
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        if src.len() < tlv::FIXED_HEADER_LENGTH {
            return Ok(None);
        }
        let packet_length =
            u16::from_be_bytes([src[tlv::OFF_PACKET_LENGTH], src[tlv::OFF_PACKET_LENGTH + 1]])
                as usize;
        if packet_length < tlv::FIXED_HEADER_LENGTH {
            // The stream is out of sync; there is no way to resynchronize.
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame length {packet_length} below fixed header size"),
            ));
        }
        if src.len() < packet_length {
            src.reserve(packet_length - src.len());
            return Ok(None);
        }
        Ok(Some(src.split_to(packet_length).freeze()))
    }
}

impl Encoder<Bytes> for PacketCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), io::Error> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_ccnfwd_common::builder::InterestBuilder;
    use rust_ccnfwd_common::name::Name;

    fn packet(uri: &str) -> Bytes {
        InterestBuilder::new(Name::from_uri(uri).unwrap()).build()
    }

    #[test]
    fn splits_back_to_back_packets() {
        let a = packet("lci:/a");
        let b = packet("lci:/bbbb");
        let mut stream = BytesMut::new();
        stream.extend_from_slice(&a);
        stream.extend_from_slice(&b);

        let mut codec = PacketCodec;
        assert_eq!(codec.decode(&mut stream).unwrap(), Some(a));
        assert_eq!(codec.decode(&mut stream).unwrap(), Some(b));
        assert_eq!(codec.decode(&mut stream).unwrap(), None);
    }

    #[test]
    fn waits_for_partial_packet() {
        let a = packet("lci:/partial");
        let mut stream = BytesMut::from(&a[..a.len() - 3]);
        let mut codec = PacketCodec;
        assert_eq!(codec.decode(&mut stream).unwrap(), None);
        stream.extend_from_slice(&a[a.len() - 3..]);
        assert_eq!(codec.decode(&mut stream).unwrap(), Some(a));
    }

    #[test]
    fn bogus_length_is_fatal() {
        let mut stream = BytesMut::from(&[0x01u8, 0x00, 0x00, 0x02, 0, 0, 0, 8][..]);
        let mut codec = PacketCodec;
        assert!(codec.decode(&mut stream).is_err());
    }
}
