//! Error types for the ccnfwd forwarder.

use thiserror::Error;

/// All possible errors that can occur within the forwarder libraries.
#[derive(Error, Debug)]
pub enum Error {
    /// Error raised by the TLV codec while parsing or encoding a packet.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Error parsing an `lci:` URI into a name.
    #[error("name parse error: {0}")]
    NameParse(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

/// The categories of wire-format violation the codec can detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecErrorKind {
    /// Fixed-header version is not 1.
    VersionMismatch,
    /// Packet type or top-level TLV type outside the accepted set.
    UnsupportedType,
    /// A length field runs past the end of its container.
    BeyondPacketEnd,
    /// A container's children do not exactly fill it.
    Overrun,
    /// A TLV required for the declared message type is absent.
    MissingMandatory,
    /// A fixed-size TLV carries a value of the wrong length.
    NotFixedSize,
}

/// A decode or encode failure, pinned to the first offending byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{kind:?} at byte {offset}")]
pub struct CodecError {
    pub kind: CodecErrorKind,
    pub offset: usize,
}

impl CodecError {
    pub fn new(kind: CodecErrorKind, offset: usize) -> Self {
        Self { kind, offset }
    }
}
