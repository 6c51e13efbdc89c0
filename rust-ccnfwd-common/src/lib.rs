//! Shared wire-format and data-model types for the ccnfwd forwarder.
//!
//! This crate holds everything both the data plane and the transports need
//! to agree on: the CCNx v1 TLV codec, content names, the parsed message
//! handle, packet builders, and metrics primitives.

pub mod builder;
pub mod error;
pub mod message;
pub mod metrics;
pub mod name;
pub mod skeleton;
pub mod tlv;
pub mod types;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
