//! The ccnfwd data plane.
//!
//! Everything that decides what happens to a packet lives here: the
//! connection table, the pending interest table, the FIB with its
//! forwarding strategies, the content store, and the message processor
//! that glues them together. I/O lives in `rust-ccnfwd-io`; this crate is
//! transport-agnostic and single-threaded by design.

pub mod clock;
pub mod conn_table;
pub mod connection;
pub mod cs;
pub mod fib;
pub mod forwarder;
pub mod messenger;
pub mod pit;
pub mod strategy;

pub use forwarder::Forwarder;
