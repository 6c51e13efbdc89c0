//! Transports and the event loop for the ccnfwd forwarder.
//!
//! The dispatcher owns the data plane and consumes a single event queue;
//! UDP, TCP, UNIX and raw-Ethernet transports feed complete packets into
//! it. Configuration enters through `ForwarderHandle` on the same queue.

pub mod dispatcher;
pub mod ether;
pub mod framing;
mod handle;
mod listener;
pub mod local;
mod stream;
mod threaded;
mod udp;

pub use dispatcher::{ConnectSpec, Dispatcher, ListenerSpec};
pub use handle::ForwarderHandle;
pub use local::LocalEndpoint;
pub use threaded::ThreadedForwarder;
