//! Identifier types shared across the forwarder crates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic milliseconds since forwarder start.
pub type Ticks = u64;

/// Unique identifier for a connection in the connection table.
///
/// Assigned once at creation from a monotonically increasing 32-bit counter
/// and never reused for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
