//! Forwarder time: monotonic ticks for the data plane, wall-clock
//! milliseconds for absolute expiry times.
//!
//! A manual clock lets tests drive expiry without sleeping.

use rust_ccnfwd_common::types::Ticks;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug)]
enum Source {
    System { start: Instant },
    Manual { ticks: Ticks, epoch_ms: u64 },
}

#[derive(Debug)]
pub struct Clock {
    source: Source,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            source: Source::System {
                start: Instant::now(),
            },
        }
    }

    /// A clock that only moves when told to.
    pub fn manual() -> Self {
        Self {
            source: Source::Manual {
                ticks: 0,
                epoch_ms: 1_000_000_000_000,
            },
        }
    }

    /// Monotonic milliseconds since forwarder start.
    pub fn ticks(&self) -> Ticks {
        match &self.source {
            Source::System { start } => start.elapsed().as_millis() as Ticks,
            Source::Manual { ticks, .. } => *ticks,
        }
    }

    /// Wall-clock milliseconds since the epoch.
    pub fn epoch_ms(&self) -> u64 {
        match &self.source {
            Source::System { .. } => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            Source::Manual { epoch_ms, .. } => *epoch_ms,
        }
    }

    /// Advance a manual clock. No-op on a system clock.
    pub fn advance(&mut self, ms: u64) {
        if let Source::Manual { ticks, epoch_ms } = &mut self.source {
            *ticks += ms;
            *epoch_ms += ms;
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
