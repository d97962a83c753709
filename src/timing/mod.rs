//! Monotonic media clock shared by a device's video and audio producers
//!
//! Both streams stamp samples from the same clock so the encoder can anchor
//! them to one origin.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic clock for presentation timestamps
#[derive(Debug, Clone)]
pub struct MediaClock {
    start: Arc<Instant>,
}

impl MediaClock {
    /// Create a new clock with the current instant as time zero
    pub fn new() -> Self {
        Self {
            start: Arc::new(Instant::now()),
        }
    }

    /// Create a clock from an existing start instant
    pub fn from_instant(start: Instant) -> Self {
        Self {
            start: Arc::new(start),
        }
    }

    /// Elapsed time since clock creation
    #[inline]
    pub fn now(&self) -> Duration {
        self.start.elapsed()
    }

    /// Timestamp for a given instant; instants before the start map to zero.
    #[inline]
    pub fn at(&self, instant: Instant) -> Duration {
        instant.saturating_duration_since(*self.start)
    }

    pub fn start_instant(&self) -> Instant {
        *self.start
    }
}

impl Default for MediaClock {
    fn default() -> Self {
        Self::new()
    }
}
