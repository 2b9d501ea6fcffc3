//! Monotonic microsecond clock
//!
//! All timestamps in a trace are measured from a per-context origin captured
//! when the clock is created. Using `Instant` keeps durations immune to
//! wall-clock adjustments: a timestamp taken later is never smaller than one
//! taken earlier within the same process run.

use std::time::Instant;

/// Microseconds since the clock origin.
pub type Micros = u64;

/// Monotonic clock with microsecond resolution.
#[derive(Debug, Clone)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    /// Create a clock whose origin is the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Current timestamp in microseconds since the clock origin.
    pub fn now(&self) -> Micros {
        self.origin.elapsed().as_micros() as Micros
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
