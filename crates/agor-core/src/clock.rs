//! The clock seam.
//!
//! Time-dependent logic (resume staleness, decided-at stamps) reads the
//! clock through this trait so tests can pin it.

use crate::types::Timestamp;
use std::sync::Mutex;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> Timestamp;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock pinned to a settable instant, for tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    /// Create a clock pinned at `start`.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Advance the clock.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (test-only type).
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().expect("manual clock lock");
        *now = Timestamp(now.0 + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().expect("manual clock lock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(Timestamp::now());
        let before = clock.now();
        clock.advance(chrono::Duration::hours(25));
        let after = clock.now();
        assert_eq!(after.since(before), chrono::Duration::hours(25));
    }
}
