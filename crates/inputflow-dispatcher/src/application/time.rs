//! Monotonic clock seam.
//!
//! Every timeout the dispatcher enforces (app switch, stale events, the ANR
//! window, key repeat) is computed from a [`TimeSource`].  Production code uses
//! [`SystemTimeSource`]; tests drive a [`ManualTimeSource`] forward by hand.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use inputflow_core::Nanos;

/// A source of monotonic time in nanoseconds.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Nanos;
}

/// Nanoseconds elapsed since the source was created.
#[derive(Debug)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Nanos {
        duration_to_nanos(self.origin.elapsed())
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    now: AtomicI64,
}

impl ManualTimeSource {
    pub fn new(start: Nanos) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, now: Nanos) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(duration_to_nanos(by), Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Nanos {
        self.now.load(Ordering::SeqCst)
    }
}

/// Converts a duration to nanoseconds, saturating at `Nanos::MAX`.
pub fn duration_to_nanos(duration: Duration) -> Nanos {
    Nanos::try_from(duration.as_nanos()).unwrap_or(Nanos::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_time_source_advances() {
        // Arrange
        let clock = ManualTimeSource::new(100);

        // Act
        clock.advance(Duration::from_millis(2));

        // Assert
        assert_eq!(clock.now(), 100 + 2_000_000);
    }

    #[test]
    fn test_system_time_source_is_monotonic() {
        let clock = SystemTimeSource::new();

        let a = clock.now();
        let b = clock.now();

        assert!(b >= a);
    }

    #[test]
    fn test_duration_to_nanos_saturates() {
        assert_eq!(duration_to_nanos(Duration::MAX), Nanos::MAX);
        assert_eq!(duration_to_nanos(Duration::from_micros(3)), 3_000);
    }
}
