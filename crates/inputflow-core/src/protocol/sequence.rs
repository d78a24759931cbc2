//! Thread-safe sequence counter for dispatch entries.
//!
//! # What is a dispatch sequence number? (for beginners)
//!
//! Every event handed to a client channel carries a 32-bit *sequence number*.
//! When the client has finished handling the event it sends that number back
//! in a *finished signal*, and the dispatcher uses it to find the matching
//! entry in the connection's wait queue.
//!
//! Zero is reserved to mean "no sequence", so the counter skips it when it
//! wraps around.
//!
//! # Thread safety
//!
//! The counter is an `AtomicU32` updated with a compare-and-swap loop, so any
//! number of threads may draw numbers concurrently without ever receiving the
//! same value twice (until the 32-bit space wraps).

use std::sync::atomic::{AtomicU32, Ordering};

/// A thread-safe counter that yields `1, 2, 3, …, u32::MAX, 1, 2, …`.
///
/// # Examples
///
/// ```rust
/// use inputflow_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 1);
/// assert_eq!(counter.next(), 2);
/// ```
pub struct SequenceCounter {
    /// The value most recently handed out (0 before the first call).
    inner: AtomicU32,
}

impl SequenceCounter {
    pub const fn new() -> Self {
        Self {
            inner: AtomicU32::new(0),
        }
    }

    /// Returns the next sequence number.  Never returns 0.
    pub fn next(&self) -> u32 {
        let mut current = self.inner.load(Ordering::Relaxed);
        loop {
            let next = match current.wrapping_add(1) {
                0 => 1,
                n => n,
            };
            match self.inner.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Returns the most recently issued value without advancing.
    pub fn current(&self) -> u32 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

static DISPATCH_SEQ: SequenceCounter = SequenceCounter::new();

/// Draws a process-wide unique dispatch sequence number.
pub fn next_dispatch_seq() -> u32 {
    DISPATCH_SEQ.next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_sequence_counter_starts_at_one() {
        // Arrange
        let counter = SequenceCounter::new();

        // Act
        let first = counter.next();

        // Assert
        assert_eq!(first, 1);
    }

    #[test]
    fn test_sequence_counter_skips_zero_on_wrap() {
        // Arrange – start the counter one step before overflow
        let counter = SequenceCounter {
            inner: AtomicU32::new(u32::MAX - 1),
        };

        // Act
        let last = counter.next();
        let wrapped = counter.next();

        // Assert
        assert_eq!(last, u32::MAX);
        assert_eq!(wrapped, 1, "zero is reserved and must be skipped");
    }

    #[test]
    fn test_sequence_counter_is_thread_safe() {
        // Arrange
        let counter = Arc::new(SequenceCounter::new());
        let thread_count = 8;
        let increments_per_thread = 1000;

        // Act – draw from many threads simultaneously
        let handles: Vec<_> = (0..thread_count)
            .map(|_| {
                let c = Arc::clone(&counter);
                thread::spawn(move || {
                    (0..increments_per_thread)
                        .map(|_| c.next())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all_values: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread panicked"))
            .collect();

        // Assert
        all_values.sort_unstable();
        all_values.dedup();
        assert_eq!(all_values.len(), thread_count * increments_per_thread);
        assert!(!all_values.contains(&0));
    }

    #[test]
    fn test_current_does_not_advance() {
        let counter = SequenceCounter::new();
        counter.next();

        assert_eq!(counter.current(), 1);
        assert_eq!(counter.next(), 2);
    }

    #[test]
    fn test_global_dispatch_seq_is_nonzero() {
        assert_ne!(next_dispatch_seq(), 0);
    }
}
