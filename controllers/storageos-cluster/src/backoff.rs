//! # Fibonacci Backoff
//!
//! Provides a Fibonacci-based backoff for failed reconciliation passes.
//! The delay grows more slowly than exponential backoff, so a cluster stuck on
//! a transient platform error is retried often at first without hammering the
//! API server later on.
//!
//! Default sequence for reconciliation errors: 5s, 5s, 10s, 15s, 25s, 40s,
//! 65s, 105s, 170s, 275s, 300s (max).

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each backoff is the sum of the previous two, capped at `max`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Minimum backoff (for reset)
    min: Duration,
    /// Previous backoff value
    prev: Duration,
    /// Current backoff value
    current: Duration,
    /// Maximum backoff value
    max: Duration,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff between `min` and `max`.
    ///
    /// # Arguments
    ///
    /// * `min` - Backoff used for the first two retries
    /// * `max` - Cap of the sequence
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            prev: Duration::ZERO,
            current: min,
            max,
        }
    }

    /// Backoff used by the control loop: 5 seconds up to 5 minutes
    #[must_use]
    pub fn for_reconcile() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(300))
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;

        let next = self.prev.saturating_add(self.current);
        self.prev = self.current;
        self.current = std::cmp::min(next, self.max);

        result
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev = Duration::ZERO;
        self.current = self.min;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(backoff: &mut FibonacciBackoff) -> u64 {
        backoff.next_backoff().as_secs()
    }

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::for_reconcile();

        assert_eq!(secs(&mut backoff), 5);
        assert_eq!(secs(&mut backoff), 5);
        assert_eq!(secs(&mut backoff), 10);
        assert_eq!(secs(&mut backoff), 15);
        assert_eq!(secs(&mut backoff), 25);
        assert_eq!(secs(&mut backoff), 40);
        assert_eq!(secs(&mut backoff), 65);
        assert_eq!(secs(&mut backoff), 105);
        assert_eq!(secs(&mut backoff), 170);
        assert_eq!(secs(&mut backoff), 275);
        assert_eq!(secs(&mut backoff), 300); // max
    }

    #[test]
    fn test_fibonacci_backoff_max_cap() {
        let mut backoff = FibonacciBackoff::new(Duration::from_secs(1), Duration::from_secs(10));

        for _ in 0..6 {
            backoff.next_backoff();
        }
        // 1, 1, 2, 3, 5, 8 consumed; next would be 13 but is capped
        assert_eq!(secs(&mut backoff), 10);
        assert_eq!(secs(&mut backoff), 10);
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::for_reconcile();

        assert_eq!(secs(&mut backoff), 5);
        assert_eq!(secs(&mut backoff), 5);
        assert_eq!(secs(&mut backoff), 10);

        backoff.reset();

        // Should restart from beginning after success
        assert_eq!(secs(&mut backoff), 5);
        assert_eq!(secs(&mut backoff), 5);
        assert_eq!(secs(&mut backoff), 10);
    }
}
