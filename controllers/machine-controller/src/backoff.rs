//! # Fibonacci Backoff
//!
//! Progressive retry delays for machines whose reconcile keeps failing with
//! transient errors. The sequence grows more slowly than exponential backoff,
//! so a cloud outage does not push retries out for hours.
//!
//! Delays are tracked in whole minutes and handed to the watcher's error
//! policy in seconds. A successful reconcile resets the machine's sequence.
//!
//! Sequence: 1m, 1m, 2m, 3m, 5m, 8m, 10m (max).

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, capped at `max_minutes`.
/// One instance is kept per resource key by the reconciler, so a failing
/// machine does not slow down retries of its healthy neighbours.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Minimum backoff value in minutes (for reset)
    min_minutes: u64,
    /// Delay handed out before the current one
    prev_minutes: u64,
    /// Delay returned by the next call
    current_minutes: u64,
    /// Upper bound; the sequence stays here once reached
    max_minutes: u64,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff with the given bounds in minutes
    ///
    /// # Arguments
    ///
    /// * `min_minutes` - First (and second) delay, and the value restored by `reset`
    /// * `max_minutes` - Cap on every later delay
    #[must_use]
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            min_minutes,
            prev_minutes: 0,
            current_minutes: min_minutes,
            max_minutes,
        }
    }

    /// Get the next backoff duration in seconds and advance the sequence
    ///
    /// The returned value is the current step; the following step is the sum
    /// of the current and previous ones, clamped to `max_minutes`.
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result_seconds = self.current_minutes * 60;

        let next_minutes = self.prev_minutes + self.current_minutes;
        self.prev_minutes = self.current_minutes;
        self.current_minutes = std::cmp::min(next_minutes, self.max_minutes);

        result_seconds
    }

    /// Reset the backoff to the initial state
    ///
    /// Called after a reconcile succeeds, so the next failure starts over at
    /// `min_minutes`.
    pub fn reset(&mut self) {
        self.prev_minutes = 0;
        self.current_minutes = self.min_minutes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(1, 10);

        assert_eq!(backoff.next_backoff_seconds(), 60);
        assert_eq!(backoff.next_backoff_seconds(), 60);
        assert_eq!(backoff.next_backoff_seconds(), 120);
        assert_eq!(backoff.next_backoff_seconds(), 180);
        assert_eq!(backoff.next_backoff_seconds(), 300);
        assert_eq!(backoff.next_backoff_seconds(), 480);
        assert_eq!(backoff.next_backoff_seconds(), 600);
        // 13m would be next; capped
        assert_eq!(backoff.next_backoff_seconds(), 600);
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::new(1, 10);

        assert_eq!(backoff.next_backoff_seconds(), 60);
        assert_eq!(backoff.next_backoff_seconds(), 60);
        assert_eq!(backoff.next_backoff_seconds(), 120);

        backoff.reset();

        assert_eq!(backoff.next_backoff_seconds(), 60);
        assert_eq!(backoff.next_backoff_seconds(), 60);
    }
}
