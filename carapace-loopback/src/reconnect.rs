//! Redial backoff.

use std::time::Duration;

/// Doubling cap applied to the attempt counter so the shift never overflows.
const MAX_DOUBLINGS: u32 = 16;

/// Tracks how long a dialer waits before its next connection attempt.
///
/// The first wait is `min`; each further failure doubles it, up to `max`.
/// A `max` of zero, or one below `min`, keeps every wait at `min`.
///
/// ```rust
/// use carapace_loopback::reconnect::ReconnectState;
/// use std::time::Duration;
///
/// let mut backoff = ReconnectState::new(Duration::from_millis(10), Duration::from_millis(35));
/// let waits: Vec<_> = (0..4).map(|_| backoff.next_delay().as_millis()).collect();
/// assert_eq!(waits, [10, 20, 35, 35]);
///
/// backoff.reset();
/// assert_eq!(backoff.next_delay(), Duration::from_millis(10));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectState {
    min: Duration,
    max: Duration,
    failures: u32,
}

impl ReconnectState {
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            failures: 0,
        }
    }

    /// Wait for the upcoming attempt; counts it as a failure.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1_u32 << self.failures.min(MAX_DOUBLINGS);
        self.failures = self.failures.saturating_add(1);
        self.min.saturating_mul(factor).min(self.max)
    }

    /// Called once a connection is established.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Attempts scheduled since the last reset.
    #[inline]
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_doubles_until_capped() {
        let mut backoff = ReconnectState::new(ms(100), ms(500));
        let waits: Vec<_> = (0..5).map(|_| backoff.next_delay()).collect();
        assert_eq!(waits, [ms(100), ms(200), ms(400), ms(500), ms(500)]);
        assert_eq!(backoff.attempt(), 5);
    }

    #[test]
    fn test_fixed_when_max_unset() {
        let mut backoff = ReconnectState::new(ms(50), Duration::ZERO);
        assert!((0..5).all(|_| backoff.next_delay() == ms(50)));
    }

    #[test]
    fn test_many_failures_do_not_overflow() {
        let mut backoff = ReconnectState::new(Duration::from_secs(1), Duration::from_secs(3600));
        for _ in 0..100 {
            assert!(backoff.next_delay() <= Duration::from_secs(3600));
        }
    }

    #[test]
    fn test_reset_restarts_at_min() {
        let mut backoff = ReconnectState::new(ms(100), Duration::from_secs(10));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), ms(100));
    }
}
