//! Reconnect delay schedule.

use std::time::Duration;

/// Doubling reconnect delay with a ceiling.
///
/// Each call to [`next_delay`](Self::next_delay) returns the current delay
/// and doubles the following one. [`reset`](Self::reset) is called once a
/// session has proven healthy, not merely opened.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            next: initial,
        }
    }

    /// Returns the delay to wait now and advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }

    /// The delay the next failure will use.
    pub fn peek(&self) -> Duration {
        self.next
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_doubles_then_resets() {
        let mut backoff = ReconnectBackoff::new(ms(1000), ms(60_000));
        assert_eq!(backoff.next_delay(), ms(1000));
        assert_eq!(backoff.next_delay(), ms(2000));
        assert_eq!(backoff.next_delay(), ms(4000));

        backoff.reset();
        assert_eq!(backoff.next_delay(), ms(1000));
    }

    #[test]
    fn test_capped() {
        let mut backoff = ReconnectBackoff::new(ms(1000), ms(60_000));
        let delays: Vec<u64> = (0..9).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(
            delays,
            vec![1000, 2000, 4000, 8000, 16000, 32000, 60000, 60000, 60000]
        );
        assert_eq!(backoff.peek(), ms(60_000));
    }

    #[test]
    fn test_max_below_initial() {
        let mut backoff = ReconnectBackoff::new(ms(500), ms(100));
        assert_eq!(backoff.next_delay(), ms(500));
        assert_eq!(backoff.next_delay(), ms(500));
    }
}
