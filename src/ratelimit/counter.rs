//! Fixed-window counter record.

use std::time::Duration;
use tokio::time::Instant;

/// Request count for one identifier within its current window.
///
/// Counters are not synchronized themselves; the owning limiter serializes
/// access behind its map lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowCounter {
    /// Requests observed in the current window, including rejected ones
    count: u64,
    /// Instant after which the window is over
    window_reset_at: Instant,
}

impl WindowCounter {
    /// Open a window at `now` holding the first request.
    pub fn open(now: Instant, window: Duration) -> Self {
        Self {
            count: 1,
            window_reset_at: now + window,
        }
    }

    /// Record one request at `now` and return the count after recording.
    ///
    /// A request observed after the reset instant starts a new window at
    /// `now`, independent of where the old one ended.
    pub fn record(&mut self, now: Instant, window: Duration) -> u64 {
        if self.is_expired(now) {
            *self = Self::open(now, window);
        } else {
            self.count = self.count.saturating_add(1);
        }
        self.count
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn window_reset_at(&self) -> Instant {
        self.window_reset_at
    }

    /// Whether the window has fully elapsed at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.window_reset_at
    }

    /// Time left until the window resets.
    pub fn reset_after(&self, now: Instant) -> Duration {
        self.window_reset_at.saturating_duration_since(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[test]
    fn test_open_counts_first_request() {
        let now = Instant::now();
        let counter = WindowCounter::open(now, WINDOW);

        assert_eq!(counter.count(), 1);
        assert_eq!(counter.window_reset_at(), now + WINDOW);
        assert_eq!(counter.reset_after(now), WINDOW);
    }

    #[test]
    fn test_record_within_window_increments() {
        let now = Instant::now();
        let mut counter = WindowCounter::open(now, WINDOW);

        assert_eq!(counter.record(now + Duration::from_secs(1), WINDOW), 2);
        assert_eq!(counter.record(now + WINDOW, WINDOW), 3);
        assert_eq!(counter.window_reset_at(), now + WINDOW);
    }

    #[test]
    fn test_record_after_window_restarts_from_now() {
        let now = Instant::now();
        let mut counter = WindowCounter::open(now, WINDOW);
        counter.record(now, WINDOW);

        let later = now + Duration::from_secs(95);
        assert_eq!(counter.record(later, WINDOW), 1);
        assert_eq!(counter.window_reset_at(), later + WINDOW);
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Instant::now();
        let counter = WindowCounter::open(now, WINDOW);

        assert!(!counter.is_expired(now + WINDOW));
        assert!(counter.is_expired(now + WINDOW + Duration::from_millis(1)));
        assert_eq!(counter.reset_after(now + WINDOW * 2), Duration::ZERO);
    }
}
