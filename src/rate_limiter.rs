//! Sliding-window admission control
//!
//! Counts admitted events inside a trailing time window. Admission (`check`)
//! and recording (`add`) are separate calls so a rejected caller can queue the
//! work and retry on a later tick instead of dropping it. Pruning is lazy:
//! expired timestamps are removed when the limiter is next consulted.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    /// Admitted timestamps, oldest first
    timestamps: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            timestamps: VecDeque::with_capacity(limit),
        }
    }

    pub fn from_millis(limit: usize, window_ms: u64) -> Self {
        Self::new(limit, Duration::from_millis(window_ms))
    }

    /// Whether one more event fits in the window right now
    pub fn check(&mut self) -> bool {
        self.check_at(Instant::now())
    }

    /// Record an admitted event now
    pub fn add(&mut self) {
        self.add_at(Instant::now());
    }

    /// `check` followed by `add` when admitted
    pub fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        if self.check_at(now) {
            self.add_at(now);
            true
        } else {
            false
        }
    }

    pub fn check_at(&mut self, now: Instant) -> bool {
        self.prune(now);
        self.timestamps.len() < self.limit
    }

    pub fn add_at(&mut self, now: Instant) {
        self.timestamps.push_back(now);
    }

    /// Time until the oldest admitted event leaves the window
    pub fn time_until_available(&mut self, now: Instant) -> Duration {
        self.prune(now);
        if self.timestamps.len() < self.limit {
            return Duration::ZERO;
        }
        self.timestamps
            .front()
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Events currently counted in the window
    pub fn count(&mut self) -> usize {
        self.prune(Instant::now());
        self.timestamps.len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn reset(&mut self) {
        self.timestamps.clear();
    }

    fn prune(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.window) else {
            return;
        };
        while let Some(oldest) = self.timestamps.front() {
            if *oldest < cutoff {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_admission() {
        let mut limiter = RateLimiter::from_millis(3, 1000);
        let t0 = Instant::now();

        for _ in 0..3 {
            assert!(limiter.check_at(t0));
            limiter.add_at(t0);
        }
        assert!(!limiter.check_at(t0));
        assert!(!limiter.check_at(t0 + Duration::from_millis(999)));
        assert!(limiter.check_at(t0 + Duration::from_millis(1001)));
    }

    #[test]
    fn test_check_does_not_record() {
        let mut limiter = RateLimiter::from_millis(1, 1000);
        let t0 = Instant::now();
        assert!(limiter.check_at(t0));
        assert!(limiter.check_at(t0));
        limiter.add_at(t0);
        assert!(!limiter.check_at(t0));
    }

    #[test]
    fn test_partial_expiry() {
        let mut limiter = RateLimiter::from_millis(2, 1000);
        let t0 = Instant::now();
        limiter.add_at(t0);
        limiter.add_at(t0 + Duration::from_millis(500));

        assert!(!limiter.check_at(t0 + Duration::from_millis(900)));
        assert!(limiter.check_at(t0 + Duration::from_millis(1200)));
        assert_eq!(
            limiter.time_until_available(t0 + Duration::from_millis(1200)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_time_until_available() {
        let mut limiter = RateLimiter::from_millis(1, 1000);
        let t0 = Instant::now();
        limiter.add_at(t0);
        assert_eq!(
            limiter.time_until_available(t0 + Duration::from_millis(400)),
            Duration::from_millis(600)
        );
    }
}
