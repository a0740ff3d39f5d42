use crate::constants::{DEFAULT_RATE_LIMIT, DEFAULT_RATE_LIMIT_WINDOW};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// A local sliding-window request counter.
///
/// Every [`check`](RateLimiter::check) records a request and reports whether more than `limit` requests have been seen
/// within the last `window`. The limiter is advisory: it never blocks, it only answers.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    requests: Mutex<VecDeque<Instant>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_LIMIT, DEFAULT_RATE_LIMIT_WINDOW)
    }
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self { limit, window, requests: Mutex::new(VecDeque::new()) }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Records a request now. Returns `true` if the caller is over the limit.
    pub fn check(&self) -> bool {
        self.check_at(Instant::now())
    }

    pub fn check_at(&self, now: Instant) -> bool {
        let mut requests = match self.requests.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        requests.retain(|ts| *ts + self.window > now);
        requests.push_back(now);
        requests.len() > self.limit
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn five_second_window_limit_two() {
        let limiter = RateLimiter::new(2, Duration::from_secs(5));
        let t0 = Instant::now();
        assert!(!limiter.check_at(t0));
        assert!(!limiter.check_at(t0 + Duration::from_secs(1)));
        assert!(limiter.check_at(t0 + Duration::from_secs(2)));
        // t0 and t0+1 have aged out, t0+2 is still inside the window
        assert!(!limiter.check_at(t0 + Duration::from_secs(6)));
        assert!(limiter.check_at(t0 + Duration::from_secs(6)));
    }

    #[tokio::test(start_paused = true)]
    async fn window_follows_the_clock() {
        let limiter = RateLimiter::default();
        assert!(!limiter.check());
        assert!(!limiter.check());
        assert!(limiter.check());
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!limiter.check());
    }
}
