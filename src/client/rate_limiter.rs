//! Token bucket throttle for outgoing fuzz requests.
//!
//! Keeps a run from overwhelming a target that is also writing a query log
//! the detector has to keep up with. The bucket starts full, so the first
//! `burst` requests go out immediately.

use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Token bucket rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    capacity: f64,
    per_second: f64,
    refilled_at: Instant,
}

impl Bucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let earned = now.duration_since(self.refilled_at).as_secs_f64() * self.per_second;
        self.tokens = (self.tokens + earned).min(self.capacity);
        self.refilled_at = now;
    }

    /// Take a token, or report how long until one is available.
    fn take(&mut self) -> Result<(), Duration> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / self.per_second))
        }
    }
}

impl RateLimiter {
    /// Allow `per_second` requests per second with bursts of up to
    /// `per_second` requests (at least one).
    #[must_use]
    pub fn new(per_second: f64) -> Self {
        Self::with_burst(per_second, per_second.max(1.0))
    }

    /// Allow `per_second` requests per second with an explicit burst size.
    #[must_use]
    pub fn with_burst(per_second: f64, burst: f64) -> Self {
        let capacity = burst.max(1.0);
        Self {
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                capacity,
                per_second,
                refilled_at: Instant::now(),
            }),
        }
    }

    /// Wait for a token. Cancel-safe.
    pub async fn acquire(&self) {
        loop {
            let wait = match self.bucket.lock().await.take() {
                Ok(()) => return,
                Err(wait) => wait,
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Take a token if one is available right now.
    #[must_use]
    pub async fn try_acquire(&self) -> bool {
        self.bucket.lock().await.take().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_is_immediate() {
        let limiter = RateLimiter::new(10.0);
        let start = Instant::now();
        for _ in 0..10 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_empty_bucket_waits() {
        let limiter = RateLimiter::new(10.0);
        for _ in 0..10 {
            limiter.acquire().await;
        }
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn test_slow_rate_still_allows_one() {
        let limiter = RateLimiter::new(0.5);
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);
    }

    #[tokio::test]
    async fn test_refill() {
        let limiter = RateLimiter::with_burst(10.0, 2.0);
        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
    }
}
