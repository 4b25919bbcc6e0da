//! Token-bucket limiter bounding dequeue throughput
//!
//! The bucket holds up to `burst` tokens and refills continuously at
//! `rate` tokens per second. Each dequeue spends one token; an empty bucket
//! reports how long until the next token instead of dropping anything.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A `rate` of 0 yields an unlimited bucket
    pub fn new(rate: u32, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: f64::from(rate),
            last_refill: Instant::now(),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.refill_per_sec <= 0.0
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Spends one token, or returns the wait until one is available
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        if self.is_unlimited() {
            return Ok(());
        }

        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(missing / self.refill_per_sec))
        }
    }

    /// Whole tokens currently available
    pub fn available(&mut self) -> u32 {
        if self.is_unlimited() {
            return u32::MAX;
        }
        self.refill();
        self.tokens.floor() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_limited() {
        let mut bucket = TokenBucket::new(1, 3);

        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());

        let wait = bucket.try_acquire().unwrap_err();
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_secs(1));
    }

    #[test]
    fn test_refills_over_time() {
        let mut bucket = TokenBucket::new(100, 1);
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_err());

        std::thread::sleep(Duration::from_millis(30));
        assert!(bucket.try_acquire().is_ok());
    }

    #[test]
    fn test_unlimited() {
        let mut bucket = TokenBucket::new(0, 1);
        for _ in 0..1000 {
            assert!(bucket.try_acquire().is_ok());
        }
        assert_eq!(bucket.available(), u32::MAX);
    }
}
