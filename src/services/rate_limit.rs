//! Process-wide token bucket guarding mutating and login endpoints

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::{
    config::RateLimitConfig,
    error::{AppError, AppResult},
};

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket refilled continuously at `rate` tokens per second, holding at
/// most `burst` tokens.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    rate: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::starting_at(config, Instant::now())
    }

    fn starting_at(config: &RateLimitConfig, start: Instant) -> Self {
        let burst = f64::from(config.burst.max(1));
        Self {
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: start,
            }),
            rate: f64::from(config.rate_per_second.max(1)),
            burst,
        }
    }

    /// Time for one token to come back
    pub fn refill_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate)
    }

    /// Take one token or fail with `TooManyRequests`
    pub fn check(&self) -> AppResult<()> {
        self.check_at(Instant::now())
    }

    fn check_at(&self, now: Instant) -> AppResult<()> {
        let mut bucket = self.bucket.lock();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        if !elapsed.is_zero() {
            bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.rate).min(self.burst);
            bucket.last_refill = now;
        }

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let retry_after = (1.0 - bucket.tokens) / self.rate;
            tracing::warn!("Rate limit exceeded, retry in {:.3}s", retry_after);
            Err(AppError::TooManyRequests)
        }
    }
}
