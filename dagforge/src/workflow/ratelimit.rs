//! Token-bucket rate limiting for tool invocation.
//!
//! One bucket per key (by default, the tool id a task invokes), refilled
//! continuously rather than in discrete ticks so burst behavior is smooth
//! under concurrent load.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Configuration for a single rate-limited key: capacity and refill window.
#[derive(Clone, Copy, Debug)]
pub struct RateLimitConfig {
    pub max_tokens: f64,
    pub refill_window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_tokens: 10.0,
            refill_window: Duration::from_millis(1000),
        }
    }
}

/// Token-bucket limiter keyed by an arbitrary string (tool id, by default).
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn refill_rate(&self) -> f64 {
        self.config.max_tokens / self.config.refill_window.as_secs_f64()
    }

    /// Attempts to take one token for `key` immediately. Returns `true` if
    /// a token was available.
    pub fn try_acquire(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock().expect("rate limiter lock poisoned");
        let now = Instant::now();
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.config.max_tokens,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate()).min(self.config.max_tokens);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Waits until a token for `key` becomes available, polling at a short
    /// interval relative to the refill window.
    pub async fn wait_for_slot(&self, key: &str) {
        let poll_interval = (self.config.refill_window / 10).max(Duration::from_millis(1));
        while !self.try_acquire(key) {
            tokio::time::sleep(poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_up_to_capacity_then_blocks() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_tokens: 2.0,
            refill_window: Duration::from_secs(60),
        });

        assert!(limiter.try_acquire("tool-a"));
        assert!(limiter.try_acquire("tool-a"));
        assert!(!limiter.try_acquire("tool-a"));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_tokens: 1.0,
            refill_window: Duration::from_secs(60),
        });

        assert!(limiter.try_acquire("tool-a"));
        assert!(!limiter.try_acquire("tool-a"));
        assert!(limiter.try_acquire("tool-b"));
    }

    #[tokio::test]
    async fn wait_for_slot_resolves_after_refill() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_tokens: 1.0,
            refill_window: Duration::from_millis(50),
        });
        assert!(limiter.try_acquire("tool-a"));

        let start = Instant::now();
        limiter.wait_for_slot("tool-a").await;
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
