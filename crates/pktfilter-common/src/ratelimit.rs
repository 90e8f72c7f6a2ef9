//! Rate-limited logging guard
//!
//! Failure paths in the filter subsystem fire once per packet under load, so
//! warn/error emission goes through a token bucket. This bounds log volume
//! only; it provides no correctness guarantee.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Token-bucket guard for log emission
///
/// One token is consumed per emitted message; tokens refill at `rate` per
/// `interval`. Shared between every site that reports the same class of
/// failure, so a storm of failing packets produces a bounded trickle of logs.
#[derive(Debug)]
pub struct LogRateLimit {
    inner: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    rate: u32,     // tokens per interval
    burst: u32,    // max tokens
    tokens: u32,   // current tokens
    interval: Duration,
    last_refill: Instant,
}

impl LogRateLimit {
    /// Create a guard allowing `rate` messages per `interval`, with bursts
    /// up to `burst`.
    pub fn new(rate: u32, burst: u32, interval: Duration) -> Self {
        Self {
            inner: Mutex::new(Bucket {
                rate,
                burst,
                tokens: burst,
                interval,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Guard matching the subsystem default: 1 message per 5 seconds.
    pub fn default_warn() -> Self {
        Self::new(1, 1, Duration::from_secs(5))
    }

    /// Consume one token; returns false when the message should be dropped.
    pub fn check(&self) -> bool {
        let mut bucket = self.inner.lock();
        bucket.refill();
        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }
}

impl Bucket {
    fn refill(&mut self) {
        let elapsed = self.last_refill.elapsed();
        let intervals = (elapsed.as_secs_f64() / self.interval.as_secs_f64()) as u32;
        if intervals > 0 {
            self.tokens = (self.tokens + intervals * self.rate).min(self.burst);
            self.last_refill = Instant::now();
        }
    }
}
