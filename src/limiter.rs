//! Token-bucket rate limiting.
//!
//! A [`TokenBucket`] refills continuously at a fixed [`Rate`] up to its burst
//! capacity. A [`MultiLimiter`] stacks several limiters so that a caller only
//! proceeds once every one of them granted a token, e.g. "1 request every
//! 2 seconds, and never more than 20 per minute".

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::RateLimitError;
use crate::util;

/// Steady-state rate in events per second.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Rate(f64);

impl Rate {
    /// `events` spread evenly over `duration`.
    pub fn per(events: u32, duration: Duration) -> Self {
        if duration.is_zero() {
            return Self(f64::INFINITY);
        }
        Self(events as f64 / duration.as_secs_f64())
    }

    /// One event every `interval`.
    pub fn every(interval: Duration) -> Self {
        Self::per(1, interval)
    }

    pub fn per_second(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}/s", self.0)
    }
}

#[async_trait]
pub trait RateLimit: Send + Sync {
    /// Wait until a token is available.
    ///
    /// Fails without consuming a token when the deadline has already passed
    /// or the token would only become available after it. Dropping the
    /// returned future cancels the wait.
    async fn wait(&self, deadline: Option<Instant>) -> Result<(), RateLimitError>;

    /// Configured steady-state rate.
    fn limit(&self) -> Rate;
}

pub struct TokenBucket {
    rate: Rate,
    burst: u32,
    state: Mutex<BucketState>,
}

struct BucketState {
    // Goes negative while callers hold reservations they are sleeping on.
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    /// Creates a full bucket. A burst of zero is treated as one.
    pub fn new(rate: Rate, burst: u32) -> Self {
        let burst = burst.max(1);
        Self {
            rate,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst as f64,
                last: Instant::now(),
            }),
        }
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Reserves one token and returns how long the caller must sleep
    /// before using it.
    fn reserve(&self, now: Instant, deadline: Option<Instant>) -> Result<Duration, RateLimitError> {
        let mut state = util::lock(&self.state);

        let elapsed = now.saturating_duration_since(state.last);
        let refill = elapsed.as_secs_f64() * self.rate.per_second();
        state.tokens = (state.tokens + refill).min(self.burst as f64);
        state.last = now;

        let tokens = state.tokens - 1.0;
        let delay = if tokens >= 0.0 {
            Duration::ZERO
        } else if self.rate.per_second() <= 0.0 {
            return Err(RateLimitError::Unsatisfiable);
        } else {
            Duration::from_secs_f64(-tokens / self.rate.per_second())
        };

        if let Some(deadline) = deadline {
            if now + delay > deadline {
                return Err(RateLimitError::WouldExceedDeadline(delay));
            }
        }

        state.tokens = tokens;
        Ok(delay)
    }
}

// A token reserved by a caller still sleeping on it. Goes back to the
// bucket if the caller is dropped before the sleep completes.
struct Reservation<'a> {
    bucket: &'a TokenBucket,
    used: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.used {
            let mut state = util::lock(&self.bucket.state);
            state.tokens = (state.tokens + 1.0).min(self.bucket.burst as f64);
        }
    }
}

#[async_trait]
impl RateLimit for TokenBucket {
    async fn wait(&self, deadline: Option<Instant>) -> Result<(), RateLimitError> {
        let now = Instant::now();
        if let Some(deadline) = deadline {
            if deadline <= now {
                return Err(RateLimitError::Deadline);
            }
        }

        let delay = self.reserve(now, deadline)?;
        if !delay.is_zero() {
            let mut reservation = Reservation {
                bucket: self,
                used: false,
            };
            tokio::time::sleep(delay).await;
            reservation.used = true;
        }
        Ok(())
    }

    fn limit(&self) -> Rate {
        self.rate
    }
}

/// Aggregates several limiters, most restrictive first.
///
/// Every constituent is charged on each successful `wait`, regardless of
/// which one is binding.
pub struct MultiLimiter {
    limiters: Vec<Arc<dyn RateLimit>>,
}

impl MultiLimiter {
    pub fn new(mut limiters: Vec<Arc<dyn RateLimit>>) -> Self {
        limiters.sort_by(|a, b| {
            a.limit()
                .partial_cmp(&b.limit())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Self { limiters }
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}

#[async_trait]
impl RateLimit for MultiLimiter {
    async fn wait(&self, deadline: Option<Instant>) -> Result<(), RateLimitError> {
        for limiter in self.limiters.iter() {
            limiter.wait(deadline).await?;
        }
        Ok(())
    }

    /// Rate of the most restrictive constituent; unlimited when empty.
    fn limit(&self) -> Rate {
        self.limiters
            .first()
            .map(|l| l.limit())
            .unwrap_or(Rate(f64::INFINITY))
    }
}
