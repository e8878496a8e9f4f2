//! Token-bucket rate limiting for remote control-plane calls (§4.1).
//!
//! One bucket per [`ResourceKind`], each independently refilled, so a burst
//! of cluster creates can't starve database-user calls of their own budget.
//! Buckets live behind a `parking_lot::RwLock`: lookups and refills are
//! short, synchronous critical sections that never hold the lock across an
//! `.await`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reconciler_common::{ReconcileError, ResourceKind};
use tokio::sync::watch;

use crate::cancellation::sleep_or_cancel;

/// A single token bucket: `capacity` tokens max, refilled at `refill_rate`
/// tokens/second, lazily caught up on every access.
#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Tries to take one token, returning `true` on success. If there isn't
    /// one, returns the duration the caller should wait before retrying.
    fn try_acquire(&mut self) -> Result<(), Duration> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_rate))
        }
    }
}

/// Per-kind rate limit configuration: how many calls per second a kind is
/// allowed to sustain, and how large a burst it can absorb.
#[derive(Clone, Copy, Debug)]
pub struct RateLimitConfig {
    pub capacity: f64,
    pub refill_per_second: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 5.0,
            refill_per_second: 1.0,
        }
    }
}

/// Rate limits calls to the remote control plane, one bucket per resource
/// kind. Cloning a `RateLimiter` is cheap; clones share the same buckets.
#[derive(Clone)]
pub struct RateLimiter {
    inner: std::sync::Arc<Inner>,
}

struct Inner {
    default_config: RateLimitConfig,
    overrides: HashMap<ResourceKind, RateLimitConfig>,
    buckets: Mutex<HashMap<ResourceKind, TokenBucket>>,
}

impl RateLimiter {
    pub fn new(default_config: RateLimitConfig) -> Self {
        Self::with_overrides(default_config, HashMap::new())
    }

    pub fn with_overrides(
        default_config: RateLimitConfig,
        overrides: HashMap<ResourceKind, RateLimitConfig>,
    ) -> Self {
        Self {
            inner: std::sync::Arc::new(Inner {
                default_config,
                overrides,
                buckets: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn config_for(&self, kind: ResourceKind) -> RateLimitConfig {
        self.inner
            .overrides
            .get(&kind)
            .copied()
            .unwrap_or(self.inner.default_config)
    }

    /// Blocks until a token for `kind` is available, sleeping between
    /// polls. The bucket map is only ever locked for the arithmetic inside
    /// `try_acquire`, never across an `.await`. Fails with `Cancelled`
    /// rather than blocking past a cancellation request on a saturated
    /// bucket.
    pub async fn acquire(
        &self,
        kind: ResourceKind,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), ReconcileError> {
        loop {
            let wait = {
                let mut buckets = self.inner.buckets.lock();
                let config = self.config_for(kind);
                let bucket = buckets
                    .entry(kind)
                    .or_insert_with(|| TokenBucket::new(config.capacity, config.refill_per_second));
                bucket.try_acquire()
            };
            match wait {
                Ok(()) => return Ok(()),
                Err(delay) => sleep_or_cancel(delay, cancel).await?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_never_exceeds_capacity_without_blocking() {
        let limiter = RateLimiter::new(RateLimitConfig {
            capacity: 2.0,
            refill_per_second: 1000.0,
        });
        let (_token, mut cancel) = crate::cancellation::CancellationToken::new();
        let start = Instant::now();
        limiter.acquire(ResourceKind::Cluster, &mut cancel).await.unwrap();
        limiter.acquire(ResourceKind::Cluster, &mut cancel).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn separate_kinds_have_independent_buckets() {
        let limiter = RateLimiter::new(RateLimitConfig {
            capacity: 1.0,
            refill_per_second: 0.001,
        });
        let (_token, mut cancel) = crate::cancellation::CancellationToken::new();
        limiter.acquire(ResourceKind::Cluster, &mut cancel).await.unwrap();
        let start = Instant::now();
        limiter.acquire(ResourceKind::DatabaseUser, &mut cancel).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn acquire_fails_with_cancelled_instead_of_blocking_forever() {
        let limiter = RateLimiter::new(RateLimitConfig {
            capacity: 0.0,
            refill_per_second: 0.0001,
        });
        let (token, mut cancel) = crate::cancellation::CancellationToken::new();
        token.cancel();
        let result = limiter.acquire(ResourceKind::Cluster, &mut cancel).await;
        assert!(matches!(result, Err(ReconcileError::Cancelled)));
    }
}
