//! Shared request-rate limiting
//!
//! Uses the governor crate for token bucket accounting. One limiter is
//! shared by every worker of a harvest run; `acquire` admits callers in
//! arrival order, so no worker can starve while the ceiling is positive.

use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as Governor};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::{Arc, RwLock};
use std::time::Duration;

type DirectGovernor = Governor<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Requests-per-second ceiling for a harvest run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateBudget {
    /// Maximum number of requests per second
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    /// Burst size (max tokens in bucket)
    #[serde(default = "default_burst")]
    pub burst: u32,
}

fn default_requests_per_second() -> u32 {
    10
}

fn default_burst() -> u32 {
    10
}

impl Default for RateBudget {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
        }
    }
}

impl RateBudget {
    /// Create a new rate budget
    pub fn new(requests_per_second: u32, burst: u32) -> Self {
        Self {
            requests_per_second,
            burst,
        }
    }

    /// Budget for a single slow request per second
    pub fn low_throughput() -> Self {
        Self::new(1, 1)
    }

    fn quota(&self) -> Quota {
        let one = NonZeroU32::new(1).unwrap();
        Quota::per_second(NonZeroU32::new(self.requests_per_second).unwrap_or(one))
            .allow_burst(NonZeroU32::new(self.burst).unwrap_or(one))
    }
}

/// Token bucket rate limiter shared across all in-flight requests.
///
/// Cloning shares the underlying bucket, so a clone handed to each worker
/// still enforces one system-wide ceiling. Reconfiguring swaps the bucket;
/// acquisitions already waiting finish against the old quota.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<RwLock<Arc<DirectGovernor>>>,
    budget: Arc<RwLock<RateBudget>>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given budget
    pub fn new(budget: RateBudget) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(Governor::direct(budget.quota())))),
            budget: Arc::new(RwLock::new(budget)),
        }
    }

    /// Wait until issuing one more request stays within the ceiling.
    ///
    /// Returns having reserved one request slot. Safe for concurrent use;
    /// waiters are admitted in arrival order.
    pub async fn acquire(&self) {
        let governor = Arc::clone(&self.inner.read().expect("rate limiter lock poisoned"));
        governor.until_ready().await;
    }

    /// Try to reserve a slot without waiting
    pub fn try_acquire(&self) -> bool {
        let governor = Arc::clone(&self.inner.read().expect("rate limiter lock poisoned"));
        governor.check().is_ok()
    }

    /// Wait for admission, giving up after `timeout`
    pub async fn acquire_with_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.acquire()).await.is_ok()
    }

    /// Replace the budget. Takes effect for subsequent acquisitions only.
    pub fn reconfigure(&self, budget: RateBudget) {
        let mut governor = self.inner.write().expect("rate limiter lock poisoned");
        *governor = Arc::new(Governor::direct(budget.quota()));
        *self.budget.write().expect("rate limiter lock poisoned") = budget;
    }

    /// The currently configured budget
    pub fn budget(&self) -> RateBudget {
        *self.budget.read().expect("rate limiter lock poisoned")
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateBudget::default())
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("budget", &self.budget())
            .finish()
    }
}

#[cfg(test)]
mod rate_limit_tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_rate_budget_default() {
        let budget = RateBudget::default();
        assert_eq!(budget.requests_per_second, 10);
        assert_eq!(budget.burst, 10);
    }

    #[test]
    fn test_rate_budget_new() {
        let budget = RateBudget::new(50, 25);
        assert_eq!(budget.requests_per_second, 50);
        assert_eq!(budget.burst, 25);
    }

    #[tokio::test]
    async fn test_limiter_allows_burst() {
        let limiter = RateLimiter::new(RateBudget::new(10, 5));

        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_acquire_within_burst_does_not_block() {
        let limiter = RateLimiter::new(RateBudget::new(100, 10));
        limiter.acquire().await;
    }

    #[tokio::test]
    async fn test_acquire_with_timeout() {
        let limiter = RateLimiter::new(RateBudget::new(100, 10));
        assert!(
            limiter
                .acquire_with_timeout(Duration::from_millis(100))
                .await
        );
    }

    #[tokio::test]
    async fn test_reconfigure_applies_to_subsequent_acquisitions() {
        let limiter = RateLimiter::new(RateBudget::new(1, 1));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        limiter.reconfigure(RateBudget::new(100, 100));
        assert_eq!(limiter.budget().requests_per_second, 100);
        assert!(limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_concurrent_acquires_respect_ceiling() {
        // 20 rps, burst 1: 5 concurrent acquisitions need at least ~200ms.
        let limiter = RateLimiter::new(RateBudget::new(20, 1));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }

        let mut stamps = Vec::new();
        for handle in handles {
            stamps.push(handle.await.unwrap());
        }
        stamps.sort();

        // No sliding 1s window may contain more than 20 admissions; with
        // burst 1 the 5th grant cannot land before 4 refill intervals.
        let elapsed = stamps.last().unwrap().duration_since(start);
        assert!(
            elapsed >= Duration::from_millis(180),
            "5 acquires finished too quickly: {elapsed:?}"
        );
    }
}
