//! Per-source request budgeting.
//!
//! Two independent constraints are enforced for every outgoing request:
//! a rolling 60-second window budget and a minimum spacing of `60/rate`
//! seconds between consecutive requests. The limiter is single-consumer:
//! each fetcher owns its own instance and callers are strictly sequential.
//!
//! Time is injected through the `Clock` trait so the arithmetic can be
//! unit-tested without real sleeping.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use crate::config::RateLimitConfig;

/// Length of the rolling rate-limit window.
const WINDOW: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Clock abstraction
// ---------------------------------------------------------------------------

/// Source of time and sleep. Production uses the tokio timer; tests use a
/// fake that advances instantly.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

/// Real clock backed by `tokio::time`.
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

// ---------------------------------------------------------------------------
// Rate limiter
// ---------------------------------------------------------------------------

/// Rolling-window rate limiter with minimum inter-request spacing.
pub struct RateLimiter {
    /// Maximum requests per rolling 60-second window.
    rate: u32,
    window_start: Instant,
    count: u32,
    last_request: Option<Instant>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(rate: u32) -> Self {
        Self::with_clock(rate, Arc::new(TokioClock))
    }

    pub fn with_clock(rate: u32, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            rate: rate.max(1),
            window_start: now,
            count: 0,
            last_request: None,
            clock,
        }
    }

    /// Suspend until it is safe to issue the next request.
    ///
    /// On return, the request is accounted against the current window and
    /// the spacing timer. The caller must issue exactly one request per
    /// `acquire`.
    pub async fn acquire(&mut self) {
        let now = self.clock.now();

        // Reset the counter once the window has elapsed.
        if now.duration_since(self.window_start) >= WINDOW {
            self.count = 0;
            self.window_start = now;
        }

        // Window budget exhausted: wait out the remainder.
        if self.count >= self.rate {
            let elapsed = now.duration_since(self.window_start);
            if elapsed < WINDOW {
                let wait = WINDOW - elapsed;
                debug!(
                    wait_secs = wait.as_secs_f64(),
                    rate = self.rate,
                    "Rate limit window full, sleeping"
                );
                self.clock.sleep(wait).await;
            }
            self.count = 0;
            self.window_start = self.clock.now();
        }

        // Minimum spacing between any two consecutive requests, regardless
        // of window accounting.
        let min_interval = Duration::from_secs_f64(60.0 / self.rate as f64);
        if let Some(last) = self.last_request {
            let since_last = self.clock.now().duration_since(last);
            if since_last < min_interval {
                self.clock.sleep(min_interval - since_last).await;
            }
        }

        self.last_request = Some(self.clock.now());
        self.count += 1;
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Exponential-backoff retry schedule for one logical API call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts before giving up (the first attempt counts).
    pub max_retries: u32,
    /// Sleep `backoff_base ^ attempt_index` seconds between attempts.
    pub backoff_base: f64,
}

impl RetryPolicy {
    /// Backoff delay after the attempt with the given zero-based index.
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_secs_f64(self.backoff_base.powi(attempt as i32))
    }
}

impl From<&RateLimitConfig> for RetryPolicy {
    fn from(cfg: &RateLimitConfig) -> Self {
        Self {
            max_retries: cfg.max_retries.max(1),
            backoff_base: cfg.backoff_base,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Deterministic clock: `sleep` advances time instantly and records
    /// the requested duration.
    pub(crate) struct FakeClock {
        now: Mutex<Instant>,
        slept: Mutex<Vec<Duration>>,
    }

    impl FakeClock {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(Instant::now()),
                slept: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn advance(&self, d: Duration) {
            *self.now.lock().unwrap() += d;
        }

        pub(crate) fn slept(&self) -> Vec<Duration> {
            self.slept.lock().unwrap().clone()
        }

        fn total_slept(&self) -> Duration {
            self.slept.lock().unwrap().iter().sum()
        }
    }

    #[async_trait]
    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }

        async fn sleep(&self, duration: Duration) {
            self.advance(duration);
            self.slept.lock().unwrap().push(duration);
        }
    }

    #[tokio::test]
    async fn test_first_acquire_does_not_sleep() {
        let clock = FakeClock::new();
        let mut limiter = RateLimiter::with_clock(10, clock.clone());
        limiter.acquire().await;
        assert!(clock.slept().is_empty());
    }

    #[tokio::test]
    async fn test_minimum_spacing_enforced() {
        let clock = FakeClock::new();
        // 60 req/min → 1 second between consecutive requests.
        let mut limiter = RateLimiter::with_clock(60, clock.clone());

        limiter.acquire().await;
        limiter.acquire().await;

        let slept = clock.slept();
        assert_eq!(slept.len(), 1);
        assert!((slept[0].as_secs_f64() - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_partial_spacing_tops_up_the_deficit() {
        let clock = FakeClock::new();
        let mut limiter = RateLimiter::with_clock(60, clock.clone());

        limiter.acquire().await;
        clock.advance(Duration::from_millis(400));
        limiter.acquire().await;

        let slept = clock.slept();
        assert_eq!(slept.len(), 1);
        assert!((slept[0].as_secs_f64() - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_window_budget_blocks_until_window_elapses() {
        let clock = FakeClock::new();
        let mut limiter = RateLimiter::with_clock(2, clock.clone());

        // Releases at t=0, t=30 (spacing), then the window is full:
        // the third acquire waits out the rest of the 60s window.
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        assert!((clock.total_slept().as_secs_f64() - 60.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_rolling_window_never_exceeds_rate() {
        let clock = FakeClock::new();
        let rate = 5u32;
        let mut limiter = RateLimiter::with_clock(rate, clock.clone());

        let mut releases = Vec::new();
        let start = clock.now();
        for _ in 0..12 {
            limiter.acquire().await;
            releases.push(clock.now().duration_since(start).as_secs_f64());
        }

        // Any `rate + 1` consecutive releases must span at least 60 seconds,
        // and consecutive releases at least 60/rate seconds.
        for pair in releases.windows(2) {
            assert!(pair[1] - pair[0] >= 60.0 / rate as f64 - 1e-9);
        }
        for span in releases.windows(rate as usize + 1) {
            assert!(span[rate as usize] - span[0] >= 60.0 - 1e-9);
        }
    }

    #[tokio::test]
    async fn test_counter_resets_after_idle_window() {
        let clock = FakeClock::new();
        let mut limiter = RateLimiter::with_clock(2, clock.clone());

        limiter.acquire().await;
        limiter.acquire().await;
        // Long idle stretch: window must reset, only spacing can apply.
        clock.advance(Duration::from_secs(120));
        limiter.acquire().await;

        // One spacing sleep from the second acquire, nothing from the third.
        assert_eq!(clock.slept().len(), 1);
    }

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff_base: 2.0,
        };
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let cfg = RateLimitConfig {
            requests_per_minute: 10,
            backoff_base: 1.5,
            max_retries: 4,
        };
        let policy = RetryPolicy::from(&cfg);
        assert_eq!(policy.max_retries, 4);
        assert!((policy.backoff_base - 1.5).abs() < 1e-12);
    }
}
