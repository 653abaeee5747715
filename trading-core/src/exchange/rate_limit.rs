// exchange/rate_limit.rs
//! Client-side admission control using two token buckets.
//!
//! Public (info) and private (signed exchange) requests draw from independent
//! buckets. Tokens refill continuously; a caller that finds the bucket empty
//! is queued and released in arrival order by a drain timer scheduled for the
//! instant the next token becomes available.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::runtime::TimerRegistry;

// A token counts as available within this tolerance of 1.0
const TOKEN_EPSILON: f64 = 1e-9;

// Drain timers are named per limiter so limiters can share a registry
static NEXT_LIMITER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateClass {
    /// Unsigned info queries
    Public,
    /// Signed trade actions
    Private,
}

impl fmt::Display for RateClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateClass::Public => write!(f, "public"),
            RateClass::Private => write!(f, "private"),
        }
    }
}

/// Capacity and refill rate of one bucket
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketConfig {
    pub capacity: f64,
    pub refill_per_sec: f64,
}

/// Configuration for the rate limiter
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    pub public: BucketConfig,
    pub private: BucketConfig,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            public: BucketConfig {
                capacity: 10.0,
                refill_per_sec: 10.0,
            },
            private: BucketConfig {
                capacity: 5.0,
                refill_per_sec: 5.0,
            },
        }
    }
}

struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
    waiters: VecDeque<oneshot::Sender<()>>,
    drain_scheduled: bool,
}

impl TokenBucket {
    fn new(config: BucketConfig) -> Self {
        // Clamp to sane values so refill math never divides by zero
        let capacity = config.capacity.max(1.0);
        let refill_per_sec = if config.refill_per_sec > 0.0 {
            config.refill_per_sec
        } else {
            capacity
        };
        Self {
            capacity,
            refill_per_sec,
            tokens: capacity,
            last_refill: Instant::now(),
            waiters: VecDeque::new(),
            drain_scheduled: false,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            self.last_refill = now;
        }
    }

    fn has_token(&self) -> bool {
        self.tokens + TOKEN_EPSILON >= 1.0
    }

    fn take(&mut self) {
        self.tokens = (self.tokens - 1.0).max(0.0);
    }

    /// Time until one full token is available, rounded up to whole milliseconds
    fn time_to_next_token(&self) -> Duration {
        let missing = (1.0 - self.tokens).max(0.0);
        let millis = (missing / self.refill_per_sec * 1000.0).ceil();
        Duration::from_millis(millis.max(1.0) as u64)
    }
}

struct LimiterInner {
    id: u64,
    public: Mutex<TokenBucket>,
    private: Mutex<TokenBucket>,
    timers: TimerRegistry,
}

impl LimiterInner {
    fn bucket(&self, class: RateClass) -> &Mutex<TokenBucket> {
        match class {
            RateClass::Public => &self.public,
            RateClass::Private => &self.private,
        }
    }
}

/// Two-class token bucket limiter. Cloning shares the buckets.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<LimiterInner>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig, timers: TimerRegistry) -> Self {
        Self {
            inner: Arc::new(LimiterInner {
                id: NEXT_LIMITER_ID.fetch_add(1, Ordering::Relaxed),
                public: Mutex::new(TokenBucket::new(config.public)),
                private: Mutex::new(TokenBucket::new(config.private)),
                timers,
            }),
        }
    }

    /// Waits until a token of `class` is available and consumes it.
    ///
    /// Never fails; callers are released strictly in arrival order.
    ///
    /// Once the timer registry is shutting down no drain can be scheduled,
    /// so queued callers return immediately without a token.
    pub async fn acquire(&self, class: RateClass) {
        let rx = {
            let mut bucket = self.inner.bucket(class).lock();
            bucket.refill(Instant::now());

            if bucket.waiters.is_empty() && bucket.has_token() {
                bucket.take();
                trace!(%class, tokens = bucket.tokens, "Token granted");
                return;
            }

            let (tx, rx) = oneshot::channel();
            bucket.waiters.push_back(tx);
            debug!(%class, queued = bucket.waiters.len(), "Rate limited, queueing request");
            if !bucket.drain_scheduled {
                let delay = bucket.time_to_next_token();
                bucket.drain_scheduled = true;
                drop(bucket);
                self.schedule_drain(class, delay);
            }
            rx
        };

        // The sender is only dropped without sending if the registry shut down
        let _ = rx.await;
    }

    /// Non-blocking variant: consumes a token only if one is free right now
    /// and nobody is queued.
    pub fn try_acquire(&self, class: RateClass) -> bool {
        let mut bucket = self.inner.bucket(class).lock();
        bucket.refill(Instant::now());
        if bucket.waiters.is_empty() && bucket.has_token() {
            bucket.take();
            true
        } else {
            false
        }
    }

    /// Currently available (fractional) tokens after refill
    pub fn available(&self, class: RateClass) -> f64 {
        let mut bucket = self.inner.bucket(class).lock();
        bucket.refill(Instant::now());
        bucket.tokens
    }

    pub fn queued(&self, class: RateClass) -> usize {
        self.inner.bucket(class).lock().waiters.len()
    }

    pub fn capacity(&self, class: RateClass) -> f64 {
        self.inner.bucket(class).lock().capacity
    }

    fn drain_timer_name(&self, class: RateClass) -> String {
        format!("rate-limiter-{}:{}", self.inner.id, class)
    }

    fn schedule_drain(&self, class: RateClass, delay: Duration) {
        let limiter = self.clone();
        let scheduled = self.inner.timers.set_timeout(
            &self.drain_timer_name(class),
            delay,
            move || async move {
                limiter.drain(class);
                Ok(())
            },
        );

        if !scheduled {
            // Registry is gone; release everyone rather than hang forever
            let mut bucket = self.inner.bucket(class).lock();
            warn!(
                %class,
                released = bucket.waiters.len(),
                "Timer registry shutting down, releasing queued callers without tokens"
            );
            bucket.drain_scheduled = false;
            bucket.waiters.clear();
        }
    }

    /// Releases queued callers FIFO while tokens allow and re-arms the timer
    /// if anyone is still waiting.
    fn drain(&self, class: RateClass) {
        let next_delay = {
            let mut bucket = self.inner.bucket(class).lock();
            bucket.drain_scheduled = false;
            bucket.refill(Instant::now());

            let mut released = 0usize;
            while bucket.has_token() {
                let Some(waiter) = bucket.waiters.pop_front() else {
                    break;
                };
                // A dropped receiver means the caller gave up; keep its token
                if waiter.send(()).is_ok() {
                    bucket.take();
                    released += 1;
                }
            }
            if released > 0 {
                trace!(%class, released, remaining = bucket.waiters.len(), "Drained rate limit queue");
            }

            if bucket.waiters.is_empty() {
                None
            } else {
                bucket.drain_scheduled = true;
                Some(bucket.time_to_next_token())
            }
        };

        if let Some(delay) = next_delay {
            self.schedule_drain(class, delay);
        }
    }
}
