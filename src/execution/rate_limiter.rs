use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::warn;

/// Endpoint classes with independent request buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateClass {
    Default,
    Order,
    Cancel,
    Account,
    Market,
}

/// Token bucket: `tokens(t) = min(capacity, tokens(t0) + (t - t0) * refill)`.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    /// Refill against `now` and try to take `tokens`. Split out from the
    /// async path so tests can drive time explicitly.
    pub fn try_consume_at(&mut self, tokens: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= tokens {
            self.tokens -= tokens;
            true
        } else {
            false
        }
    }

    /// Seconds until `tokens` will be available, from `now`.
    fn wait_hint(&self, tokens: f64) -> f64 {
        if self.tokens >= tokens {
            0.0
        } else {
            (tokens - self.tokens) / self.refill_rate
        }
    }
}

/// Per-endpoint-class rate limiting for every exchange-bound call.
///
/// Owned by the API worker; callers block in `acquire` until tokens are
/// available or the timeout elapses.
pub struct RateLimiter {
    buckets: HashMap<RateClass, Mutex<TokenBucket>>,
}

impl RateLimiter {
    pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new() -> Self {
        let mut buckets = HashMap::new();
        buckets.insert(RateClass::Default, Mutex::new(TokenBucket::new(10.0, 10.0)));
        buckets.insert(RateClass::Order, Mutex::new(TokenBucket::new(8.0, 8.0)));
        buckets.insert(RateClass::Cancel, Mutex::new(TokenBucket::new(8.0, 8.0)));
        buckets.insert(RateClass::Account, Mutex::new(TokenBucket::new(30.0, 30.0)));
        buckets.insert(RateClass::Market, Mutex::new(TokenBucket::new(100.0, 100.0)));
        Self { buckets }
    }

    /// Block until `tokens` are available in the class bucket; false on
    /// timeout (surfaced by the caller as a rate-limit error response).
    pub async fn acquire(&self, class: RateClass, tokens: f64) -> bool {
        self.acquire_with_timeout(class, tokens, Self::ACQUIRE_TIMEOUT)
            .await
    }

    pub async fn acquire_with_timeout(
        &self,
        class: RateClass,
        tokens: f64,
        timeout: Duration,
    ) -> bool {
        let bucket = self
            .buckets
            .get(&class)
            .unwrap_or_else(|| &self.buckets[&RateClass::Default]);
        let deadline = Instant::now() + timeout;

        loop {
            let wait = {
                let mut guard = bucket.lock().await;
                let now = Instant::now();
                if guard.try_consume_at(tokens, now) {
                    return true;
                }
                guard.wait_hint(tokens)
            };

            if Instant::now() >= deadline {
                warn!("Rate limit acquire timed out for {class:?}");
                return false;
            }
            // Short sleeps so shutdown and the deadline stay responsive.
            tokio::time::sleep(Duration::from_secs_f64(wait.min(0.1).max(0.01))).await;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
