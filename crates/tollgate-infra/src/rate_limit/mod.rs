//! Token-bucket rate limiter over the backing store.
//!
//! Bucket state is two keys per identifier, refreshed with a TTL of twice
//! the refill period on every write:
//!
//! ```text
//! ratelimit:<identifier>:tokens        decimal float string
//! ratelimit:<identifier>:last_refill   int64 nanoseconds since epoch
//! ```
//!
//! Refill is lazy and fractional: tokens accrue in real seconds, never in
//! whole periods. Missing or unreadable state synthesizes a full bucket, so
//! a store outage degrades to allowing traffic.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Local;

use tollgate_core::config::RateLimitConfig;
use tollgate_core::decision::RateLimitInfo;
use tollgate_core::error::{DurationError, StoreError};
use tollgate_core::ports::StoreClient;

/// Base store key for an identifier's bucket.
pub fn rate_limit_key(identifier: &str) -> String {
    format!("ratelimit:{identifier}")
}

/// Bucket state as persisted: fractional tokens plus the refill watermark.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucket {
    pub tokens: f64,
    pub last_refill_ns: i64,
}

/// Advance `bucket` to `now_ns`, adding `rate` tokens per `period` pro rata
/// and capping at `burst`. Pure; calling it twice with the same `now_ns`
/// adds nothing the second time.
pub fn refill(bucket: TokenBucket, now_ns: i64, rate: u32, burst: u32, period: Duration) -> TokenBucket {
    let elapsed_secs = (now_ns - bucket.last_refill_ns).max(0) as f64 / 1e9;
    let added = f64::from(rate) * elapsed_secs / period.as_secs_f64();
    TokenBucket {
        tokens: (bucket.tokens + added).min(f64::from(burst)),
        last_refill_ns: now_ns,
    }
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Per-rule token-bucket engine. Immutable after construction and safe to
/// share across request tasks.
#[derive(Clone)]
pub struct TokenBucketLimiter {
    store: Arc<dyn StoreClient>,
    rate: u32,
    burst: u32,
    period: Duration,
}

impl TokenBucketLimiter {
    pub fn new(store: Arc<dyn StoreClient>, config: &RateLimitConfig) -> Result<Self, DurationError> {
        Ok(Self {
            store,
            rate: config.rate,
            burst: config.burst,
            period: config.period()?,
        })
    }

    /// Consume one token. `Ok(false)` means the bucket is empty; `Err` is
    /// only returned when persisting an accepted consume fails, in which
    /// case the caller decides whether the decision stands.
    pub async fn allow(&self, identifier: &str) -> Result<bool, StoreError> {
        self.allow_n(identifier, 1).await
    }

    /// Consume `n` tokens at once. Non-positive `n` is a no-op that allows.
    pub async fn allow_n(&self, identifier: &str, n: i64) -> Result<bool, StoreError> {
        if n <= 0 {
            return Ok(true);
        }

        let mut bucket = self.load(identifier).await;
        bucket = refill(bucket, now_ns(), self.rate, self.burst, self.period);

        if bucket.tokens >= n as f64 {
            bucket.tokens -= n as f64;
            self.save(identifier, bucket).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Tokens currently available, after a lazy refill. Read-only.
    pub async fn current_tokens(&self, identifier: &str) -> f64 {
        let bucket = self.load(identifier).await;
        refill(bucket, now_ns(), self.rate, self.burst, self.period).tokens
    }

    /// Snapshot the bucket for response headers. Never fails: unreadable
    /// state reports as a fresh full bucket.
    pub async fn info(&self, identifier: &str) -> RateLimitInfo {
        let bucket = self.load(identifier).await;
        let bucket = refill(bucket, now_ns(), self.rate, self.burst, self.period);

        let retry_after = if bucket.tokens < f64::from(self.burst) {
            Duration::from_secs_f64(self.period.as_secs_f64() / f64::from(self.rate))
        } else {
            Duration::ZERO
        };
        let reset_time = Local::now()
            + chrono::Duration::from_std(retry_after).unwrap_or_else(|_| chrono::Duration::zero());

        RateLimitInfo {
            limit: self.rate,
            burst: self.burst,
            available: bucket.tokens.floor() as i64,
            reset_time,
            retry_after,
        }
    }

    /// Restore a full bucket for the identifier.
    pub async fn reset(&self, identifier: &str) -> Result<(), StoreError> {
        let bucket = self.fresh_bucket();
        self.save(identifier, bucket).await
    }

    fn fresh_bucket(&self) -> TokenBucket {
        TokenBucket {
            tokens: f64::from(self.burst),
            last_refill_ns: now_ns(),
        }
    }

    /// Load bucket state, synthesizing a full bucket when the keys are
    /// missing or unreadable. Fail open by construction.
    async fn load(&self, identifier: &str) -> TokenBucket {
        let base = rate_limit_key(identifier);

        let tokens = match self.store.get(&format!("{base}:tokens")).await {
            Ok(raw) => match raw.parse::<f64>() {
                Ok(tokens) => tokens,
                Err(_) => return self.fresh_bucket(),
            },
            Err(StoreError::KeyNotFound) => return self.fresh_bucket(),
            Err(e) => {
                tracing::warn!(identifier, error = %e, "bucket read failed, assuming full bucket");
                return self.fresh_bucket();
            }
        };

        match self.store.get(&format!("{base}:last_refill")).await {
            Ok(raw) => match raw.parse::<i64>() {
                Ok(last_refill_ns) => TokenBucket {
                    tokens,
                    last_refill_ns,
                },
                Err(_) => self.fresh_bucket(),
            },
            Err(StoreError::KeyNotFound) => self.fresh_bucket(),
            Err(e) => {
                tracing::warn!(identifier, error = %e, "bucket read failed, assuming full bucket");
                self.fresh_bucket()
            }
        }
    }

    async fn save(&self, identifier: &str, bucket: TokenBucket) -> Result<(), StoreError> {
        let base = rate_limit_key(identifier);
        let ttl = self.period * 2;

        self.store
            .set(&format!("{base}:tokens"), &bucket.tokens.to_string(), ttl)
            .await?;
        self.store
            .set(
                &format!("{base}:last_refill"),
                &bucket.last_refill_ns.to_string(),
                ttl,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::store::InMemoryStore;

    const SECOND_NS: i64 = 1_000_000_000;

    fn limiter(rate: u32, burst: u32, period: &str) -> (TokenBucketLimiter, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let config = RateLimitConfig {
            enabled: true,
            rate,
            burst,
            period: period.to_string(),
            ..RateLimitConfig::default()
        };
        let limiter = TokenBucketLimiter::new(store.clone(), &config).unwrap();
        (limiter, store)
    }

    #[test]
    fn refill_adds_fractional_tokens() {
        let bucket = TokenBucket { tokens: 0.0, last_refill_ns: 0 };
        // 10 tokens per minute, 3 seconds elapsed: half a token.
        let refilled = refill(bucket, 3 * SECOND_NS, 10, 20, Duration::from_secs(60));
        assert!((refilled.tokens - 0.5).abs() < 1e-9);
        assert_eq!(refilled.last_refill_ns, 3 * SECOND_NS);
    }

    #[test]
    fn refill_caps_at_burst() {
        let bucket = TokenBucket { tokens: 18.0, last_refill_ns: 0 };
        let refilled = refill(bucket, 3600 * SECOND_NS, 10, 20, Duration::from_secs(60));
        assert_eq!(refilled.tokens, 20.0);
    }

    #[test]
    fn refill_is_idempotent_at_the_same_instant() {
        let bucket = TokenBucket { tokens: 4.25, last_refill_ns: 0 };
        let now = 7 * SECOND_NS;
        let once = refill(bucket, now, 10, 20, Duration::from_secs(60));
        let twice = refill(once, now, 10, 20, Duration::from_secs(60));
        assert_eq!(once, twice);
    }

    #[test]
    fn sustained_traffic_converges_to_the_configured_rate() {
        // 10 tokens per minute, burst 20; a client hammering every 100ms
        // over ten periods drains the burst once and then rides the refill.
        let (rate, burst) = (10u32, 20u32);
        let period = Duration::from_secs(60);
        let step_ns = 100 * 1_000_000i64;
        let steps = 10 * 600; // ten periods of 100ms ticks

        let mut bucket = TokenBucket { tokens: f64::from(burst), last_refill_ns: 0 };
        let mut allowed = 0u32;
        for step in 1..=steps {
            bucket = refill(bucket, i64::from(step) * step_ns, rate, burst, period);
            assert!(bucket.tokens >= 0.0 && bucket.tokens <= f64::from(burst));
            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                allowed += 1;
            }
        }

        // At most burst + 10 * rate in ten periods, and the long-run
        // throughput approaches rate per period.
        assert!(allowed <= burst + 10 * rate + 1, "allowed = {allowed}");
        assert!(allowed >= 10 * rate - 1, "allowed = {allowed}");
    }

    #[test]
    fn refill_ignores_a_backwards_clock() {
        let bucket = TokenBucket { tokens: 5.0, last_refill_ns: 10 * SECOND_NS };
        let refilled = refill(bucket, 3 * SECOND_NS, 10, 20, Duration::from_secs(60));
        assert_eq!(refilled.tokens, 5.0);
    }

    #[tokio::test]
    async fn new_bucket_starts_full_and_consumes_one() {
        let (limiter, _store) = limiter(10, 20, "1m");
        assert!(limiter.allow("client").await.unwrap());
        let tokens = limiter.current_tokens("client").await;
        assert!(tokens > 18.9 && tokens < 19.1, "tokens = {tokens}");
    }

    #[tokio::test]
    async fn burst_exhaustion_denies_the_next_call() {
        let (limiter, _store) = limiter(1, 3, "1h");
        for _ in 0..3 {
            assert!(limiter.allow("client").await.unwrap());
        }
        assert!(!limiter.allow("client").await.unwrap());
    }

    #[tokio::test]
    async fn denied_calls_do_not_write_state() {
        let (limiter, store) = limiter(1, 1, "1h");
        assert!(limiter.allow("client").await.unwrap());
        let drained = store.get("ratelimit:client:tokens").await.unwrap();

        assert!(!limiter.allow("client").await.unwrap());
        assert_eq!(store.get("ratelimit:client:tokens").await.unwrap(), drained);
    }

    #[tokio::test]
    async fn allow_n_respects_bulk_cost_and_non_positive_n() {
        let (limiter, _store) = limiter(10, 10, "1m");
        assert!(limiter.allow_n("client", 0).await.unwrap());
        assert!(limiter.allow_n("client", -3).await.unwrap());
        assert!(limiter.allow_n("client", 10).await.unwrap());
        assert!(!limiter.allow_n("client", 1).await.unwrap());
    }

    #[tokio::test]
    async fn idle_bucket_refills_from_persisted_state() {
        let (limiter, store) = limiter(10, 20, "1m");

        // Persist a drained bucket whose last refill was a full period ago.
        let past = now_ns() - 60 * SECOND_NS;
        store
            .set("ratelimit:client:tokens", "0", Duration::ZERO)
            .await
            .unwrap();
        store
            .set("ratelimit:client:last_refill", &past.to_string(), Duration::ZERO)
            .await
            .unwrap();

        // One period at rate 10 brings back 10 tokens.
        let tokens = limiter.current_tokens("client").await;
        assert!(tokens > 9.9 && tokens < 10.2, "tokens = {tokens}");
    }

    #[tokio::test]
    async fn corrupt_state_synthesizes_a_full_bucket() {
        let (limiter, store) = limiter(10, 20, "1m");
        store
            .set("ratelimit:client:tokens", "garbage", Duration::ZERO)
            .await
            .unwrap();
        let tokens = limiter.current_tokens("client").await;
        assert_eq!(tokens, 20.0);
    }

    #[tokio::test]
    async fn writes_carry_a_double_period_ttl() {
        let (limiter, store) = limiter(10, 20, "1m");
        limiter.allow("client").await.unwrap();

        let ttl = store.ttl("ratelimit:client:tokens").await.unwrap().unwrap();
        assert!(ttl <= Duration::from_secs(120));
        assert!(ttl > Duration::from_secs(110));
    }

    #[tokio::test]
    async fn info_reports_floor_and_retry_after() {
        let (limiter, _store) = limiter(10, 20, "1m");
        limiter.allow("client").await.unwrap();

        let info = limiter.info("client").await;
        assert_eq!(info.limit, 10);
        assert_eq!(info.burst, 20);
        assert_eq!(info.available, 19);
        // One token takes period/rate = 6 seconds to accrue.
        assert_eq!(info.retry_after, Duration::from_secs(6));
    }

    #[tokio::test]
    async fn info_on_full_bucket_has_no_retry_after() {
        let (limiter, _store) = limiter(10, 20, "1m");
        let info = limiter.info("fresh").await;
        assert_eq!(info.available, 20);
        assert_eq!(info.retry_after, Duration::ZERO);
    }

    #[tokio::test]
    async fn reset_restores_a_full_bucket() {
        let (limiter, _store) = limiter(1, 2, "1h");
        assert!(limiter.allow("client").await.unwrap());
        assert!(limiter.allow("client").await.unwrap());
        assert!(!limiter.allow("client").await.unwrap());

        limiter.reset("client").await.unwrap();
        assert!(limiter.allow("client").await.unwrap());
    }
}
