//! Token-bucket rate limiter (C2): per provider/model RPM and burst
//! accounting with lazy refill.
//!
//! Never raises: policy is surfaced entirely through return values, per the
//! propagation policy in the error handling design.

use tracing::debug;

use crate::provider::ProviderStateTable;

const MAX_WAIT_CAP_MS: u64 = 60_000;

#[derive(Debug, Clone, Default)]
pub struct RateLimiterStats {
    pub tokens: f64,
    pub max_tokens: f64,
    pub retry_after_ms: u64,
}

pub struct RateLimiter {
    table: ProviderStateTable,
}

impl RateLimiter {
    pub fn new(table: ProviderStateTable) -> Self {
        Self { table }
    }

    fn refill(bucket: &mut crate::domain::TokenBucketState, now_ms: u64) {
        let elapsed = now_ms.saturating_sub(bucket.last_refill_ms) as f64;
        bucket.tokens = (bucket.tokens + elapsed * bucket.refill_rate_per_ms).min(bucket.max_tokens);
        bucket.last_refill_ms = now_ms;
    }

    /// Returns `0` if `tokens_needed` tokens are available now, otherwise the
    /// number of milliseconds the caller should wait before retrying.
    ///
    /// `bucket.retry_after_ms` is stored as an absolute deadline; the wait
    /// returned is the larger of "time until enough tokens refill" and
    /// "time until the 429 gate clears" (a caller must satisfy both), capped
    /// at [`MAX_WAIT_CAP_MS`].
    pub async fn can_proceed(&self, provider: &str, model: &str, now_ms: u64, tokens_needed: f64) -> u64 {
        self.table
            .with_entry(provider, model, now_ms, |state| {
                let bucket = &mut state.bucket;
                Self::refill(bucket, now_ms);
                bucket.last_access_ms = now_ms;
                let gate_wait = bucket.retry_after_ms.saturating_sub(now_ms);
                if bucket.tokens >= tokens_needed && gate_wait == 0 {
                    0
                } else {
                    let missing = (tokens_needed - bucket.tokens).max(0.0);
                    let refill_wait = if bucket.refill_rate_per_ms > 0.0 {
                        (missing / bucket.refill_rate_per_ms).ceil() as u64
                    } else {
                        MAX_WAIT_CAP_MS
                    };
                    refill_wait.max(gate_wait).min(MAX_WAIT_CAP_MS)
                }
            })
            .await
    }

    pub async fn consume(&self, provider: &str, model: &str, now_ms: u64, tokens: f64) {
        self.table
            .with_entry(provider, model, now_ms, |state| {
                let bucket = &mut state.bucket;
                Self::refill(bucket, now_ms);
                bucket.tokens = (bucket.tokens - tokens).max(0.0);
                bucket.last_access_ms = now_ms;
            })
            .await;
    }

    /// Drains tokens to zero and raises `retry_after_ms` to an absolute
    /// deadline at least `now + hint`.
    pub async fn record_429(&self, provider: &str, model: &str, now_ms: u64, retry_after_hint_ms: Option<u64>) {
        let hint_deadline = now_ms + retry_after_hint_ms.unwrap_or(0);
        self.table
            .with_entry(provider, model, now_ms, |state| {
                let bucket = &mut state.bucket;
                bucket.tokens = 0.0;
                bucket.retry_after_ms = bucket.retry_after_ms.max(hint_deadline);
                state.health.record_429(now_ms);
                debug!(provider, model, retry_after_ms = bucket.retry_after_ms, "RateLimiter::record_429: throttled");
            })
            .await;
    }

    pub async fn record_success(&self, provider: &str, model: &str, now_ms: u64) {
        self.table
            .with_entry(provider, model, now_ms, |state| {
                state.bucket.retry_after_ms = 0;
            })
            .await;
    }

    pub async fn get_stats(&self, provider: &str, model: &str) -> Option<RateLimiterStats> {
        self.table.snapshot(provider, model).await.map(|s| RateLimiterStats {
            tokens: s.bucket.tokens,
            max_tokens: s.bucket.max_tokens,
            retry_after_ms: s.bucket.retry_after_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(ProviderStateTable::new(4, 60.0))
    }

    #[tokio::test]
    async fn can_proceed_allows_when_tokens_available() {
        let rl = limiter();
        assert_eq!(rl.can_proceed("p", "m", 0, 1.0).await, 0);
    }

    #[tokio::test]
    async fn consume_drains_tokens_monotonically_non_decreasing_between_refills() {
        let rl = limiter();
        let before = rl.get_stats("p", "m", 0).await;
        assert!(before.is_none());
        rl.can_proceed("p", "m", 0, 1.0).await;
        let s1 = rl.get_stats("p", "m", 0).await.unwrap().tokens;
        rl.consume("p", "m", 0, 1.0).await;
        let s2 = rl.get_stats("p", "m", 0).await.unwrap().tokens;
        assert!(s2 <= s1);
    }

    #[tokio::test]
    async fn record_429_drains_tokens_and_sets_retry_after() {
        let rl = limiter();
        rl.can_proceed("p", "m", 0, 1.0).await;
        rl.record_429("p", "m", 1_000, Some(2_000)).await;
        let stats = rl.get_stats("p", "m", 1_000).await.unwrap();
        assert_eq!(stats.tokens, 0.0);
        assert_eq!(stats.retry_after_ms, 3_000);
        let wait = rl.can_proceed("p", "m", 1_500, 1.0).await;
        assert!(wait > 0);
    }

    #[tokio::test]
    async fn record_success_clears_retry_after() {
        let rl = limiter();
        rl.record_429("p", "m", 0, Some(1_000)).await;
        rl.record_success("p", "m", 0).await;
        assert_eq!(rl.get_stats("p", "m", 0).await.unwrap().retry_after_ms, 0);
    }
}
