//! Process-wide shared rate-limit gate, keyed by e.g. `provider:model`.
//!
//! Distinct from C2's token bucket: the gate is a single "don't call again
//! before this deadline" cooldown shared across every caller using the same
//! key, set directly from a 429 rather than computed from request volume.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, Default)]
struct GateEntry {
    until_ms: u64,
    hits: u32,
    updated_at_ms: u64,
}

#[derive(Clone)]
pub struct RateLimitGate {
    entries: Arc<Mutex<HashMap<String, GateEntry>>>,
}

impl RateLimitGate {
    pub fn new() -> Self {
        Self { entries: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Milliseconds the caller must still wait before `key` may proceed.
    pub async fn wait_ms(&self, key: &str, now_ms: u64) -> u64 {
        let guard = self.entries.lock().await;
        guard.get(key).map(|e| e.until_ms.saturating_sub(now_ms)).unwrap_or(0)
    }

    pub async fn advance(&self, key: &str, now_ms: u64, backoff_ms: u64) {
        let mut guard = self.entries.lock().await;
        let entry = guard.entry(key.to_string()).or_default();
        entry.until_ms = entry.until_ms.max(now_ms + backoff_ms);
        entry.hits += 1;
        entry.updated_at_ms = now_ms;
    }

    pub async fn clear_hits(&self, key: &str) {
        let mut guard = self.entries.lock().await;
        if let Some(entry) = guard.get_mut(key) {
            entry.hits = 0;
        }
    }

    pub async fn hits(&self, key: &str) -> u32 {
        self.entries.lock().await.get(key).map(|e| e.hits).unwrap_or(0)
    }
}

impl Default for RateLimitGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_key_has_no_wait() {
        let gate = RateLimitGate::new();
        assert_eq!(gate.wait_ms("p:m", 0).await, 0);
    }

    #[tokio::test]
    async fn advance_sets_wait_and_counts_hits() {
        let gate = RateLimitGate::new();
        gate.advance("p:m", 0, 5_000).await;
        assert_eq!(gate.wait_ms("p:m", 1_000).await, 4_000);
        assert_eq!(gate.hits("p:m").await, 1);
    }

    #[tokio::test]
    async fn clear_hits_resets_counter_but_not_deadline() {
        let gate = RateLimitGate::new();
        gate.advance("p:m", 0, 5_000).await;
        gate.clear_hits("p:m").await;
        assert_eq!(gate.hits("p:m").await, 0);
        assert_eq!(gate.wait_ms("p:m", 0).await, 5_000);
    }

    #[tokio::test]
    async fn advance_never_moves_deadline_backward() {
        let gate = RateLimitGate::new();
        gate.advance("p:m", 0, 10_000).await;
        gate.advance("p:m", 1_000, 2_000).await;
        assert_eq!(gate.wait_ms("p:m", 0).await, 10_000);
    }
}
