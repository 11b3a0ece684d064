//! The provider-state service: a single owner for the composite
//! `provider:model` record consumed by C2 (rate limiter), C3 (penalty),
//! C4 (parallelism), C5 (circuit breaker) and C7 (adaptive rate).
//!
//! Keeping one table instead of five parallel maps avoids the cyclic
//! cross-references a naive per-controller-map design would need.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{ProviderState, provider_key};

#[derive(Clone)]
pub struct ProviderStateTable {
    inner: Arc<Mutex<HashMap<String, ProviderState>>>,
    default_base_parallelism: u32,
    default_rpm: f64,
}

impl ProviderStateTable {
    pub fn new(default_base_parallelism: u32, default_rpm: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            default_base_parallelism,
            default_rpm,
        }
    }

    /// Runs `f` against the entry for `provider:model`, creating it with
    /// defaults on first access.
    pub async fn with_entry<R>(&self, provider: &str, model: &str, now_ms: u64, f: impl FnOnce(&mut ProviderState) -> R) -> R {
        let key = provider_key(provider, model);
        let mut guard = self.inner.lock().await;
        let entry = guard
            .entry(key)
            .or_insert_with(|| ProviderState::new(now_ms, self.default_base_parallelism, self.default_rpm));
        f(entry)
    }

    pub async fn snapshot(&self, provider: &str, model: &str) -> Option<ProviderState> {
        let key = provider_key(provider, model);
        self.inner.lock().await.get(&key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.inner.lock().await.keys().cloned().collect()
    }

    /// Evicts entries whose bucket has not been touched in `idle_ms`, up to
    /// an overall cap; oldest-touched first (LRU).
    pub async fn evict_idle(&self, now_ms: u64, idle_ms: u64, hard_cap: usize) -> usize {
        let mut guard = self.inner.lock().await;
        let mut evicted = 0;
        let stale: Vec<String> = guard
            .iter()
            .filter(|(_, s)| now_ms.saturating_sub(s.bucket.last_access_ms) > idle_ms)
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            guard.remove(&key);
            evicted += 1;
        }
        if guard.len() > hard_cap {
            let mut by_access: Vec<(String, u64)> = guard.iter().map(|(k, s)| (k.clone(), s.bucket.last_access_ms)).collect();
            by_access.sort_by_key(|(_, t)| *t);
            let overflow = guard.len() - hard_cap;
            for (key, _) in by_access.into_iter().take(overflow) {
                guard.remove(&key);
                evicted += 1;
            }
        }
        debug!(evicted, "ProviderStateTable::evict_idle: pruned entries");
        evicted
    }
}
