//! Dynamic parallelism adjuster (C4).
//!
//! Effective concurrency per `provider:model` rises and falls with observed
//! health. Changes are broadcast on an [`EventBus`] rather than taken as a
//! callback, so any number of listeners (admission, metrics) can react.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::events::{EventBus, SchedulerEvent};
use crate::provider::ProviderStateTable;

use super::config::ParallelismConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind429 {
    RateLimited,
    Timeout,
    Error,
}

#[derive(Debug, Clone, Default)]
pub struct ParallelismHealth {
    pub recent_429_count: usize,
    pub avg_response_ms: f64,
    pub recommended_backoff_ms: u64,
}

pub struct ParallelismAdjuster {
    table: ProviderStateTable,
    config: ParallelismConfig,
    bus: Arc<EventBus>,
    /// Ephemeral, per-process sustained-error tracking; not part of the
    /// persisted provider record since only 429/timeout history matters
    /// across restarts.
    error_timestamps: Mutex<HashMap<String, Vec<u64>>>,
}

impl ParallelismAdjuster {
    pub fn new(table: ProviderStateTable, config: ParallelismConfig, bus: Arc<EventBus>) -> Self {
        Self { table, config, bus, error_timestamps: Mutex::new(HashMap::new()) }
    }

    pub async fn get_parallelism(&self, provider: &str, model: &str, now_ms: u64) -> u32 {
        self.table.with_entry(provider, model, now_ms, |s| s.parallelism.current_parallelism).await
    }

    fn emit_change(&self, subject: &str, from: u32, to: u32, reason: &str) {
        if from != to {
            info!(subject, from, to, reason, "ParallelismAdjuster: parallelism changed");
            self.bus.emit(SchedulerEvent::ParallelismChanged {
                subject: subject.to_string(),
                from,
                to,
                reason: reason.to_string(),
            });
        }
    }

    async fn sustained_errors(&self, key: &str, now_ms: u64) -> bool {
        let mut guard = self.error_timestamps.lock().await;
        let entry = guard.entry(key.to_string()).or_default();
        entry.push(now_ms);
        entry.retain(|&t| now_ms.saturating_sub(t) <= self.config.error_window_ms);
        entry.len() as u32 > self.config.error_threshold
    }

    pub async fn adjust_for_error(&self, provider: &str, model: &str, now_ms: u64, kind: ErrorKind429) -> u32 {
        let key = crate::domain::provider_key(provider, model);
        let factor = match kind {
            ErrorKind429::RateLimited => Some(self.config.reduction_on_429),
            ErrorKind429::Timeout => Some(self.config.reduction_on_timeout),
            ErrorKind429::Error => {
                if self.sustained_errors(&key, now_ms).await {
                    Some(self.config.reduction_on_429)
                } else {
                    None
                }
            }
        };
        let Some(factor) = factor else {
            return self.get_parallelism(provider, model, now_ms).await;
        };
        let reason = match kind {
            ErrorKind429::RateLimited => "429",
            ErrorKind429::Timeout => "timeout",
            ErrorKind429::Error => "sustained_error",
        };
        let (from, to) = self
            .table
            .with_entry(provider, model, now_ms, |s| {
                let from = s.parallelism.current_parallelism;
                let reduced = ((from as f64) * (1.0 - factor)).round() as u32;
                let to = reduced.max(s.parallelism.min);
                s.parallelism.current_parallelism = to;
                s.parallelism.adjustment_reason = Some(reason.to_string());
                s.parallelism.last_adjusted_at = now_ms;
                (from, to)
            })
            .await;
        self.emit_change(&key, from, to, reason);
        to
    }

    /// Raises current parallelism one recovery step, provided no 429 has
    /// landed in the last `recovery_interval_ms`.
    pub async fn attempt_recovery(&self, provider: &str, model: &str, now_ms: u64) -> u32 {
        let key = crate::domain::provider_key(provider, model);
        let since = now_ms.saturating_sub(self.config.recovery_interval_ms);
        let (from, to) = self
            .table
            .with_entry(provider, model, now_ms, |s| {
                let from = s.parallelism.current_parallelism;
                if s.health.recent_429_count(since) > 0 {
                    return (from, from);
                }
                let increased = ((from as f64) * (1.0 + self.config.increase_on_recovery)).round() as u32;
                let to = increased.min(s.parallelism.max);
                s.parallelism.current_parallelism = to;
                s.parallelism.adjustment_reason = Some("recovery".to_string());
                s.parallelism.last_adjusted_at = now_ms;
                (from, to)
            })
            .await;
        self.emit_change(&key, from, to, "recovery");
        to
    }

    /// `floor(currentParallelism / instanceCount)`, floored at 1.
    pub async fn apply_cross_instance_limits(&self, provider: &str, model: &str, now_ms: u64, instance_count: u32) -> u32 {
        let current = self.get_parallelism(provider, model, now_ms).await;
        if instance_count == 0 {
            return current.max(1);
        }
        (current / instance_count).max(1)
    }

    pub async fn get_health(&self, provider: &str, model: &str) -> ParallelismHealth {
        let Some(state) = self.table.snapshot(provider, model).await else {
            return ParallelismHealth::default();
        };
        ParallelismHealth {
            recent_429_count: state.health.recent_429_count(0),
            avg_response_ms: state.health.avg_response_ms(),
            recommended_backoff_ms: state.health.recommended_backoff_ms,
        }
    }

    /// Drops ephemeral sustained-error tracking state; persisted provider
    /// state is left untouched.
    pub async fn shutdown(&self) {
        self.error_timestamps.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adjuster() -> ParallelismAdjuster {
        let table = ProviderStateTable::new(4, 60.0);
        ParallelismAdjuster::new(table, ParallelismConfig::default(), Arc::new(EventBus::new(16)))
    }

    #[tokio::test]
    async fn rate_limit_reduces_by_configured_factor() {
        let a = adjuster();
        assert_eq!(a.get_parallelism("p", "m", 0).await, 4);
        let to = a.adjust_for_error("p", "m", 0, ErrorKind429::RateLimited).await;
        assert_eq!(to, 3); // round(4 * 0.7) = 3
    }

    #[tokio::test]
    async fn reduction_never_drops_below_min() {
        let a = adjuster();
        for _ in 0..10 {
            a.adjust_for_error("p", "m", 0, ErrorKind429::RateLimited).await;
        }
        assert!(a.get_parallelism("p", "m", 0).await >= 1);
    }

    #[tokio::test]
    async fn sporadic_errors_below_threshold_do_not_reduce() {
        let a = adjuster();
        let to = a.adjust_for_error("p", "m", 0, ErrorKind429::Error).await;
        assert_eq!(to, 4);
    }

    #[tokio::test]
    async fn sustained_errors_trigger_reduction() {
        let a = adjuster();
        let mut last = 4;
        for i in 0..10u64 {
            last = a.adjust_for_error("p", "m", i * 1_000, ErrorKind429::Error).await;
        }
        assert!(last < 4);
    }

    #[tokio::test]
    async fn recovery_is_blocked_by_recent_429() {
        let a = adjuster();
        a.adjust_for_error("p", "m", 0, ErrorKind429::RateLimited).await;
        let to = a.attempt_recovery("p", "m", 1_000).await;
        assert_eq!(to, 3);
    }

    #[tokio::test]
    async fn recovery_raises_after_interval_with_no_429() {
        let a = adjuster();
        a.adjust_for_error("p", "m", 0, ErrorKind429::RateLimited).await;
        let to = a.attempt_recovery("p", "m", 10 * 60_000).await;
        assert!(to > 3);
    }

    #[tokio::test]
    async fn cross_instance_limit_floors_at_one() {
        let a = adjuster();
        assert_eq!(a.apply_cross_instance_limits("p", "m", 0, 10).await, 1);
        assert_eq!(a.apply_cross_instance_limits("p", "m", 0, 2).await, 2);
    }

    #[tokio::test]
    async fn parallelism_change_is_broadcast() {
        let table = ProviderStateTable::new(4, 60.0);
        let bus = Arc::new(EventBus::new(16));
        let a = ParallelismAdjuster::new(table, ParallelismConfig::default(), bus.clone());
        let mut rx = bus.subscribe();
        a.adjust_for_error("p", "m", 0, ErrorKind429::RateLimited).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "ParallelismChanged");
    }
}
