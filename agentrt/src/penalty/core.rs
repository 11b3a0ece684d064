//! Adaptive penalty controller (C3).
//!
//! Penalty is a scalar subtracted (legacy) or exponentiated against
//! (enhanced) a provider/model's base concurrency. It decays lazily from
//! `penalty_updated_at_ms`, so no background task is needed to keep it
//! current between calls.

use tracing::debug;

use crate::provider::ProviderStateTable;

use super::config::{DecayStrategy, PenaltyConfig, PenaltyMode};

#[derive(Debug, Clone, Default)]
pub struct ReasonStats {
    pub counts: std::collections::HashMap<String, u32>,
    pub last_reason: Option<String>,
}

pub struct PenaltyController {
    table: ProviderStateTable,
    config: PenaltyConfig,
}

impl PenaltyController {
    pub fn new(table: ProviderStateTable, config: PenaltyConfig) -> Self {
        Self { table, config }
    }

    fn decay_amount(&self, elapsed_ms: u64, current: f64) -> f64 {
        if self.config.decay_ms == 0 {
            return 0.0;
        }
        let intervals = elapsed_ms as f64 / self.config.decay_ms as f64;
        match self.config.decay_strategy {
            DecayStrategy::Linear => intervals * self.config.decay_per_interval,
            DecayStrategy::Exponential => current - current * self.config.exponential_base.powf(intervals),
            DecayStrategy::Hybrid => {
                let linear = intervals * self.config.decay_per_interval;
                let exponential = current - current * self.config.exponential_base.powf(intervals);
                linear.max(exponential)
            }
        }
    }

    /// Decays `penalty` toward zero for elapsed time since the last update,
    /// without changing `penalty_updated_at_ms` unless `touch` is true.
    fn decay_locked(&self, penalty: f64, updated_at_ms: u64, now_ms: u64) -> f64 {
        let elapsed = now_ms.saturating_sub(updated_at_ms);
        if elapsed == 0 || penalty <= 0.0 {
            return penalty.max(0.0);
        }
        (penalty - self.decay_amount(elapsed, penalty)).max(0.0)
    }

    pub async fn decay(&self, provider: &str, model: &str, now_ms: u64) -> f64 {
        self.table
            .with_entry(provider, model, now_ms, |state| {
                state.penalty = self.decay_locked(state.penalty, state.penalty_updated_at_ms, now_ms);
                state.penalty_updated_at_ms = now_ms;
                state.penalty
            })
            .await
    }

    /// Legacy-mode raise: integer +1 step, reason ignored.
    pub async fn raise(&self, provider: &str, model: &str, now_ms: u64) -> f64 {
        self.raise_with_reason(provider, model, now_ms, "generic").await
    }

    /// Enhanced-mode raise: weighted by `reason` (legacy mode ignores the
    /// weight and always adds 1.0).
    pub async fn raise_with_reason(&self, provider: &str, model: &str, now_ms: u64, reason: &str) -> f64 {
        let step = match self.config.mode {
            PenaltyMode::Legacy => 1.0,
            PenaltyMode::Enhanced => self.config.weight_for(reason),
        };
        let max_penalty = self.config.max_penalty;
        let cap = self.config.reason_history_cap;
        self.table
            .with_entry(provider, model, now_ms, |state| {
                let decayed = self.decay_locked(state.penalty, state.penalty_updated_at_ms, now_ms);
                state.penalty = (decayed + step).min(max_penalty);
                state.penalty_updated_at_ms = now_ms;
                if matches!(self.config.mode, PenaltyMode::Enhanced) {
                    state.penalty_reason_history.push_back((reason.to_string(), now_ms));
                    if state.penalty_reason_history.len() > cap {
                        state.penalty_reason_history.pop_front();
                    }
                }
                debug!(provider, model, reason, penalty = state.penalty, "PenaltyController::raise_with_reason");
                state.penalty
            })
            .await
    }

    pub async fn lower(&self, provider: &str, model: &str, now_ms: u64) -> f64 {
        let step = match self.config.mode {
            PenaltyMode::Legacy => 1.0,
            PenaltyMode::Enhanced => 1.0,
        };
        self.table
            .with_entry(provider, model, now_ms, |state| {
                let decayed = self.decay_locked(state.penalty, state.penalty_updated_at_ms, now_ms);
                state.penalty = (decayed - step).max(0.0);
                state.penalty_updated_at_ms = now_ms;
                state.penalty
            })
            .await
    }

    pub async fn get(&self, provider: &str, model: &str, now_ms: u64) -> f64 {
        self.decay(provider, model, now_ms).await
    }

    /// `max(1, round(base - penalty))` in legacy mode; `max(1, floor(base *
    /// e^-penalty))` in enhanced mode. The penalty itself is clamped to
    /// `[0, maxPenalty]` on every raise, so no further clamp applies here.
    pub async fn apply_limit(&self, provider: &str, model: &str, now_ms: u64, base: u32) -> u32 {
        let penalty = self.get(provider, model, now_ms).await;
        let effective = match self.config.mode {
            PenaltyMode::Legacy => (base as f64 - penalty).round(),
            PenaltyMode::Enhanced => (base as f64 * (-penalty).exp()).floor(),
        };
        effective.max(1.0) as u32
    }

    pub async fn get_reason_stats(&self, provider: &str, model: &str) -> ReasonStats {
        let Some(state) = self.table.snapshot(provider, model).await else {
            return ReasonStats::default();
        };
        let mut stats = ReasonStats::default();
        for (reason, _) in state.penalty_reason_history.iter() {
            *stats.counts.entry(reason.clone()).or_insert(0) += 1;
            stats.last_reason = Some(reason.clone());
        }
        stats
    }

    pub fn get_decay_strategy(&self) -> DecayStrategy {
        self.config.decay_strategy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(mode: PenaltyMode) -> PenaltyController {
        let table = ProviderStateTable::new(4, 60.0);
        let config = PenaltyConfig { mode, ..PenaltyConfig::default() };
        PenaltyController::new(table, config)
    }

    #[tokio::test]
    async fn legacy_raise_is_integer_step() {
        let c = controller(PenaltyMode::Legacy);
        assert_eq!(c.raise("p", "m", 0).await, 1.0);
        assert_eq!(c.raise("p", "m", 0).await, 2.0);
    }

    #[tokio::test]
    async fn enhanced_raise_uses_reason_weight() {
        let c = controller(PenaltyMode::Enhanced);
        assert_eq!(c.raise_with_reason("p", "m", 0, "rate_limit").await, 2.0);
        assert_eq!(c.raise_with_reason("p", "m", 0, "schema_violation").await, 2.5);
    }

    #[tokio::test]
    async fn penalty_is_capped_at_max() {
        let c = controller(PenaltyMode::Enhanced);
        for _ in 0..20 {
            c.raise_with_reason("p", "m", 0, "rate_limit").await;
        }
        assert_eq!(c.get("p", "m", 0).await, 10.0);
    }

    #[tokio::test]
    async fn linear_decay_reduces_penalty_over_time() {
        let c = controller(PenaltyMode::Enhanced);
        c.raise_with_reason("p", "m", 0, "rate_limit").await;
        let decayed = c.decay("p", "m", 60_000).await;
        assert_eq!(decayed, 1.0);
    }

    #[tokio::test]
    async fn exponential_decay_shrinks_toward_zero_without_overshoot() {
        let table = ProviderStateTable::new(4, 60.0);
        let config = PenaltyConfig {
            mode: PenaltyMode::Enhanced,
            decay_strategy: DecayStrategy::Exponential,
            ..PenaltyConfig::default()
        };
        let c = PenaltyController::new(table, config);
        c.raise_with_reason("p", "m", 0, "rate_limit").await;
        let decayed = c.decay("p", "m", 60_000).await;
        assert!(decayed > 0.0 && decayed < 2.0);
    }

    #[tokio::test]
    async fn apply_limit_legacy_subtracts_and_floors_at_one() {
        let c = controller(PenaltyMode::Legacy);
        c.raise("p", "m", 0).await;
        c.raise("p", "m", 0).await;
        c.raise("p", "m", 0).await;
        assert_eq!(c.apply_limit("p", "m", 0, 4).await, 1);
    }

    #[tokio::test]
    async fn apply_limit_enhanced_uses_exponential_decay_curve() {
        let c = controller(PenaltyMode::Enhanced);
        assert_eq!(c.apply_limit("p", "m", 0, 8).await, 8);
        c.raise_with_reason("p", "m", 0, "rate_limit").await;
        assert!(c.apply_limit("p", "m", 0, 8).await < 8);
    }

    #[tokio::test]
    async fn reason_stats_tracks_counts_and_last_reason() {
        let c = controller(PenaltyMode::Enhanced);
        c.raise_with_reason("p", "m", 0, "rate_limit").await;
        c.raise_with_reason("p", "m", 0, "timeout").await;
        let stats = c.get_reason_stats("p", "m").await;
        assert_eq!(stats.counts.get("rate_limit"), Some(&1));
        assert_eq!(stats.last_reason.as_deref(), Some("timeout"));
    }
}
