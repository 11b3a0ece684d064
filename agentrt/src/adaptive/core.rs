//! Adaptive rate controller (C7): learned concurrency limits with
//! predictive throttling, persisted across restarts.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Timelike, Utc};
use tracing::info;

use crate::domain::provider_key;
use crate::provider::ProviderStateTable;

use super::config::AdaptiveConfig;
use super::persistence::{self, LearnedLimitsFile};

pub struct AdaptiveRateController {
    table: ProviderStateTable,
    config: AdaptiveConfig,
    persist_path: PathBuf,
}

impl AdaptiveRateController {
    pub fn new(table: ProviderStateTable, config: AdaptiveConfig, config_dir: &Path) -> Self {
        Self { table, config, persist_path: persistence::default_path(config_dir) }
    }

    pub async fn get_effective_limit(&self, provider: &str, model: &str, preset_limit: u32) -> u32 {
        let learned = self.table.with_entry(provider, model, 0, |s| s.learned.concurrency).await;
        let preset_scaled = ((preset_limit as f64) * self.config.global_multiplier).floor() as u32;
        learned.min(preset_scaled.max(1))
    }

    pub async fn record_429(&self, provider: &str, model: &str, now_ms: u64) -> u32 {
        let key = provider_key(provider, model);
        let cap = self.config.historical_cap;
        let factor = self.config.reduction_factor;
        let to = self
            .table
            .with_entry(provider, model, now_ms, |s| {
                let learned = &mut s.learned;
                learned.concurrency = ((learned.concurrency as f64 * (1.0 - factor)).floor() as u32).max(1);
                learned.last_429_at = Some(now_ms);
                learned.consecutive_429_count += 1;
                learned.historical_429s.push_back(now_ms);
                if learned.historical_429s.len() > cap {
                    learned.historical_429s.pop_front();
                }
                learned.concurrency
            })
            .await;
        info!(key, concurrency = to, "AdaptiveRateController::record_429: reduced learned limit");
        to
    }

    pub async fn record_success(&self, provider: &str, model: &str, now_ms: u64) {
        self.table
            .with_entry(provider, model, now_ms, |s| {
                s.learned.consecutive_429_count = 0;
            })
            .await;
    }

    /// Raises `concurrency` one recovery step if no 429 has landed in the
    /// last `recovery_interval_ms`. Never exceeds `original_concurrency`.
    pub async fn attempt_recovery(&self, provider: &str, model: &str, now_ms: u64) -> u32 {
        let interval = self.config.recovery_interval_ms;
        let factor = self.config.recovery_factor;
        self.table
            .with_entry(provider, model, now_ms, |s| {
                let learned = &mut s.learned;
                let quiet = learned.last_429_at.is_none_or(|t| now_ms.saturating_sub(t) >= interval);
                if quiet {
                    let raised = (learned.concurrency as f64 * (1.0 + factor)).ceil() as u32;
                    learned.concurrency = raised.min(learned.original_concurrency);
                }
                learned.concurrency
            })
            .await
    }

    /// Density of `historical429s` in the last hour, blended with how often
    /// this day-of-week/hour-of-day bucket has seen a 429 historically.
    pub async fn analyze_429_probability(&self, provider: &str, model: &str, now_ms: u64) -> f64 {
        let Some(state) = self.table.snapshot(provider, model).await else {
            return 0.0;
        };
        let learned = &state.learned;
        if learned.historical_429s.is_empty() {
            return 0.0;
        }
        let now_dt = Self::to_datetime(now_ms);
        let recent_hour_count = learned.historical_429s.iter().filter(|&&t| now_ms.saturating_sub(t) <= 3_600_000).count();
        let recent_density = (recent_hour_count as f64 / 10.0).min(1.0);

        let bucket_matches = learned
            .historical_429s
            .iter()
            .filter(|&&t| {
                let dt = Self::to_datetime(t);
                dt.weekday() == now_dt.weekday() && dt.hour() == now_dt.hour()
            })
            .count();
        let bucket_density = (bucket_matches as f64 / learned.historical_429s.len() as f64).min(1.0);

        (0.6 * recent_density + 0.4 * bucket_density).clamp(0.0, 1.0)
    }

    fn to_datetime(now_ms: u64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(now_ms as i64).unwrap_or_else(Utc::now)
    }

    pub async fn should_proactively_throttle(&self, provider: &str, model: &str, now_ms: u64) -> bool {
        if !self.config.predictive_enabled {
            return false;
        }
        self.analyze_429_probability(provider, model, now_ms).await > self.config.predictive_threshold
    }

    pub async fn get_predictive_concurrency(&self, provider: &str, model: &str, now_ms: u64) -> u32 {
        let p = self.analyze_429_probability(provider, model, now_ms).await;
        let current = self.table.with_entry(provider, model, now_ms, |s| s.learned.concurrency).await;
        ((current as f64) * (1.0 - p)).floor().max(1.0) as u32
    }

    pub async fn save(&self) -> eyre::Result<()> {
        let mut snapshot = LearnedLimitsFile::default();
        for key in self.table.keys().await {
            if let Some((provider, model)) = key.split_once(':') {
                if let Some(state) = self.table.snapshot(provider, model).await {
                    snapshot.limits.insert(key, state.learned);
                }
            }
        }
        persistence::save(&self.persist_path, &snapshot)
    }

    /// Loads persisted limits into entries already present in the table;
    /// does not create new provider/model entries (there is no default rpm
    /// to seed a fresh token bucket with here).
    pub async fn load(&self) -> eyre::Result<()> {
        let snapshot = persistence::load(&self.persist_path)?;
        for (key, limit) in snapshot.limits {
            if let Some((provider, model)) = key.split_once(':') {
                self.table.with_entry(provider, model, 0, |s| s.learned = limit.clone()).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn controller(dir: &Path) -> AdaptiveRateController {
        let table = ProviderStateTable::new(4, 60.0);
        AdaptiveRateController::new(table, AdaptiveConfig::default(), dir)
    }

    #[tokio::test]
    async fn effective_limit_is_min_of_learned_and_scaled_preset() {
        let dir = tempdir().unwrap();
        let c = controller(dir.path());
        assert_eq!(c.get_effective_limit("p", "m", 10).await, 4);
    }

    #[tokio::test]
    async fn record_429_reduces_and_tracks_history() {
        let dir = tempdir().unwrap();
        let c = controller(dir.path());
        let to = c.record_429("p", "m", 1_000).await;
        assert_eq!(to, 2); // floor(4 * 0.7) = 2
    }

    #[tokio::test]
    async fn recovery_blocked_within_interval_then_raises_after() {
        let dir = tempdir().unwrap();
        let c = controller(dir.path());
        c.record_429("p", "m", 0).await;
        assert_eq!(c.attempt_recovery("p", "m", 1_000).await, 2);
        let recovered = c.attempt_recovery("p", "m", 10 * 60_000).await;
        assert!(recovered > 2);
    }

    #[tokio::test]
    async fn recovery_never_exceeds_original() {
        let dir = tempdir().unwrap();
        let c = controller(dir.path());
        let mut now = 10 * 60_000;
        for _ in 0..20 {
            c.attempt_recovery("p", "m", now).await;
            now += 10 * 60_000;
        }
        assert!(c.get_effective_limit("p", "m", 100).await <= 4);
    }

    #[tokio::test]
    async fn probability_is_zero_with_no_history() {
        let dir = tempdir().unwrap();
        let c = controller(dir.path());
        assert_eq!(c.analyze_429_probability("p", "m", 0).await, 0.0);
        assert!(!c.should_proactively_throttle("p", "m", 0).await);
    }

    #[tokio::test]
    async fn dense_recent_429s_trigger_proactive_throttle() {
        let dir = tempdir().unwrap();
        let c = controller(dir.path());
        for i in 0..10u64 {
            c.record_429("p", "m", i * 60_000).await;
        }
        let throttle = c.should_proactively_throttle("p", "m", 9 * 60_000).await;
        assert!(throttle);
    }

    #[tokio::test]
    async fn save_and_load_round_trip_learned_state() {
        let dir = tempdir().unwrap();
        let c = controller(dir.path());
        c.record_429("p", "m", 1_000).await;
        c.save().await.unwrap();

        let table2 = ProviderStateTable::new(4, 60.0);
        table2.with_entry("p", "m", 0, |_| ()).await;
        let c2 = AdaptiveRateController::new(table2, AdaptiveConfig::default(), dir.path());
        c2.load().await.unwrap();
        assert_eq!(c2.get_effective_limit("p", "m", 100).await, 2);
    }
}
