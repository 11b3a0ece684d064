//! Adaptive penalty controller tuning knobs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PenaltyMode {
    Legacy,
    #[default]
    Enhanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DecayStrategy {
    #[default]
    Linear,
    Exponential,
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PenaltyConfig {
    pub mode: PenaltyMode,
    pub decay_strategy: DecayStrategy,
    /// Linear mode: penalty units removed per `decay_ms` interval.
    pub decay_per_interval: f64,
    pub decay_ms: u64,
    /// Exponential mode: multiplicative retained fraction per `decay_ms`.
    pub exponential_base: f64,
    pub max_penalty: f64,
    pub reason_weights: HashMap<String, f64>,
    pub reason_history_cap: usize,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        let mut reason_weights = HashMap::new();
        reason_weights.insert("rate_limit".to_string(), 2.0);
        reason_weights.insert("capacity".to_string(), 1.5);
        reason_weights.insert("timeout".to_string(), 1.0);
        reason_weights.insert("schema_violation".to_string(), 0.5);
        Self {
            mode: PenaltyMode::default(),
            decay_strategy: DecayStrategy::default(),
            decay_per_interval: 1.0,
            decay_ms: 60_000,
            exponential_base: 0.8,
            max_penalty: 10.0,
            reason_weights,
            reason_history_cap: 32,
        }
    }
}

impl PenaltyConfig {
    pub fn weight_for(&self, reason: &str) -> f64 {
        self.reason_weights.get(reason).copied().unwrap_or(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_reason_weights_match_defaults() {
        let c = PenaltyConfig::default();
        assert_eq!(c.weight_for("rate_limit"), 2.0);
        assert_eq!(c.weight_for("capacity"), 1.5);
        assert_eq!(c.weight_for("timeout"), 1.0);
        assert_eq!(c.weight_for("schema_violation"), 0.5);
        assert_eq!(c.weight_for("unknown_reason"), 1.0);
    }
}
