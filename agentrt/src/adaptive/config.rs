//! Adaptive rate controller tuning knobs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub reduction_factor: f64,
    pub recovery_factor: f64,
    pub recovery_interval_ms: u64,
    pub recovery_check_interval_ms: u64,
    pub historical_cap: usize,
    pub predictive_enabled: bool,
    pub predictive_threshold: f64,
    pub global_multiplier: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            reduction_factor: 0.3,
            recovery_factor: 0.1,
            recovery_interval_ms: 5 * 60_000,
            recovery_check_interval_ms: 60_000,
            historical_cap: 100,
            predictive_enabled: true,
            predictive_threshold: 0.6,
            global_multiplier: 1.0,
        }
    }
}
