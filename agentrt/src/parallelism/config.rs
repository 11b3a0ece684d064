//! Dynamic parallelism adjuster tuning knobs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelismConfig {
    pub reduction_on_429: f64,
    pub reduction_on_timeout: f64,
    pub increase_on_recovery: f64,
    pub recovery_interval_ms: u64,
    /// Sustained-error threshold: more than this many `error` adjustments
    /// within `error_window_ms` triggers a reduction like a 429 would.
    pub error_window_ms: u64,
    pub error_threshold: u32,
}

impl Default for ParallelismConfig {
    fn default() -> Self {
        Self {
            reduction_on_429: 0.3,
            reduction_on_timeout: 0.15,
            increase_on_recovery: 0.1,
            recovery_interval_ms: 5 * 60_000,
            error_window_ms: 60_000,
            error_threshold: 5,
        }
    }
}
