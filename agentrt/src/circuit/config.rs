//! Circuit breaker tuning knobs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub failure_window_ms: u64,
    pub cooldown_ms: u64,
    pub half_open_max_requests: u32,
    pub success_threshold: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window_ms: 60_000,
            cooldown_ms: 30_000,
            half_open_max_requests: 1,
            success_threshold: 2,
        }
    }
}
