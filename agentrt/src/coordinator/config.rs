//! Cross-instance coordinator tuning knobs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub queue_state_ttl_ms: u64,
    pub lock_ttl_ms: u64,
    pub steal_threshold: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5_000,
            heartbeat_timeout_ms: 15_000,
            queue_state_ttl_ms: 30_000,
            lock_ttl_ms: 10_000,
            steal_threshold: 3,
        }
    }
}
