//! Admission controller tuning knobs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub max_total_active_requests: u32,
    pub max_total_active_llm: u32,
    pub max_concurrent_orchestrations: u32,
    pub reservation_ttl_ms: u64,
    pub poll_interval_ms: u64,
    pub max_wait_ms: u64,
    pub consecutive_dispatch_limit: u32,
    /// Per-model concurrency ceiling before C7/C4/C3/C8 narrow it further.
    pub default_model_concurrency: u32,
    /// TTL given to the checkpoint written for a preempted background lease.
    pub preemption_checkpoint_ttl_ms: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_total_active_requests: 64,
            max_total_active_llm: 32,
            max_concurrent_orchestrations: 16,
            reservation_ttl_ms: 30_000,
            poll_interval_ms: 50,
            max_wait_ms: 30_000,
            consecutive_dispatch_limit: 3,
            default_model_concurrency: 4,
            preemption_checkpoint_ttl_ms: 300_000,
        }
    }
}
