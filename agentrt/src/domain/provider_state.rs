//! Composite per-`provider:model` record shared by C2, C3, C4, C5 and C7.
//!
//! Modeling these as one record owned by a single provider-state service
//! (see [`crate::provider`]) avoids the cyclic cross-references a naive
//! "each controller keeps its own map" design would need.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBucketState {
    pub tokens: f64,
    pub max_tokens: f64,
    pub refill_rate_per_ms: f64,
    pub last_refill_ms: u64,
    pub retry_after_ms: u64,
    pub last_access_ms: u64,
}

impl TokenBucketState {
    pub fn new(rpm: f64, burst_multiplier: f64, now_ms: u64) -> Self {
        let max_tokens = (rpm / 60.0) * burst_multiplier;
        Self {
            tokens: max_tokens,
            max_tokens,
            refill_rate_per_ms: rpm / 60_000.0,
            last_refill_ms: now_ms,
            retry_after_ms: 0,
            last_access_ms: now_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelismState {
    pub base_parallelism: u32,
    pub current_parallelism: u32,
    pub min: u32,
    pub max: u32,
    pub adjustment_reason: Option<String>,
    pub last_adjusted_at: u64,
}

impl ParallelismState {
    pub fn new(base: u32, min: u32, max: u32, now_ms: u64) -> Self {
        Self {
            base_parallelism: base,
            current_parallelism: base,
            min,
            max,
            adjustment_reason: None,
            last_adjusted_at: now_ms,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthState {
    pub active_requests: u32,
    #[serde(skip)]
    pub recent_429s: VecDeque<u64>,
    #[serde(skip)]
    pub response_time_samples_ms: VecDeque<u64>,
    pub recommended_backoff_ms: u64,
}

const HEALTH_RING_BUFFER_CAP: usize = 64;

impl HealthState {
    pub fn record_429(&mut self, now_ms: u64) {
        self.recent_429s.push_back(now_ms);
        if self.recent_429s.len() > HEALTH_RING_BUFFER_CAP {
            self.recent_429s.pop_front();
        }
    }

    pub fn record_response_ms(&mut self, ms: u64) {
        self.response_time_samples_ms.push_back(ms);
        if self.response_time_samples_ms.len() > HEALTH_RING_BUFFER_CAP {
            self.response_time_samples_ms.pop_front();
        }
    }

    pub fn recent_429_count(&self, since_ms: u64) -> usize {
        self.recent_429s.iter().filter(|&&t| t >= since_ms).count()
    }

    pub fn avg_response_ms(&self) -> f64 {
        if self.response_time_samples_ms.is_empty() {
            return 0.0;
        }
        self.response_time_samples_ms.iter().sum::<u64>() as f64 / self.response_time_samples_ms.len() as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitState {
    pub status: CircuitStatus,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<u64>,
    pub last_state_change_time: u64,
    pub half_open_in_flight: u32,
    /// Rolling window of failure timestamps backing the closed->open count.
    pub failure_timestamps: VecDeque<u64>,
}

impl CircuitState {
    pub fn new(now_ms: u64) -> Self {
        Self {
            status: CircuitStatus::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            last_state_change_time: now_ms,
            half_open_in_flight: 0,
            failure_timestamps: VecDeque::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedLimit {
    pub concurrency: u32,
    pub original_concurrency: u32,
    pub last_429_at: Option<u64>,
    pub consecutive_429_count: u32,
    #[serde(default)]
    pub historical_429s: VecDeque<u64>,
    #[serde(default)]
    pub predicted_429_probability: f64,
}

impl LearnedLimit {
    pub fn new(original_concurrency: u32) -> Self {
        Self {
            concurrency: original_concurrency,
            original_concurrency,
            last_429_at: None,
            consecutive_429_count: 0,
            historical_429s: VecDeque::new(),
            predicted_429_probability: 0.0,
        }
    }
}

/// Composite record for one `provider:model` key. Each controller mutates
/// only the field(s) it owns.
#[derive(Debug, Clone)]
pub struct ProviderState {
    pub bucket: TokenBucketState,
    pub parallelism: ParallelismState,
    pub health: HealthState,
    pub circuit: CircuitState,
    pub learned: LearnedLimit,
    /// C3's multiplicative penalty, stored alongside rather than in
    /// `parallelism` since C3 and C4 are deliberately separate layers.
    pub penalty: f64,
    pub penalty_updated_at_ms: u64,
    /// Enhanced-mode-only: bounded history of `(reason, raisedAtMs)`.
    pub penalty_reason_history: VecDeque<(String, u64)>,
}

impl ProviderState {
    pub fn new(now_ms: u64, base_parallelism: u32, rpm: f64) -> Self {
        Self {
            bucket: TokenBucketState::new(rpm, 1.5, now_ms),
            parallelism: ParallelismState::new(base_parallelism, 1, base_parallelism.max(1) * 4, now_ms),
            health: HealthState::default(),
            circuit: CircuitState::new(now_ms),
            learned: LearnedLimit::new(base_parallelism),
            penalty: 0.0,
            penalty_updated_at_ms: now_ms,
            penalty_reason_history: VecDeque::new(),
        }
    }
}

/// Canonical `provider:model` key builder.
pub fn provider_key(provider: &str, model: &str) -> String {
    format!("{provider}:{model}")
}
