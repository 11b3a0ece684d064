//! Circuit breaker (C5), one state machine per `provider:model` key.
//!
//! `check` is the read-only, idempotent probe the spec calls for: it only
//! performs the lazy open→half-open transition, never reserves a slot.
//! Callers that actually intend to make a request go through [`Self::try_enter`],
//! which additionally reserves a half-open probe slot when applicable.

use tracing::info;

use crate::domain::{CircuitStatus, provider_key};
use crate::events::{EventBus, SchedulerEvent};
use crate::provider::ProviderStateTable;
use std::sync::Arc;

use super::config::CircuitConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitDecision {
    pub allowed: bool,
    pub status: CircuitStatus,
    pub retry_after_ms: u64,
}

pub struct CircuitBreaker {
    table: ProviderStateTable,
    config: CircuitConfig,
    bus: Arc<EventBus>,
}

fn status_name(s: CircuitStatus) -> &'static str {
    match s {
        CircuitStatus::Closed => "closed",
        CircuitStatus::Open => "open",
        CircuitStatus::HalfOpen => "half_open",
    }
}

impl CircuitBreaker {
    pub fn new(table: ProviderStateTable, config: CircuitConfig, bus: Arc<EventBus>) -> Self {
        Self { table, config, bus }
    }

    fn transition(&self, key: &str, from: CircuitStatus, to: CircuitStatus) {
        if from != to {
            info!(key, from = status_name(from), to = status_name(to), "CircuitBreaker: state transition");
            self.bus.emit(SchedulerEvent::CircuitStateChanged {
                subject: key.to_string(),
                from: status_name(from).to_string(),
                to: status_name(to).to_string(),
            });
        }
    }

    /// Lazily transitions open → half-open once `cooldown_ms` has elapsed,
    /// then reports whether a caller may proceed. Never reserves a slot.
    pub async fn check(&self, provider: &str, model: &str, now_ms: u64) -> CircuitDecision {
        let key = provider_key(provider, model);
        let (status, prior) = self
            .table
            .with_entry(provider, model, now_ms, |s| {
                let prior = s.circuit.status;
                if s.circuit.status == CircuitStatus::Open
                    && now_ms.saturating_sub(s.circuit.last_state_change_time) >= self.config.cooldown_ms
                {
                    s.circuit.status = CircuitStatus::HalfOpen;
                    s.circuit.last_state_change_time = now_ms;
                    s.circuit.half_open_in_flight = 0;
                    s.circuit.success_count = 0;
                }
                (s.circuit.status, prior)
            })
            .await;
        self.transition(&key, prior, status);
        match status {
            CircuitStatus::Closed => CircuitDecision { allowed: true, status, retry_after_ms: 0 },
            CircuitStatus::HalfOpen => CircuitDecision { allowed: true, status, retry_after_ms: 0 },
            CircuitStatus::Open => {
                let remaining = self
                    .table
                    .snapshot(provider, model)
                    .await
                    .map(|s| self.config.cooldown_ms.saturating_sub(now_ms.saturating_sub(s.circuit.last_state_change_time)))
                    .unwrap_or(self.config.cooldown_ms);
                CircuitDecision { allowed: false, status, retry_after_ms: remaining }
            }
        }
    }

    /// `check`, plus reserving a half-open probe slot if applicable. Returns
    /// `allowed: false` if half-open and all probe slots are already in use.
    pub async fn try_enter(&self, provider: &str, model: &str, now_ms: u64) -> CircuitDecision {
        let decision = self.check(provider, model, now_ms).await;
        if !decision.allowed || decision.status != CircuitStatus::HalfOpen {
            return decision;
        }
        self.table
            .with_entry(provider, model, now_ms, |s| {
                if s.circuit.half_open_in_flight < self.config.half_open_max_requests {
                    s.circuit.half_open_in_flight += 1;
                    decision
                } else {
                    CircuitDecision { allowed: false, status: decision.status, retry_after_ms: 0 }
                }
            })
            .await
    }

    pub async fn record_success(&self, provider: &str, model: &str, now_ms: u64) {
        let key = provider_key(provider, model);
        let (from, to) = self
            .table
            .with_entry(provider, model, now_ms, |s| {
                let from = s.circuit.status;
                match s.circuit.status {
                    CircuitStatus::Closed => {
                        s.circuit.failure_count = 0;
                        s.circuit.failure_timestamps.clear();
                    }
                    CircuitStatus::HalfOpen => {
                        s.circuit.half_open_in_flight = s.circuit.half_open_in_flight.saturating_sub(1);
                        s.circuit.success_count += 1;
                        if s.circuit.success_count >= self.config.success_threshold {
                            s.circuit.status = CircuitStatus::Closed;
                            s.circuit.failure_count = 0;
                            s.circuit.success_count = 0;
                            s.circuit.failure_timestamps.clear();
                            s.circuit.last_state_change_time = now_ms;
                        }
                    }
                    CircuitStatus::Open => {}
                }
                (from, s.circuit.status)
            })
            .await;
        self.transition(&key, from, to);
    }

    pub async fn record_failure(&self, provider: &str, model: &str, now_ms: u64) {
        let key = provider_key(provider, model);
        let threshold = self.config.failure_threshold;
        let window = self.config.failure_window_ms;
        let (from, to) = self
            .table
            .with_entry(provider, model, now_ms, |s| {
                let from = s.circuit.status;
                s.circuit.last_failure_time = Some(now_ms);
                match s.circuit.status {
                    CircuitStatus::HalfOpen => {
                        s.circuit.status = CircuitStatus::Open;
                        s.circuit.half_open_in_flight = 0;
                        s.circuit.success_count = 0;
                        s.circuit.last_state_change_time = now_ms;
                    }
                    CircuitStatus::Closed => {
                        s.circuit.failure_timestamps.push_back(now_ms);
                        while let Some(&oldest) = s.circuit.failure_timestamps.front() {
                            if now_ms.saturating_sub(oldest) > window {
                                s.circuit.failure_timestamps.pop_front();
                            } else {
                                break;
                            }
                        }
                        s.circuit.failure_count = s.circuit.failure_timestamps.len() as u32;
                        if s.circuit.failure_count >= threshold {
                            s.circuit.status = CircuitStatus::Open;
                            s.circuit.last_state_change_time = now_ms;
                        }
                    }
                    CircuitStatus::Open => {}
                }
                (from, s.circuit.status)
            })
            .await;
        self.transition(&key, from, to);
    }
}
