//! Sample, snapshot and summary shapes for the metrics collector.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Dispatch,
    Completion,
    Preemption,
    Steal,
    RateLimitHit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub ts_ms: u64,
    pub kind: EventKind,
    pub provider: String,
    pub model: String,
    pub priority: String,
    pub wait_ms: Option<u64>,
    pub execution_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub p50_wait_ms: f64,
    pub p99_wait_ms: f64,
    pub p50_execution_ms: f64,
    pub p99_execution_ms: f64,
    pub completions: u64,
    pub preemptions: u64,
    pub steals: u64,
    pub rate_limit_hits: u64,
    pub queue_depth: u32,
    pub active_tasks: u32,
    pub logging_errors: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupBreakdown {
    pub completions: u64,
    pub preemptions: u64,
    pub rate_limit_hits: u64,
    pub avg_wait_ms: f64,
    pub avg_execution_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub period_ms: u64,
    pub sample_count: usize,
    pub by_provider: HashMap<String, GroupBreakdown>,
    pub by_priority: HashMap<String, GroupBreakdown>,
}
