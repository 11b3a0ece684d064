//! Event types emitted by the scheduler components.
//!
//! Every event carries a `subject` (usually a `provider:model` key, a task
//! id, or an instance id) so subscribers can group without parsing event
//! payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SchedulerEvent {
    TaskEnqueued { task_id: String, priority: String, tenant_key: String },
    TaskDequeued { task_id: String, priority: String },
    TaskPromoted { task_id: String, from: String, to: String },
    RateLimited { subject: String, wait_ms: u64 },
    PenaltyRaised { subject: String, reason: String, penalty: f64 },
    ParallelismChanged { subject: String, from: u32, to: u32, reason: String },
    CircuitStateChanged { subject: String, from: String, to: String },
    RetryScheduled { subject: String, attempt: u32, delay_ms: u64, kind: String },
    LeaseIssued { lease_id: String, task_id: String },
    LeaseReleased { lease_id: String },
    LeaseExpired { lease_id: String },
    LeasePreempted { lease_id: String, task_id: String, provider: String, model: String, priority: String },
    CheckpointSaved { checkpoint_id: String, task_id: String },
    CheckpointExpired { checkpoint_id: String },
    InstanceJoined { instance_id: String },
    InstanceLeft { instance_id: String },
    WorkStolen { task_id: String, from_instance: String, to_instance: String },
    Error { subject: String, context: String, message: String },
    Warning { subject: String, context: String, message: String },
}

impl SchedulerEvent {
    pub fn subject(&self) -> &str {
        match self {
            SchedulerEvent::TaskEnqueued { task_id, .. } => task_id,
            SchedulerEvent::TaskDequeued { task_id, .. } => task_id,
            SchedulerEvent::TaskPromoted { task_id, .. } => task_id,
            SchedulerEvent::RateLimited { subject, .. } => subject,
            SchedulerEvent::PenaltyRaised { subject, .. } => subject,
            SchedulerEvent::ParallelismChanged { subject, .. } => subject,
            SchedulerEvent::CircuitStateChanged { subject, .. } => subject,
            SchedulerEvent::RetryScheduled { subject, .. } => subject,
            SchedulerEvent::LeaseIssued { lease_id, .. } => lease_id,
            SchedulerEvent::LeaseReleased { lease_id } => lease_id,
            SchedulerEvent::LeaseExpired { lease_id } => lease_id,
            SchedulerEvent::LeasePreempted { lease_id, .. } => lease_id,
            SchedulerEvent::CheckpointSaved { checkpoint_id, .. } => checkpoint_id,
            SchedulerEvent::CheckpointExpired { checkpoint_id } => checkpoint_id,
            SchedulerEvent::InstanceJoined { instance_id } => instance_id,
            SchedulerEvent::InstanceLeft { instance_id } => instance_id,
            SchedulerEvent::WorkStolen { task_id, .. } => task_id,
            SchedulerEvent::Error { subject, .. } => subject,
            SchedulerEvent::Warning { subject, .. } => subject,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            SchedulerEvent::TaskEnqueued { .. } => "TaskEnqueued",
            SchedulerEvent::TaskDequeued { .. } => "TaskDequeued",
            SchedulerEvent::TaskPromoted { .. } => "TaskPromoted",
            SchedulerEvent::RateLimited { .. } => "RateLimited",
            SchedulerEvent::PenaltyRaised { .. } => "PenaltyRaised",
            SchedulerEvent::ParallelismChanged { .. } => "ParallelismChanged",
            SchedulerEvent::CircuitStateChanged { .. } => "CircuitStateChanged",
            SchedulerEvent::RetryScheduled { .. } => "RetryScheduled",
            SchedulerEvent::LeaseIssued { .. } => "LeaseIssued",
            SchedulerEvent::LeaseReleased { .. } => "LeaseReleased",
            SchedulerEvent::LeaseExpired { .. } => "LeaseExpired",
            SchedulerEvent::LeasePreempted { .. } => "LeasePreempted",
            SchedulerEvent::CheckpointSaved { .. } => "CheckpointSaved",
            SchedulerEvent::CheckpointExpired { .. } => "CheckpointExpired",
            SchedulerEvent::InstanceJoined { .. } => "InstanceJoined",
            SchedulerEvent::InstanceLeft { .. } => "InstanceLeft",
            SchedulerEvent::WorkStolen { .. } => "WorkStolen",
            SchedulerEvent::Error { .. } => "Error",
            SchedulerEvent::Warning { .. } => "Warning",
        }
    }
}

/// A timestamped event, as persisted to the rotating JSONL log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub event: SchedulerEvent,
}

impl EventLogEntry {
    pub fn new(event: SchedulerEvent, timestamp: DateTime<Utc>) -> Self {
        Self { timestamp, event }
    }
}
