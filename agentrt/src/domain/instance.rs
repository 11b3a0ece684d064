//! Cross-instance registry record (C8).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveModel {
    pub provider: String,
    pub model: String,
    pub since: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance_id: String,
    pub pid: u32,
    pub session_id: String,
    pub started_at: u64,
    pub last_heartbeat: u64,
    pub cwd: String,
    #[serde(default)]
    pub active_models: Vec<ActiveModel>,
    #[serde(default)]
    pub pending_task_count: u32,
    #[serde(default)]
    pub avg_latency_ms: f64,
    #[serde(default)]
    pub last_task_completed_at: Option<u64>,
}

impl InstanceRecord {
    /// An instance is alive iff its heartbeat is recent AND its PID is live.
    /// The PID check is the caller's responsibility (it needs `nix`'s
    /// process table access, which this pure data type does not touch).
    pub fn heartbeat_fresh(&self, now_ms: u64, heartbeat_timeout_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_heartbeat) <= heartbeat_timeout_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(last_heartbeat: u64) -> InstanceRecord {
        InstanceRecord {
            instance_id: "i1".into(),
            pid: 1,
            session_id: "s1".into(),
            started_at: 0,
            last_heartbeat,
            cwd: "/tmp".into(),
            active_models: vec![],
            pending_task_count: 0,
            avg_latency_ms: 0.0,
            last_task_completed_at: None,
        }
    }

    #[test]
    fn heartbeat_fresh_respects_timeout() {
        let r = record(1_000);
        assert!(r.heartbeat_fresh(1_500, 1_000));
        assert!(!r.heartbeat_fresh(3_000, 1_000));
    }
}
