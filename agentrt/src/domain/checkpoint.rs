//! Opaque resumable state for a preempted task (C10).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Priority;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub task_id: String,
    pub source: String,
    pub provider: String,
    pub model: String,
    pub priority: Priority,
    /// Opaque payload plus a schema tag; the core never interprets it.
    pub state: Value,
    pub schema: String,
    pub progress: f64,
    pub created_at: u64,
    pub ttl_ms: u64,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl Checkpoint {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.created_at + self.ttl_ms
    }

    pub fn file_name(&self) -> String {
        format!("{}__{}.json", self.task_id, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(created_at: u64, ttl_ms: u64) -> Checkpoint {
        Checkpoint {
            id: "c1".into(),
            task_id: "t1".into(),
            source: "loop".into(),
            provider: "anthropic".into(),
            model: "claude".into(),
            priority: Priority::Background,
            state: serde_json::json!({"step": 7}),
            schema: "loop.v1".into(),
            progress: 0.5,
            created_at,
            ttl_ms,
            metadata: None,
        }
    }

    #[test]
    fn is_expired_compares_created_at_plus_ttl() {
        let c = checkpoint(1_000, 500);
        assert!(!c.is_expired(1_400));
        assert!(c.is_expired(1_600));
    }

    #[test]
    fn file_name_combines_task_and_checkpoint_id() {
        let c = checkpoint(0, 0);
        assert_eq!(c.file_name(), "t1__c1.json");
    }
}
