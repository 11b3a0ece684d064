//! The scheduling unit and its round/complexity estimator.

use serde::{Deserialize, Serialize};

use super::Priority;

/// Orthogonal axis to priority, used for coarse admission policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Hash)]
#[serde(rename_all = "lowercase")]
pub enum QueueClass {
    Interactive,
    #[default]
    Standard,
    Batch,
}

/// Coarse cost bucket produced by the round estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Trivial,
    #[default]
    Simple,
    Moderate,
    Complex,
    Exploratory,
}

impl Complexity {
    /// Rough round/duration estimate used when the caller supplies none.
    pub fn estimate(self) -> (u32, u64) {
        match self {
            Complexity::Trivial => (1, 2_000),
            Complexity::Simple => (3, 10_000),
            Complexity::Moderate => (6, 30_000),
            Complexity::Complex => (12, 90_000),
            Complexity::Exploratory => (20, 180_000),
        }
    }
}

/// Infers task complexity from a tool name and optional free-text
/// description. Conservative default: `Simple`.
pub fn estimate_complexity(tool_name: &str, description: Option<&str>) -> Complexity {
    let len_hint = description.map(str::len).unwrap_or(0);
    match tool_name {
        "question" | "read_file" | "list_directory" => Complexity::Trivial,
        "subagent_run_parallel" | "team_run" => Complexity::Exploratory,
        "run_command" | "grep" | "search" if len_hint > 400 => Complexity::Complex,
        "run_command" | "grep" | "search" => Complexity::Moderate,
        _ if len_hint > 800 => Complexity::Complex,
        _ if len_hint > 200 => Complexity::Moderate,
        _ => Complexity::Simple,
    }
}

/// A pending or in-flight unit of scheduling work.
///
/// `virtual_start_time`/`virtual_finish_time`/`skip_count`/`last_considered_ms`
/// are owned by the priority queue (C1); nothing else mutates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub tool_name: String,
    pub priority: Priority,
    pub tenant_key: String,
    #[serde(default)]
    pub queue_class: QueueClass,
    pub estimated_duration_ms: u64,
    pub estimated_rounds: u32,
    pub complexity: Complexity,
    pub enqueued_at_ms: u64,
    #[serde(default)]
    pub deadline_ms: Option<u64>,

    #[serde(default)]
    pub virtual_start_time: f64,
    #[serde(default)]
    pub virtual_finish_time: f64,
    #[serde(default)]
    pub skip_count: u32,
    #[serde(default)]
    pub last_considered_ms: Option<u64>,
}

impl Task {
    /// Builds a task from caller-supplied metadata, filling in any missing
    /// estimate via [`estimate_complexity`] and [`Complexity::estimate`].
    pub fn new(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        priority: Priority,
        tenant_key: impl Into<String>,
        enqueued_at_ms: u64,
        description: Option<&str>,
    ) -> Self {
        let tool_name = tool_name.into();
        let complexity = estimate_complexity(&tool_name, description);
        let (estimated_rounds, estimated_duration_ms) = complexity.estimate();
        Self {
            id: id.into(),
            tool_name,
            priority,
            tenant_key: tenant_key.into(),
            queue_class: QueueClass::default(),
            estimated_duration_ms,
            estimated_rounds,
            complexity,
            enqueued_at_ms,
            deadline_ms: None,
            virtual_start_time: 0.0,
            virtual_finish_time: 0.0,
            skip_count: 0,
            last_considered_ms: None,
        }
    }

    /// `virtual_finish_time = virtual_start_time + estimated_duration_ms / weight(priority)`.
    pub fn recompute_virtual_finish(&mut self) {
        self.virtual_finish_time = self.virtual_start_time + (self.estimated_duration_ms as f64) / self.priority.weight();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_fills_estimates_from_complexity() {
        let t = Task::new("t1", "question", Priority::Critical, "tenantA", 0, None);
        assert_eq!(t.complexity, Complexity::Trivial);
        assert!(t.estimated_duration_ms > 0);
        assert!(t.estimated_rounds >= 1);
    }

    #[test]
    fn recompute_virtual_finish_scales_by_weight() {
        let mut t = Task::new("t1", "read_file", Priority::Critical, "tenantA", 0, None);
        t.virtual_start_time = 10.0;
        t.estimated_duration_ms = 100;
        t.recompute_virtual_finish();
        assert_eq!(t.virtual_finish_time, 10.0 + 100.0 / 100.0);
    }

    #[test]
    fn long_description_pushes_complexity_up() {
        let long = "x".repeat(900);
        assert_eq!(estimate_complexity("write_file", Some(&long)), Complexity::Complex);
        assert_eq!(estimate_complexity("write_file", None), Complexity::Simple);
    }
}
