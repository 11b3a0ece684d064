//! Plan/result types for the DAG executor (C11).

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::cancel::CancelToken;
use crate::domain::Priority;

#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub id: String,
    pub dependencies: Vec<String>,
    pub priority: Priority,
    pub estimated_duration_ms: u64,
    pub provider: String,
    pub model: String,
    pub tenant_key: String,
}

#[derive(Debug, Clone, Default)]
pub struct TaskPlan {
    pub id: String,
    pub tasks: Vec<TaskSpec>,
}

/// One upstream task's output, handed to its dependents as `context`.
#[derive(Debug, Clone)]
pub struct TaskOutput {
    pub task_id: String,
    pub value: Value,
}

/// Caller-supplied unit of work. Implementations typically go through the
/// admission controller themselves for anything that calls an LLM; the DAG
/// executor only sequences dependencies and concurrency.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &TaskSpec, context: &[TaskOutput], cancel: CancelToken) -> Result<Value, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DagStatus {
    Completed,
    Partial,
    Failed,
}

#[derive(Debug, Clone)]
pub struct DagResult {
    pub status: DagStatus,
    pub task_results: HashMap<String, Value>,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
    pub total_duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct DagOptions {
    pub max_concurrency: usize,
    pub abort_on_first_error: bool,
    pub use_weight_based_scheduling: bool,
    pub starvation_prevention_interval_ms: u64,
}

impl Default for DagOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            abort_on_first_error: false,
            use_weight_based_scheduling: true,
            starvation_prevention_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DagValidationError {
    #[error("duplicate task id(s): {0:?}")]
    DuplicateIds(Vec<String>),
    #[error("task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },
    #[error("dependency cycle involving: {0:?}")]
    Cycle(Vec<String>),
}
