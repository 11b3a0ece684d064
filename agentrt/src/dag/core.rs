//! DAG executor (C11): sequences a plan's tasks through the admission
//! controller, respecting dependencies and a local concurrency cap.
//!
//! Readiness ordering is a lightweight priority/weight sort rather than a
//! second `queue::PriorityQueue` instance — fairness across tenants and
//! providers is already enforced once each task reaches the admission
//! controller; this layer only needs a deterministic local pick among tasks
//! that are ready right now.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinSet;

use crate::admission::{AdmissionController, DispatchOutcome, DispatchPermitInput};
use crate::cancel::CancelToken;
use crate::clock::SharedClock;
use crate::events::{EventBus, SchedulerEvent};

use super::types::{DagOptions, DagResult, DagStatus, DagValidationError, TaskExecutor, TaskOutput, TaskPlan, TaskSpec};
use super::validate::validate;

pub struct DagExecutor {
    admission: Arc<AdmissionController>,
    bus: Arc<EventBus>,
}

impl DagExecutor {
    pub fn new(admission: Arc<AdmissionController>, bus: Arc<EventBus>) -> Self {
        Self { admission, bus }
    }

    pub async fn run(
        &self,
        plan: TaskPlan,
        executor: Arc<dyn TaskExecutor>,
        options: DagOptions,
        clock: SharedClock,
        cancel: CancelToken,
    ) -> Result<DagResult, Vec<DagValidationError>> {
        validate(&plan)?;

        let start_ms = clock.now_ms();
        let dependents = dependents_map(&plan);
        let weights = compute_weights(&plan, &options, &dependents);

        let mut remaining: HashMap<String, TaskSpec> = plan.tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
        let mut outputs: HashMap<String, TaskOutput> = HashMap::new();
        let mut task_results: HashMap<String, Value> = HashMap::new();
        let mut completed_order: Vec<String> = Vec::new();
        let mut failed: Vec<String> = Vec::new();
        let mut skipped: HashSet<String> = HashSet::new();
        let mut ready_since: HashMap<String, u64> = HashMap::new();

        let mut ready: Vec<String> = remaining.values().filter(|t| t.dependencies.is_empty()).map(|t| t.id.clone()).collect();
        for id in &ready {
            ready_since.insert(id.clone(), start_ms);
        }

        let mut aborted = false;
        let mut in_flight: JoinSet<(String, Result<Value, String>)> = JoinSet::new();

        loop {
            if cancel.is_cancelled() {
                aborted = true;
            }

            if !aborted {
                while in_flight.len() < options.max_concurrency.max(1) {
                    let now = clock.now_ms();
                    let Some(id) = pick_next(&ready, &ready_since, &weights, now, options.starvation_prevention_interval_ms) else { break };
                    ready.retain(|r| r != &id);
                    ready_since.remove(&id);
                    let task = remaining.get(&id).expect("ready task exists in remaining").clone();
                    let context: Vec<TaskOutput> = task.dependencies.iter().filter_map(|d| outputs.get(d).cloned()).collect();

                    let admission = self.admission.clone();
                    let executor = executor.clone();
                    let clock = clock.clone();
                    let cancel = cancel.clone();
                    in_flight.spawn(async move {
                        let input = DispatchPermitInput {
                            task_id: task.id.clone(),
                            tool_name: format!("dag:{}", task.id),
                            priority: Some(task.priority),
                            tenant_key: task.tenant_key.clone(),
                            provider: task.provider.clone(),
                            model: task.model.clone(),
                            description: None,
                            parallel_count: None,
                            deadline_ms: None,
                            additional_requests: 1,
                            additional_llm: 1,
                            resume_from_checkpoint: false,
                        };
                        match admission.request_dispatch_permit(clock.as_ref(), cancel.clone(), input).await {
                            DispatchOutcome::Allowed(lease) => {
                                admission.consume(&lease.id).await;
                                let result = executor.execute(&task, &context, cancel).await;
                                admission.release(&lease.id).await;
                                (task.id, result)
                            }
                            DispatchOutcome::Aborted => (task.id, Err("dispatch permit aborted".to_string())),
                            DispatchOutcome::TimedOut => (task.id, Err("dispatch permit timed out".to_string())),
                        }
                    });
                }
            }

            if in_flight.is_empty() {
                break;
            }

            let Some(joined) = in_flight.join_next().await else { break };
            let (id, result) = match joined {
                Ok(pair) => pair,
                Err(join_err) => {
                    let id = "<unknown>".to_string();
                    self.bus.emit(SchedulerEvent::Warning { subject: id.clone(), context: "dag".to_string(), message: join_err.to_string() });
                    failed.push(id);
                    continue;
                }
            };
            remaining.remove(&id);

            match result {
                Ok(value) => {
                    outputs.insert(id.clone(), TaskOutput { task_id: id.clone(), value: value.clone() });
                    task_results.insert(id.clone(), value);
                    completed_order.push(id.clone());
                    if let Some(children) = dependents.get(&id) {
                        let now = clock.now_ms();
                        for child in children {
                            if let Some(child_task) = remaining.get(child) {
                                let all_ready = child_task.dependencies.iter().all(|d| outputs.contains_key(d));
                                if all_ready && !ready.contains(child) {
                                    ready.push(child.clone());
                                    ready_since.insert(child.clone(), now);
                                }
                            }
                        }
                    }
                }
                Err(message) => {
                    failed.push(id.clone());
                    self.bus.emit(SchedulerEvent::Warning { subject: id.clone(), context: "dag".to_string(), message });
                    if options.abort_on_first_error {
                        aborted = true;
                    } else {
                        skip_descendants(&id, &dependents, &mut remaining, &mut ready, &mut skipped);
                    }
                }
            }
        }

        if aborted {
            skipped.extend(remaining.keys().cloned());
        }

        let status = if failed.is_empty() && skipped.is_empty() {
            DagStatus::Completed
        } else if completed_order.is_empty() {
            DagStatus::Failed
        } else {
            DagStatus::Partial
        };

        Ok(DagResult {
            status,
            task_results,
            completed: completed_order,
            failed,
            skipped: skipped.into_iter().collect(),
            total_duration_ms: clock.now_ms().saturating_sub(start_ms),
        })
    }
}

fn dependents_map(plan: &TaskPlan) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for task in &plan.tasks {
        for dep in &task.dependencies {
            map.entry(dep.clone()).or_default().push(task.id.clone());
        }
    }
    map
}

fn compute_weights(plan: &TaskPlan, options: &DagOptions, dependents: &HashMap<String, Vec<String>>) -> HashMap<String, f64> {
    plan.tasks
        .iter()
        .map(|t| {
            let base = t.priority.weight();
            let weight = if options.use_weight_based_scheduling {
                let fanout = dependents.get(&t.id).map(|v| v.len()).unwrap_or(0) as f64;
                base * (1.0 + fanout) / (t.estimated_duration_ms.max(1) as f64)
            } else {
                base
            };
            (t.id.clone(), weight)
        })
        .collect()
}

fn pick_next(ready: &[String], ready_since: &HashMap<String, u64>, weights: &HashMap<String, f64>, now_ms: u64, starvation_ms: u64) -> Option<String> {
    if let Some(starved) = ready
        .iter()
        .filter(|id| now_ms.saturating_sub(*ready_since.get(*id).unwrap_or(&now_ms)) >= starvation_ms)
        .min_by_key(|id| ready_since.get(*id).copied().unwrap_or(now_ms))
    {
        return Some(starved.clone());
    }
    ready
        .iter()
        .max_by(|a, b| weights.get(*a).unwrap_or(&0.0).partial_cmp(weights.get(*b).unwrap_or(&0.0)).unwrap_or(std::cmp::Ordering::Equal))
        .cloned()
}

fn skip_descendants(failed_id: &str, dependents: &HashMap<String, Vec<String>>, remaining: &mut HashMap<String, TaskSpec>, ready: &mut Vec<String>, skipped: &mut HashSet<String>) {
    let mut stack = vec![failed_id.to_string()];
    while let Some(id) = stack.pop() {
        let Some(children) = dependents.get(&id) else { continue };
        for child in children {
            if remaining.remove(child).is_some() {
                skipped.insert(child.clone());
                ready.retain(|r| r != child);
                stack.push(child.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::{AdaptiveConfig, AdaptiveRateController};
    use crate::admission::AdmissionConfig;
    use crate::checkpoint::{CheckpointConfig, CheckpointManager};
    use crate::circuit::{CircuitBreaker, CircuitConfig};
    use crate::clock::MockClock;
    use crate::domain::Priority;
    use crate::parallelism::{ParallelismAdjuster, ParallelismConfig};
    use crate::penalty::{PenaltyConfig, PenaltyController};
    use crate::provider::ProviderStateTable;
    use crate::queue::QueueConfig;
    use crate::ratelimit::RateLimiter;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    fn spec(id: &str, deps: &[&str]) -> TaskSpec {
        TaskSpec {
            id: id.into(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            priority: Priority::Normal,
            estimated_duration_ms: 100,
            provider: "anthropic".into(),
            model: "claude".into(),
            tenant_key: "t".into(),
        }
    }

    fn executor_admission(dir: &std::path::Path) -> Arc<AdmissionController> {
        let bus = Arc::new(EventBus::new(64));
        let table = ProviderStateTable::new(8, 600.0);
        Arc::new(AdmissionController::new(
            AdmissionConfig { max_wait_ms: 2_000, poll_interval_ms: 5, ..AdmissionConfig::default() },
            QueueConfig::default(),
            Arc::new(CircuitBreaker::new(table.clone(), CircuitConfig::default(), bus.clone())),
            Arc::new(RateLimiter::new(table.clone())),
            Arc::new(ParallelismAdjuster::new(table.clone(), ParallelismConfig::default(), bus.clone())),
            Arc::new(PenaltyController::new(table.clone(), PenaltyConfig::default())),
            Arc::new(AdaptiveRateController::new(table.clone(), AdaptiveConfig::default(), dir)),
            Arc::new(CheckpointManager::new(dir.join("checkpoints"), CheckpointConfig::default())),
            None,
            bus,
        ))
    }

    struct RecordingExecutor {
        order: StdMutex<Vec<String>>,
        fail: HashSet<String>,
    }

    #[async_trait]
    impl TaskExecutor for RecordingExecutor {
        async fn execute(&self, task: &TaskSpec, _context: &[TaskOutput], _cancel: CancelToken) -> Result<Value, String> {
            self.order.lock().unwrap().push(task.id.clone());
            if self.fail.contains(&task.id) {
                Err(format!("{} failed", task.id))
            } else {
                Ok(Value::String(task.id.clone()))
            }
        }
    }

    #[tokio::test]
    async fn runs_dependent_tasks_after_their_dependency() {
        let dir = tempdir().unwrap();
        let admission = executor_admission(dir.path());
        let bus = Arc::new(EventBus::new(64));
        let dag = DagExecutor::new(admission, bus);
        let plan = TaskPlan { id: "p".into(), tasks: vec![spec("a", &[]), spec("b", &["a"])] };
        let executor = Arc::new(RecordingExecutor { order: StdMutex::new(Vec::new()), fail: HashSet::new() });
        let clock: SharedClock = Arc::new(MockClock::new(0));
        let (_h, cancel) = crate::cancel::cancel_pair();
        let result = dag.run(plan, executor.clone(), DagOptions::default(), clock, cancel).await.unwrap();
        assert_eq!(result.status, DagStatus::Completed);
        let order = executor.order.lock().unwrap();
        assert_eq!(order.as_slice(), ["a", "b"]);
    }

    #[tokio::test]
    async fn failed_task_skips_its_descendants_without_aborting_siblings() {
        let dir = tempdir().unwrap();
        let admission = executor_admission(dir.path());
        let bus = Arc::new(EventBus::new(64));
        let dag = DagExecutor::new(admission, bus);
        let plan = TaskPlan { id: "p".into(), tasks: vec![spec("a", &[]), spec("b", &["a"]), spec("c", &[])] };
        let mut fail = HashSet::new();
        fail.insert("a".to_string());
        let executor = Arc::new(RecordingExecutor { order: StdMutex::new(Vec::new()), fail });
        let clock: SharedClock = Arc::new(MockClock::new(0));
        let (_h, cancel) = crate::cancel::cancel_pair();
        let result = dag.run(plan, executor, DagOptions::default(), clock, cancel).await.unwrap();
        assert_eq!(result.status, DagStatus::Partial);
        assert!(result.failed.contains(&"a".to_string()));
        assert!(result.skipped.contains(&"b".to_string()));
        assert!(result.completed.contains(&"c".to_string()));
    }

    #[tokio::test]
    async fn rejects_an_invalid_plan_before_running_anything() {
        let dir = tempdir().unwrap();
        let admission = executor_admission(dir.path());
        let bus = Arc::new(EventBus::new(64));
        let dag = DagExecutor::new(admission, bus);
        let plan = TaskPlan { id: "p".into(), tasks: vec![spec("a", &["ghost"])] };
        let executor = Arc::new(RecordingExecutor { order: StdMutex::new(Vec::new()), fail: HashSet::new() });
        let clock: SharedClock = Arc::new(MockClock::new(0));
        let (_h, cancel) = crate::cancel::cancel_pair();
        let err = dag.run(plan, executor, DagOptions::default(), clock, cancel).await.unwrap_err();
        assert!(matches!(err[0], DagValidationError::UnknownDependency { .. }));
    }
}
