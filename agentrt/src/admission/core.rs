//! Agent runtime admission controller (C9): the fused dispatch-permit
//! operation every caller goes through before running a tool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adaptive::AdaptiveRateController;
use crate::cancel::CancelToken;
use crate::checkpoint::CheckpointManager;
use crate::circuit::CircuitBreaker;
use crate::clock::Clock;
use crate::coordinator::Coordinator;
use crate::domain::{Checkpoint, Lease, Priority, Task, infer_priority, provider_key};
use crate::events::{EventBus, SchedulerEvent};
use crate::parallelism::ParallelismAdjuster;
use crate::penalty::PenaltyController;
use crate::queue::{PriorityQueue, QueueConfig};
use crate::ratelimit::RateLimiter;

use super::config::AdmissionConfig;

pub struct DispatchPermitInput {
    pub task_id: String,
    pub tool_name: String,
    pub priority: Option<Priority>,
    pub tenant_key: String,
    pub provider: String,
    pub model: String,
    pub description: Option<String>,
    pub parallel_count: Option<u32>,
    pub deadline_ms: Option<u64>,
    pub additional_requests: u32,
    pub additional_llm: u32,
    pub resume_from_checkpoint: bool,
}

#[derive(Debug)]
pub enum DispatchOutcome {
    Allowed(Lease),
    Aborted,
    TimedOut,
}

struct Reservation {
    task_id: String,
    provider: String,
    model: String,
    priority: Priority,
    additional_requests: u32,
    additional_llm: u32,
    expires_at_ms: u64,
}

#[derive(Default)]
struct AdmissionState {
    active_requests: u32,
    active_llm: u32,
    active_orchestrations: u32,
    active_per_model: HashMap<String, u32>,
    last_dispatched_tenant: Option<String>,
    consecutive_dispatches: u32,
    evicted_entries: u64,
    reservations: HashMap<String, Reservation>,
}

pub struct AdmissionController {
    config: AdmissionConfig,
    queue: Mutex<PriorityQueue>,
    state: Mutex<AdmissionState>,
    circuit: Arc<CircuitBreaker>,
    ratelimit: Arc<RateLimiter>,
    parallelism: Arc<ParallelismAdjuster>,
    penalty: Arc<PenaltyController>,
    adaptive: Arc<AdaptiveRateController>,
    checkpoints: Arc<CheckpointManager>,
    coordinator: Option<Arc<Coordinator>>,
    bus: Arc<EventBus>,
}

impl AdmissionController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AdmissionConfig,
        queue_config: QueueConfig,
        circuit: Arc<CircuitBreaker>,
        ratelimit: Arc<RateLimiter>,
        parallelism: Arc<ParallelismAdjuster>,
        penalty: Arc<PenaltyController>,
        adaptive: Arc<AdaptiveRateController>,
        checkpoints: Arc<CheckpointManager>,
        coordinator: Option<Arc<Coordinator>>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            queue: Mutex::new(PriorityQueue::new(queue_config)),
            state: Mutex::new(AdmissionState::default()),
            circuit,
            ratelimit,
            parallelism,
            penalty,
            adaptive,
            checkpoints,
            coordinator,
            bus,
        }
    }

    async fn per_model_limit(&self, provider: &str, model: &str, now_ms: u64) -> u32 {
        let base = self.config.default_model_concurrency;
        let learned = self.adaptive.get_effective_limit(provider, model, base).await;
        let adjusted = self.parallelism.get_parallelism(provider, model, now_ms).await;
        let penalized = self.penalty.apply_limit(provider, model, now_ms, base).await;
        let combined = learned.min(adjusted).min(penalized).max(1);
        match &self.coordinator {
            Some(c) => {
                let instances = c.active_instances(now_ms).await.len().max(1) as u32;
                self.parallelism
                    .apply_cross_instance_limits(provider, model, now_ms, instances)
                    .await
                    .min(combined)
                    .max(1)
            }
            None => combined,
        }
    }

    async fn sleep_or_cancel(&self, cancel: &mut CancelToken, ms: u64) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(ms)) => false,
            _ = cancel.cancelled() => true,
        }
    }

    async fn remove_from_queue(&self, task_id: &str, reason: &str) {
        let mut q = self.queue.lock().await;
        if q.remove(task_id).is_some() {
            info!(task_id, reason, "AdmissionController::remove_from_queue: task left the queue");
        }
    }

    /// Saves a background victim's opaque state via the checkpoint manager
    /// and force-releases its lease, freeing the slot that blocked a
    /// higher-priority request. The victim resumes later by re-requesting a
    /// permit with `resumeFromCheckpoint=true`.
    async fn preempt(&self, victim_lease_id: &str, victim_task_id: &str, provider: &str, model: &str, now_ms: u64) {
        let checkpoint = Checkpoint {
            id: Uuid::now_v7().to_string(),
            task_id: victim_task_id.to_string(),
            source: "admission_preemption".to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            priority: Priority::Background,
            state: serde_json::json!({ "lease_id": victim_lease_id }),
            schema: "admission.preemption.v1".to_string(),
            progress: 0.0,
            created_at: now_ms,
            ttl_ms: self.config.preemption_checkpoint_ttl_ms,
            metadata: None,
        };
        if let Err(e) = self.checkpoints.save(&checkpoint).await {
            warn!(task_id = victim_task_id, error = %e, "AdmissionController::preempt: failed to save victim checkpoint");
        }
        self.release(victim_lease_id).await;
        self.bus.emit(SchedulerEvent::LeasePreempted {
            lease_id: victim_lease_id.to_string(),
            task_id: victim_task_id.to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            priority: Priority::Background.to_string(),
        });
        info!(task_id = victim_task_id, lease_id = victim_lease_id, "AdmissionController::preempt: preempted background lease");
    }

    /// Builds, enqueues and polls a task through capacity/circuit/rate-limit
    /// gates until admitted, aborted or timed out.
    pub async fn request_dispatch_permit(&self, clock: &dyn Clock, mut cancel: CancelToken, input: DispatchPermitInput) -> DispatchOutcome {
        let priority = input.priority.unwrap_or_else(|| infer_priority(&input.tool_name, input.parallel_count));
        let mut task = Task::new(&input.task_id, &input.tool_name, priority, &input.tenant_key, clock.now_ms(), input.description.as_deref());
        task.deadline_ms = input.deadline_ms;

        if input.resume_from_checkpoint {
            self.checkpoints.delete(&input.task_id).await;
        }

        {
            let mut q = self.queue.lock().await;
            q.enqueue(task.clone());
        }
        self.bus.emit(SchedulerEvent::TaskEnqueued {
            task_id: task.id.clone(),
            priority: priority.to_string(),
            tenant_key: input.tenant_key.clone(),
        });

        let start = clock.now_ms();
        let key = provider_key(&input.provider, &input.model);
        loop {
            let now = clock.now_ms();
            if cancel.is_cancelled() {
                self.remove_from_queue(&task.id, "cancelled").await;
                return DispatchOutcome::Aborted;
            }
            if now.saturating_sub(start) > self.config.max_wait_ms {
                self.remove_from_queue(&task.id, "timed_out").await;
                return DispatchOutcome::TimedOut;
            }

            {
                let mut q = self.queue.lock().await;
                q.promote_starving_tasks(now);
            }

            let circuit_ok = self.circuit.check(&input.provider, &input.model, now).await.allowed;
            let gate_wait = self.ratelimit.can_proceed(&input.provider, &input.model, now, 1.0).await;
            if !circuit_ok || gate_wait > 0 {
                if self.sleep_or_cancel(&mut cancel, self.config.poll_interval_ms).await {
                    self.remove_from_queue(&task.id, "cancelled").await;
                    return DispatchOutcome::Aborted;
                }
                continue;
            }

            let is_my_turn = {
                let q = self.queue.lock().await;
                q.peek().is_some_and(|t| t.id == task.id)
            };
            if !is_my_turn {
                if self.sleep_or_cancel(&mut cancel, self.config.poll_interval_ms).await {
                    self.remove_from_queue(&task.id, "cancelled").await;
                    return DispatchOutcome::Aborted;
                }
                continue;
            }

            let mut state = self.state.lock().await;
            let same_tenant_monopolizing = state.last_dispatched_tenant.as_deref() == Some(input.tenant_key.as_str())
                && state.consecutive_dispatches >= self.config.consecutive_dispatch_limit;
            if same_tenant_monopolizing {
                drop(state);
                {
                    let mut q = self.queue.lock().await;
                    q.mark_skipped(&task.id);
                }
                if self.sleep_or_cancel(&mut cancel, self.config.poll_interval_ms).await {
                    self.remove_from_queue(&task.id, "cancelled").await;
                    return DispatchOutcome::Aborted;
                }
                continue;
            }

            let per_model_limit = self.per_model_limit(&input.provider, &input.model, now).await;
            let active_for_model = *state.active_per_model.get(&key).unwrap_or(&0);
            let capacity_ok = state.active_requests + input.additional_requests <= self.config.max_total_active_requests
                && state.active_llm + input.additional_llm <= self.config.max_total_active_llm
                && state.active_orchestrations < self.config.max_concurrent_orchestrations
                && active_for_model < per_model_limit;

            if !capacity_ok {
                let only_blocked_by_model_slot = active_for_model >= per_model_limit
                    && state.active_requests + input.additional_requests <= self.config.max_total_active_requests
                    && state.active_llm + input.additional_llm <= self.config.max_total_active_llm
                    && state.active_orchestrations < self.config.max_concurrent_orchestrations;

                let victim = if priority > Priority::Background && only_blocked_by_model_slot {
                    state
                        .reservations
                        .iter()
                        .find(|(_, r)| r.priority == Priority::Background && provider_key(&r.provider, &r.model) == key)
                        .map(|(id, r)| (id.clone(), r.task_id.clone()))
                } else {
                    None
                };
                drop(state);

                if let Some((victim_lease_id, victim_task_id)) = victim {
                    self.preempt(&victim_lease_id, &victim_task_id, &input.provider, &input.model, now).await;
                    continue;
                }

                if self.sleep_or_cancel(&mut cancel, self.config.poll_interval_ms).await {
                    self.remove_from_queue(&task.id, "cancelled").await;
                    return DispatchOutcome::Aborted;
                }
                continue;
            }

            {
                let mut q = self.queue.lock().await;
                q.dequeue();
            }
            self.bus.emit(SchedulerEvent::TaskDequeued { task_id: task.id.clone(), priority: priority.to_string() });

            let lease_id = Uuid::now_v7().to_string();
            let lease = Lease::new(lease_id.clone(), input.tool_name.clone(), input.additional_requests, input.additional_llm, now + self.config.reservation_ttl_ms);
            state.reservations.insert(
                lease_id.clone(),
                Reservation {
                    task_id: task.id.clone(),
                    provider: input.provider.clone(),
                    model: input.model.clone(),
                    priority,
                    additional_requests: input.additional_requests,
                    additional_llm: input.additional_llm,
                    expires_at_ms: now + self.config.reservation_ttl_ms,
                },
            );
            if state.last_dispatched_tenant.as_deref() == Some(input.tenant_key.as_str()) {
                state.consecutive_dispatches += 1;
            } else {
                state.last_dispatched_tenant = Some(input.tenant_key.clone());
                state.consecutive_dispatches = 1;
            }
            self.bus.emit(SchedulerEvent::LeaseIssued { lease_id, task_id: task.id.clone() });
            return DispatchOutcome::Allowed(lease);
        }
    }

    /// Transitions a reservation to active and bumps the global counters.
    pub async fn consume(&self, lease_id: &str) {
        let mut state = self.state.lock().await;
        let Some(res) = state.reservations.get(lease_id) else { return };
        let key = provider_key(&res.provider, &res.model);
        let additional_requests = res.additional_requests;
        let additional_llm = res.additional_llm;
        state.active_requests += additional_requests;
        state.active_llm += additional_llm;
        state.active_orchestrations += 1;
        *state.active_per_model.entry(key).or_insert(0) += 1;
    }

    /// Removes the reservation and gives back its counters; idempotent.
    pub async fn release(&self, lease_id: &str) {
        let mut state = self.state.lock().await;
        let Some(res) = state.reservations.remove(lease_id) else { return };
        let key = provider_key(&res.provider, &res.model);
        state.active_requests = state.active_requests.saturating_sub(res.additional_requests);
        state.active_llm = state.active_llm.saturating_sub(res.additional_llm);
        state.active_orchestrations = state.active_orchestrations.saturating_sub(1);
        if let Some(count) = state.active_per_model.get_mut(&key) {
            *count = count.saturating_sub(1);
        }
        self.bus.emit(SchedulerEvent::LeaseReleased { lease_id: lease_id.to_string() });
    }

    /// Extends a reservation's expiry; a no-op if the lease is unknown or
    /// already released.
    pub async fn heartbeat(&self, lease_id: &str, now_ms: u64, ttl_ms: u64) {
        let mut state = self.state.lock().await;
        if let Some(res) = state.reservations.get_mut(lease_id) {
            res.expires_at_ms = now_ms + ttl_ms;
        }
    }

    /// Releases every reservation whose TTL has lapsed; call on a timer.
    pub async fn reap_expired(&self, now_ms: u64) -> Vec<String> {
        let expired: Vec<String> = {
            let state = self.state.lock().await;
            state
                .reservations
                .iter()
                .filter(|(_, res)| res.expires_at_ms <= now_ms)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in &expired {
            self.release(id).await;
            self.bus.emit(SchedulerEvent::Warning {
                subject: id.clone(),
                context: "admission".to_string(),
                message: "capacity reservation expired".to_string(),
            });
        }
        expired
    }

    pub async fn evicted_entries(&self) -> u64 {
        self.state.lock().await.evicted_entries
    }
}
