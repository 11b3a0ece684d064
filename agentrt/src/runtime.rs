//! `Runtime` wires C1-C12 plus the ambient config/logging/metrics stack
//! together. A binary or embedding application constructs exactly one.

use std::sync::Arc;

use crate::adaptive::AdaptiveRateController;
use crate::admission::AdmissionController;
use crate::circuit::CircuitBreaker;
use crate::checkpoint::CheckpointManager;
use crate::clock::{SharedClock, SystemClock};
use crate::config::RuntimeConfig;
use crate::coordinator::Coordinator;
use crate::events::EventBus;
use crate::metrics::MetricsCollector;
use crate::parallelism::ParallelismAdjuster;
use crate::penalty::PenaltyController;
use crate::provider::ProviderStateTable;
use crate::queue::QueueConfig;
use crate::ratelimit::RateLimiter;
use crate::retry::{RateLimitGate, RetryEngine};

/// The process-wide collection of every scheduling component, constructed
/// once per instance and shared behind `Arc` by every caller.
pub struct Runtime {
    pub config: RuntimeConfig,
    pub bus: Arc<EventBus>,
    pub table: ProviderStateTable,
    pub circuit: Arc<CircuitBreaker>,
    pub ratelimit: Arc<RateLimiter>,
    pub parallelism: Arc<ParallelismAdjuster>,
    pub penalty: Arc<PenaltyController>,
    pub adaptive: Arc<AdaptiveRateController>,
    pub retry: Arc<RetryEngine>,
    pub checkpoints: Arc<CheckpointManager>,
    pub coordinator: Arc<Coordinator>,
    pub admission: Arc<AdmissionController>,
    pub metrics: Arc<MetricsCollector>,
    pub clock: SharedClock,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        let bus = Arc::new(EventBus::with_default_capacity());
        let table = ProviderStateTable::new(config.admission.default_model_concurrency, config.default_rpm);

        let circuit = Arc::new(CircuitBreaker::new(table.clone(), config.circuit.clone(), bus.clone()));
        let ratelimit = Arc::new(RateLimiter::new(table.clone()));
        let parallelism = Arc::new(ParallelismAdjuster::new(table.clone(), config.parallelism.clone(), bus.clone()));
        let penalty = Arc::new(PenaltyController::new(table.clone(), config.penalty.clone()));
        let adaptive = Arc::new(AdaptiveRateController::new(table.clone(), config.adaptive.clone(), &config.config_dir));
        let retry = Arc::new(RetryEngine::new(RateLimitGate::new(), bus.clone()));
        let checkpoints = Arc::new(CheckpointManager::new(config.config_dir.join("checkpoints"), crate::checkpoint::CheckpointConfig::default()));
        let coordinator = Arc::new(Coordinator::new(config.config_dir.join("runtime"), config.coordinator.clone()));

        let admission = Arc::new(AdmissionController::new(
            config.admission.clone(),
            QueueConfig { starvation_threshold_ms: config.queue.starvation_threshold_ms, max_skip_count: config.queue.max_skip_count },
            circuit.clone(),
            ratelimit.clone(),
            parallelism.clone(),
            penalty.clone(),
            adaptive.clone(),
            checkpoints.clone(),
            Some(coordinator.clone()),
            bus.clone(),
        ));

        let metrics = Arc::new(MetricsCollector::new(config.metrics.clone(), Some(coordinator.clone())));

        Self { config, bus, table, circuit, ratelimit, parallelism, penalty, adaptive, retry, checkpoints, coordinator, admission, metrics, clock: Arc::new(SystemClock) }
    }

    /// Starts the coordinator heartbeat, the metrics event listener and the
    /// optional scheduling-event file log. Returns their join handles so the
    /// caller can await clean shutdown.
    pub async fn start(&self, cwd: impl Into<String>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();
        if let Err(err) = self.coordinator.register(uuid::Uuid::now_v7().to_string(), cwd.into(), self.clock.now_ms()).await {
            tracing::warn!(error = %err, "Runtime::start: failed to register this instance with the coordinator");
        }
        handles.push(self.metrics.clone().spawn_listener(self.bus.clone(), self.clock.clone()));
        handles.push(crate::events::spawn_event_logger(self.bus.clone(), self.config.config_dir.join("events")));
        handles
    }
}
