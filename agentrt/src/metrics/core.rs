//! In-memory rolling-window metrics collector (C12): the scheduler's only
//! read path for operational visibility. Every public method is lock-scoped
//! and none of them can fail — logging failures are counted, never raised.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use tokio::sync::Mutex;
use tracing::warn;

use crate::coordinator::{Coordinator, StealingStats};

use super::config::MetricsConfig;
use super::logger::RotatingLog;
use super::types::{EventKind, GroupBreakdown, MetricsSnapshot, MetricsSummary, Sample};

pub struct MetricsCollector {
    config: MetricsConfig,
    window: Mutex<VecDeque<Sample>>,
    completions: AtomicU64,
    preemptions: AtomicU64,
    steals: AtomicU64,
    rate_limit_hits: AtomicU64,
    logging_errors: AtomicU64,
    queue_depth: AtomicU32,
    active_tasks: AtomicU32,
    logger: Option<Mutex<RotatingLog>>,
    coordinator: Option<Arc<Coordinator>>,
}

impl MetricsCollector {
    pub fn new(config: MetricsConfig, coordinator: Option<Arc<Coordinator>>) -> Self {
        let logger = config.enable_logging.then(|| Mutex::new(RotatingLog::new(config.metrics_dir.clone(), config.max_file_bytes, config.max_files)));
        Self {
            config,
            window: Mutex::new(VecDeque::new()),
            completions: AtomicU64::new(0),
            preemptions: AtomicU64::new(0),
            steals: AtomicU64::new(0),
            rate_limit_hits: AtomicU64::new(0),
            logging_errors: AtomicU64::new(0),
            queue_depth: AtomicU32::new(0),
            active_tasks: AtomicU32::new(0),
            logger,
            coordinator,
        }
    }

    pub fn set_queue_depth(&self, depth: u32) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn set_active_tasks(&self, count: u32) {
        self.active_tasks.store(count, Ordering::Relaxed);
    }

    pub async fn record_dispatch(&self, now_ms: u64, provider: &str, model: &str, priority: &str, wait_ms: u64) {
        self.push(Sample { ts_ms: now_ms, kind: EventKind::Dispatch, provider: provider.into(), model: model.into(), priority: priority.into(), wait_ms: Some(wait_ms), execution_ms: None }).await;
    }

    pub async fn record_completion(&self, now_ms: u64, provider: &str, model: &str, priority: &str, execution_ms: u64) {
        self.completions.fetch_add(1, Ordering::Relaxed);
        self.push(Sample { ts_ms: now_ms, kind: EventKind::Completion, provider: provider.into(), model: model.into(), priority: priority.into(), wait_ms: None, execution_ms: Some(execution_ms) }).await;
    }

    pub async fn record_preemption(&self, now_ms: u64, provider: &str, model: &str, priority: &str) {
        self.preemptions.fetch_add(1, Ordering::Relaxed);
        self.push(Sample { ts_ms: now_ms, kind: EventKind::Preemption, provider: provider.into(), model: model.into(), priority: priority.into(), wait_ms: None, execution_ms: None }).await;
    }

    pub async fn record_steal(&self, now_ms: u64, provider: &str, model: &str, priority: &str) {
        self.steals.fetch_add(1, Ordering::Relaxed);
        self.push(Sample { ts_ms: now_ms, kind: EventKind::Steal, provider: provider.into(), model: model.into(), priority: priority.into(), wait_ms: None, execution_ms: None }).await;
    }

    pub async fn record_rate_limit_hit(&self, now_ms: u64, provider: &str, model: &str, priority: &str) {
        self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
        self.push(Sample { ts_ms: now_ms, kind: EventKind::RateLimitHit, provider: provider.into(), model: model.into(), priority: priority.into(), wait_ms: None, execution_ms: None }).await;
    }

    async fn push(&self, sample: Sample) {
        if let Some(logger) = &self.logger {
            let mut log = logger.lock().await;
            if let Err(err) = log.append(&sample) {
                self.logging_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "metrics::MetricsCollector::push: dropping log write");
            }
        }
        let mut window = self.window.lock().await;
        window.push_back(sample);
        while window.len() > self.config.window_capacity {
            window.pop_front();
        }
    }

    pub async fn get_metrics(&self) -> MetricsSnapshot {
        let window = self.window.lock().await;
        let waits: Vec<u64> = window.iter().filter_map(|s| s.wait_ms).collect();
        let execs: Vec<u64> = window.iter().filter_map(|s| s.execution_ms).collect();
        MetricsSnapshot {
            p50_wait_ms: percentile(&waits, 0.50),
            p99_wait_ms: percentile(&waits, 0.99),
            p50_execution_ms: percentile(&execs, 0.50),
            p99_execution_ms: percentile(&execs, 0.99),
            completions: self.completions.load(Ordering::Relaxed),
            preemptions: self.preemptions.load(Ordering::Relaxed),
            steals: self.steals.load(Ordering::Relaxed),
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
            logging_errors: self.logging_errors.load(Ordering::Relaxed),
        }
    }

    pub async fn get_summary(&self, now_ms: u64, period_ms: u64) -> MetricsSummary {
        let window = self.window.lock().await;
        let cutoff = now_ms.saturating_sub(period_ms);
        let in_period: Vec<&Sample> = window.iter().filter(|s| s.ts_ms >= cutoff).collect();

        let mut by_provider: HashMap<String, GroupAccum> = HashMap::new();
        let mut by_priority: HashMap<String, GroupAccum> = HashMap::new();
        for sample in &in_period {
            by_provider.entry(sample.provider.clone()).or_default().absorb(sample);
            by_priority.entry(sample.priority.clone()).or_default().absorb(sample);
        }

        MetricsSummary {
            period_ms,
            sample_count: in_period.len(),
            by_provider: by_provider.into_iter().map(|(k, v)| (k, v.finish())).collect(),
            by_priority: by_priority.into_iter().map(|(k, v)| (k, v.finish())).collect(),
        }
    }

    pub async fn get_stealing_stats(&self) -> Option<StealingStats> {
        match &self.coordinator {
            Some(c) => Some(c.stealing_stats().await),
            None => None,
        }
    }

    /// Subscribes to the shared event bus and folds the events it can infer
    /// timing-free counters from into this collector. Dispatch/completion
    /// timings still come from direct `record_*` calls made by the admission
    /// controller and DAG executor, which have the durations on hand.
    pub fn spawn_listener(self: Arc<Self>, bus: Arc<crate::events::EventBus>, clock: crate::clock::SharedClock) -> tokio::task::JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                let now = clock.now_ms();
                match event {
                    crate::events::SchedulerEvent::RateLimited { subject, .. } => {
                        let (provider, model) = split_subject(&subject);
                        self.record_rate_limit_hit(now, provider, model, "unknown").await;
                    }
                    crate::events::SchedulerEvent::WorkStolen { .. } => {
                        self.record_steal(now, "unknown", "unknown", "unknown").await;
                    }
                    crate::events::SchedulerEvent::LeasePreempted { provider, model, priority, .. } => {
                        self.record_preemption(now, &provider, &model, &priority).await;
                    }
                    _ => {}
                }
            }
        })
    }
}

fn split_subject(subject: &str) -> (&str, &str) {
    subject.split_once(':').unwrap_or((subject, "unknown"))
}

#[derive(Default)]
struct GroupAccum {
    completions: u64,
    preemptions: u64,
    rate_limit_hits: u64,
    wait_sum: u64,
    wait_count: u64,
    exec_sum: u64,
    exec_count: u64,
}

impl GroupAccum {
    fn absorb(&mut self, sample: &Sample) {
        match sample.kind {
            EventKind::Completion => self.completions += 1,
            EventKind::Preemption => self.preemptions += 1,
            EventKind::RateLimitHit => self.rate_limit_hits += 1,
            _ => {}
        }
        if let Some(w) = sample.wait_ms {
            self.wait_sum += w;
            self.wait_count += 1;
        }
        if let Some(e) = sample.execution_ms {
            self.exec_sum += e;
            self.exec_count += 1;
        }
    }

    fn finish(self) -> GroupBreakdown {
        GroupBreakdown {
            completions: self.completions,
            preemptions: self.preemptions,
            rate_limit_hits: self.rate_limit_hits,
            avg_wait_ms: if self.wait_count > 0 { self.wait_sum as f64 / self.wait_count as f64 } else { 0.0 },
            avg_execution_ms: if self.exec_count > 0 { self.exec_sum as f64 / self.exec_count as f64 } else { 0.0 },
        }
    }
}

fn percentile(values: &[u64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let rank = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[rank.min(sorted.len() - 1)] as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{Coordinator, CoordinatorConfig};
    use tempfile::tempdir;

    fn collector() -> MetricsCollector {
        MetricsCollector::new(MetricsConfig { window_capacity: 100, enable_logging: false, ..MetricsConfig::default() }, None)
    }

    #[tokio::test]
    async fn percentiles_reflect_recorded_waits() {
        let m = collector();
        for wait in [10, 20, 30, 40, 50] {
            m.record_dispatch(0, "anthropic", "claude", "normal", wait).await;
        }
        let snapshot = m.get_metrics().await;
        assert_eq!(snapshot.p50_wait_ms, 30.0);
        assert_eq!(snapshot.p99_wait_ms, 50.0);
    }

    #[tokio::test]
    async fn window_evicts_oldest_sample_past_capacity() {
        let m = MetricsCollector::new(MetricsConfig { window_capacity: 2, enable_logging: false, ..MetricsConfig::default() }, None);
        for i in 0..5u64 {
            m.record_completion(i, "anthropic", "claude", "normal", i * 10).await;
        }
        let summary = m.get_summary(10, 1_000).await;
        assert_eq!(summary.sample_count, 2);
    }

    #[tokio::test]
    async fn summary_breaks_down_by_provider_and_priority() {
        let m = collector();
        m.record_completion(0, "anthropic", "claude", "high", 100).await;
        m.record_completion(0, "openai", "gpt", "normal", 200).await;
        let summary = m.get_summary(1_000, 10_000).await;
        assert_eq!(summary.by_provider["anthropic"].completions, 1);
        assert_eq!(summary.by_priority["normal"].completions, 1);
    }

    #[tokio::test]
    async fn logging_failure_is_counted_not_propagated() {
        let dir = tempdir().unwrap();
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"not a dir").unwrap();
        let m = MetricsCollector::new(MetricsConfig { enable_logging: true, metrics_dir: blocked, ..MetricsConfig::default() }, None);
        m.record_completion(0, "anthropic", "claude", "normal", 10).await;
        let snapshot = m.get_metrics().await;
        assert_eq!(snapshot.logging_errors, 1);
        assert_eq!(snapshot.completions, 1);
    }

    #[tokio::test]
    async fn stealing_stats_forward_to_coordinator_when_present() {
        let dir = tempdir().unwrap();
        let coordinator = Arc::new(Coordinator::new(dir.path().to_path_buf(), CoordinatorConfig::default()));
        let m = MetricsCollector::new(MetricsConfig::default(), Some(coordinator));
        assert!(m.get_stealing_stats().await.is_some());
    }
}
