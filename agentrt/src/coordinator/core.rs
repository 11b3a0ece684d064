//! Cross-instance coordinator (C8): liveness, fan-out limits, queue-state
//! broadcast, distributed locks and work stealing over a shared directory
//! tree. No single instance owns this state — every file is a snapshot
//! written by whichever instance produced it.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{ActiveModel, InstanceRecord};

use super::config::CoordinatorConfig;
use super::persistence::{self, RuntimeDirs};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StealableEntry {
    pub task_id: String,
    pub priority: String,
    pub enqueued_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStateSnapshot {
    pub instance_id: String,
    pub pending_task_count: u32,
    pub active_orchestrations: u32,
    pub avg_latency_ms: f64,
    #[serde(default)]
    pub stealable_entries: Vec<StealableEntry>,
    pub updated_at: u64,
}

/// On disk a lock is a plain-text line, `owner:acquiredAtMs:expiresAtMs`,
/// under a file named after a digest of `resource`; `resource` itself is
/// only carried in memory so [`Coordinator::release_lock`] knows which file
/// to touch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockToken {
    pub resource: String,
    pub owner: String,
    pub acquired_at: u64,
    pub expires_at: u64,
}

impl LockToken {
    fn to_line(&self) -> String {
        format!("{}:{}:{}", self.owner, self.acquired_at, self.expires_at)
    }

    fn from_line(resource: &str, line: &str) -> Option<Self> {
        let mut parts = line.trim().splitn(3, ':');
        let owner = parts.next()?.to_string();
        let acquired_at: u64 = parts.next()?.parse().ok()?;
        let expires_at: u64 = parts.next()?.parse().ok()?;
        Some(Self { resource: resource.to_string(), owner, acquired_at, expires_at })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StealingStats {
    pub total_attempts: u64,
    pub successful_steals: u64,
    pub avg_latency_ms: f64,
}

pub struct Coordinator {
    dirs: RuntimeDirs,
    config: CoordinatorConfig,
    instance_id: String,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    stats: Mutex<StealingStats>,
}

impl Coordinator {
    pub fn new(root: impl Into<std::path::PathBuf>, config: CoordinatorConfig) -> Self {
        Self {
            dirs: RuntimeDirs::new(root),
            config,
            instance_id: Uuid::now_v7().to_string(),
            heartbeat: Mutex::new(None),
            stats: Mutex::new(StealingStats::default()),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn instance_path(&self, instance_id: &str) -> std::path::PathBuf {
        self.dirs.instances().join(format!("{instance_id}.json"))
    }

    fn queue_state_path(&self, instance_id: &str) -> std::path::PathBuf {
        self.dirs.queue_state().join(format!("{instance_id}.json"))
    }

    /// Writes the registration file and spawns a background task that
    /// re-writes it every `heartbeatIntervalMs`. Dropping the returned
    /// coordinator does not stop the heartbeat; call [`Self::unregister`].
    pub async fn register(self: &Arc<Self>, session_id: String, cwd: String, now_ms: u64) -> eyre::Result<()> {
        let record = InstanceRecord {
            instance_id: self.instance_id.clone(),
            pid: std::process::id(),
            session_id,
            started_at: now_ms,
            last_heartbeat: now_ms,
            cwd,
            active_models: Vec::new(),
            pending_task_count: 0,
            avg_latency_ms: 0.0,
            last_task_completed_at: None,
        };
        persistence::write_atomic(&self.instance_path(&self.instance_id), &record).await?;

        let this = Arc::clone(self);
        let interval = Duration::from_millis(self.config.heartbeat_interval_ms);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = this.heartbeat_once().await {
                    warn!(error = %e, "Coordinator::register: heartbeat write failed");
                }
            }
        });
        *self.heartbeat.lock().await = Some(handle);
        info!(instance_id = %self.instance_id, "Coordinator::register: instance registered");
        Ok(())
    }

    async fn heartbeat_once(&self) -> eyre::Result<()> {
        let path = self.instance_path(&self.instance_id);
        let mut record: InstanceRecord = persistence::read_json(&path)
            .await
            .unwrap_or_else(|| InstanceRecord {
                instance_id: self.instance_id.clone(),
                pid: std::process::id(),
                session_id: String::new(),
                started_at: now_ms_fallback(),
                last_heartbeat: now_ms_fallback(),
                cwd: String::new(),
                active_models: Vec::new(),
                pending_task_count: 0,
                avg_latency_ms: 0.0,
                last_task_completed_at: None,
            });
        record.last_heartbeat = now_ms_fallback();
        persistence::write_atomic(&path, &record).await
    }

    pub async fn update_active_models(&self, models: Vec<ActiveModel>) -> eyre::Result<()> {
        let path = self.instance_path(&self.instance_id);
        if let Some(mut record) = persistence::read_json::<InstanceRecord>(&path).await {
            record.active_models = models;
            persistence::write_atomic(&path, &record).await?;
        }
        Ok(())
    }

    pub async fn unregister(&self) {
        if let Some(handle) = self.heartbeat.lock().await.take() {
            handle.abort();
        }
        persistence::remove_file_if_exists(&self.instance_path(&self.instance_id)).await;
    }

    /// Reads every instance file, drops ones whose heartbeat is stale or
    /// whose PID is dead, and deletes the stale files as a side effect.
    pub async fn active_instances(&self, now_ms: u64) -> Vec<InstanceRecord> {
        let mut live = Vec::new();
        for path in persistence::list_json_files(&self.dirs.instances()).await {
            let Some(record) = persistence::read_json::<InstanceRecord>(&path).await else { continue };
            if record.heartbeat_fresh(now_ms, self.config.heartbeat_timeout_ms) && is_process_alive(record.pid) {
                live.push(record);
            } else {
                persistence::remove_file_if_exists(&path).await;
            }
        }
        live
    }

    pub async fn my_parallel_limit(&self, total_max_llm: u32, now_ms: u64) -> u32 {
        let count = self.active_instances(now_ms).await.len().max(1) as u32;
        (total_max_llm.div_ceil(count)).max(1)
    }

    /// Lowers the base limit when this instance carries more pending work
    /// than the fleet average, raises it when others are idle.
    pub async fn dynamic_parallel_limit(&self, total_max_llm: u32, my_pending: u32, now_ms: u64) -> u32 {
        let base = self.my_parallel_limit(total_max_llm, now_ms).await;
        let remotes = self.remote_queue_states(now_ms).await;
        if remotes.is_empty() {
            return base;
        }
        let avg_remote_pending: f64 = remotes.iter().map(|q| q.pending_task_count as f64).sum::<f64>() / remotes.len() as f64;
        if (my_pending as f64) > avg_remote_pending * 1.5 {
            (base as f64 * 1.25).ceil() as u32
        } else if avg_remote_pending > (my_pending as f64) * 1.5 {
            ((base as f64 * 0.75).floor() as u32).max(1)
        } else {
            base
        }
    }

    pub async fn active_instances_for_model(&self, provider: &str, model: &str, now_ms: u64) -> u32 {
        self.active_instances(now_ms)
            .await
            .iter()
            .filter(|i| i.active_models.iter().any(|m| m.provider == provider && model_matches(&m.model, model)))
            .count() as u32
    }

    pub async fn model_parallel_limit(&self, provider: &str, model: &str, base_limit: u32, now_ms: u64) -> u32 {
        let fan_out = self.active_instances_for_model(provider, model, now_ms).await.max(1);
        (base_limit / fan_out).max(1)
    }

    pub async fn broadcast_queue_state(
        &self,
        pending_task_count: u32,
        active_orchestrations: u32,
        avg_latency_ms: f64,
        stealable_entries: Vec<StealableEntry>,
        now_ms: u64,
    ) -> eyre::Result<()> {
        let snapshot = QueueStateSnapshot {
            instance_id: self.instance_id.clone(),
            pending_task_count,
            active_orchestrations,
            avg_latency_ms,
            stealable_entries,
            updated_at: now_ms,
        };
        persistence::write_atomic(&self.queue_state_path(&self.instance_id), &snapshot).await
    }

    /// All non-self queue-state files younger than `queueStateTtlMs`; older
    /// ones are pruned as a side effect.
    pub async fn remote_queue_states(&self, now_ms: u64) -> Vec<QueueStateSnapshot> {
        let mut remotes = Vec::new();
        for path in persistence::list_json_files(&self.dirs.queue_state()).await {
            let Some(snapshot) = persistence::read_json::<QueueStateSnapshot>(&path).await else { continue };
            if snapshot.instance_id == self.instance_id {
                continue;
            }
            if now_ms.saturating_sub(snapshot.updated_at) > self.config.queue_state_ttl_ms {
                persistence::remove_file_if_exists(&path).await;
                continue;
            }
            remotes.push(snapshot);
        }
        remotes
    }

    fn lock_path(&self, resource: &str) -> std::path::PathBuf {
        self.dirs.locks().join(format!("{}.lock", persistence::digest(resource)))
    }

    /// Creates the lock file with `create_new` (O_EXCL); an expired lock is
    /// reclaimed by deleting it first and retrying once.
    pub async fn try_acquire_lock(&self, resource: &str, ttl_ms: u64, now_ms: u64) -> Option<LockToken> {
        let path = self.lock_path(resource);
        if let Some(dir) = path.parent() {
            let _ = tokio::fs::create_dir_all(dir).await;
        }
        if let Some(line) = persistence::read_text(&path).await {
            if let Some(existing) = LockToken::from_line(resource, &line) {
                if existing.expires_at > now_ms {
                    return None;
                }
            }
            persistence::remove_file_if_exists(&path).await;
        }
        let token = LockToken { resource: resource.to_string(), owner: self.instance_id.clone(), acquired_at: now_ms, expires_at: now_ms + ttl_ms };
        match std::fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut f) => {
                use std::io::Write;
                f.write_all(token.to_line().as_bytes()).ok()?;
                Some(token)
            }
            Err(_) => None,
        }
    }

    pub async fn release_lock(&self, token: &LockToken) {
        let path = self.lock_path(&token.resource);
        if let Some(line) = persistence::read_text(&path).await {
            if let Some(current) = LockToken::from_line(&token.resource, &line) {
                if current.owner == token.owner && current.expires_at == token.expires_at {
                    persistence::remove_file_if_exists(&path).await;
                }
            }
        }
    }

    pub async fn should_attempt_work_stealing(&self, my_pending: u32, now_ms: u64) -> bool {
        if my_pending != 0 {
            return false;
        }
        self.remote_queue_states(now_ms)
            .await
            .iter()
            .any(|q| q.pending_task_count >= self.config.steal_threshold)
    }

    /// Picks the busiest remote, locks it, lifts its oldest stealable entry
    /// into this instance's broadcast, and updates both sides. Any failure
    /// releases the lock (if acquired) and returns `None`.
    pub async fn safe_steal_work(&self, my_snapshot_before: &QueueStateSnapshot, now_ms: u64) -> Option<StealableEntry> {
        self.stats.lock().await.total_attempts += 1;
        let mut remotes = self.remote_queue_states(now_ms).await;
        remotes.sort_by_key(|q| std::cmp::Reverse(q.pending_task_count));
        let candidate = remotes.into_iter().find(|q| !q.stealable_entries.is_empty())?;

        let lock_key = format!("steal:{}", candidate.instance_id);
        let token = self.try_acquire_lock(&lock_key, self.config.lock_ttl_ms, now_ms).await?;

        let result = self.steal_from(&candidate, my_snapshot_before, now_ms).await;
        self.release_lock(&token).await;
        match result {
            Some(entry) => {
                let mut stats = self.stats.lock().await;
                stats.successful_steals += 1;
                Some(entry)
            }
            None => {
                debug!(from = %candidate.instance_id, "Coordinator::safe_steal_work: steal failed, lock released");
                None
            }
        }
    }

    async fn steal_from(&self, candidate: &QueueStateSnapshot, my_snapshot_before: &QueueStateSnapshot, now_ms: u64) -> Option<StealableEntry> {
        let path = self.queue_state_path(&candidate.instance_id);
        let mut remote: QueueStateSnapshot = persistence::read_json(&path).await?;
        let idx = remote
            .stealable_entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.enqueued_at)
            .map(|(i, _)| i)?;
        let stolen = remote.stealable_entries.remove(idx);
        remote.pending_task_count = remote.pending_task_count.saturating_sub(1);
        remote.updated_at = now_ms;
        persistence::write_atomic(&path, &remote).await.ok()?;

        let mut mine = my_snapshot_before.clone();
        mine.pending_task_count += 1;
        mine.updated_at = now_ms;
        persistence::write_atomic(&self.queue_state_path(&self.instance_id), &mine).await.ok()?;
        Some(stolen)
    }

    pub async fn stealing_stats(&self) -> StealingStats {
        self.stats.lock().await.clone()
    }
}

fn now_ms_fallback() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    true
}

/// `*` matches any suffix, e.g. `"claude-*"` matches `"claude-opus-4"`.
fn model_matches(pattern: &str, model: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => model.starts_with(prefix),
        None => pattern == model,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn coordinator(dir: &std::path::Path) -> Arc<Coordinator> {
        Arc::new(Coordinator::new(dir.to_path_buf(), CoordinatorConfig::default()))
    }

    #[tokio::test]
    async fn register_then_active_instances_sees_self() {
        let dir = tempdir().unwrap();
        let c = coordinator(dir.path());
        c.register("s1".into(), "/tmp".into(), 1_000).await.unwrap();
        let active = c.active_instances(1_000).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].instance_id, c.instance_id());
        c.unregister().await;
    }

    #[tokio::test]
    async fn stale_heartbeat_is_pruned() {
        let dir = tempdir().unwrap();
        let c = coordinator(dir.path());
        let record = InstanceRecord {
            instance_id: "dead".into(),
            pid: std::process::id(),
            session_id: "s".into(),
            started_at: 0,
            last_heartbeat: 0,
            cwd: "/tmp".into(),
            active_models: vec![],
            pending_task_count: 0,
            avg_latency_ms: 0.0,
            last_task_completed_at: None,
        };
        persistence::write_atomic(&c.instance_path("dead"), &record).await.unwrap();
        let active = c.active_instances(100_000).await;
        assert!(active.is_empty());
        assert!(!c.instance_path("dead").exists());
    }

    #[tokio::test]
    async fn my_parallel_limit_divides_by_active_instance_count() {
        let dir = tempdir().unwrap();
        let c = coordinator(dir.path());
        c.register("s1".into(), "/tmp".into(), 1_000).await.unwrap();
        assert_eq!(c.my_parallel_limit(10, 1_000).await, 10);

        let other = InstanceRecord {
            instance_id: "other".into(),
            pid: std::process::id(),
            session_id: "s".into(),
            started_at: 1_000,
            last_heartbeat: 1_000,
            cwd: "/tmp".into(),
            active_models: vec![],
            pending_task_count: 0,
            avg_latency_ms: 0.0,
            last_task_completed_at: None,
        };
        persistence::write_atomic(&c.instance_path("other"), &other).await.unwrap();
        assert_eq!(c.my_parallel_limit(10, 1_000).await, 5);
        c.unregister().await;
    }

    #[tokio::test]
    async fn model_parallel_limit_divides_by_fan_out() {
        let dir = tempdir().unwrap();
        let c = coordinator(dir.path());
        c.register("s1".into(), "/tmp".into(), 1_000).await.unwrap();
        c.update_active_models(vec![ActiveModel { provider: "anthropic".into(), model: "claude-opus".into(), since: 1_000 }])
            .await
            .unwrap();
        assert_eq!(c.model_parallel_limit("anthropic", "claude-opus", 8, 1_000).await, 8);
        c.unregister().await;
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_released() {
        let dir = tempdir().unwrap();
        let c = coordinator(dir.path());
        let token = c.try_acquire_lock("res", 10_000, 0).await.unwrap();
        assert!(c.try_acquire_lock("res", 10_000, 1_000).await.is_none());
        c.release_lock(&token).await;
        assert!(c.try_acquire_lock("res", 10_000, 2_000).await.is_some());
    }

    #[tokio::test]
    async fn lock_file_is_plain_text_owner_acquired_expires() {
        let dir = tempdir().unwrap();
        let c = coordinator(dir.path());
        let token = c.try_acquire_lock("res", 10_000, 5_000).await.unwrap();
        let path = c.lock_path("res");
        let line = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(line, format!("{}:5000:15000", c.instance_id()));
        assert_eq!(token.acquired_at, 5_000);
    }

    #[tokio::test]
    async fn expired_lock_is_reclaimed() {
        let dir = tempdir().unwrap();
        let c = coordinator(dir.path());
        c.try_acquire_lock("res", 100, 0).await.unwrap();
        assert!(c.try_acquire_lock("res", 100, 1_000).await.is_some());
    }

    #[tokio::test]
    async fn should_steal_only_when_idle_and_remote_busy() {
        let dir = tempdir().unwrap();
        let c = coordinator(dir.path());
        c.register("s1".into(), "/tmp".into(), 0).await.unwrap();
        assert!(!c.should_attempt_work_stealing(0, 0).await);

        let remote = QueueStateSnapshot {
            instance_id: "remote".into(),
            pending_task_count: 5,
            active_orchestrations: 1,
            avg_latency_ms: 100.0,
            stealable_entries: vec![StealableEntry { task_id: "t1".into(), priority: "normal".into(), enqueued_at: 0 }],
            updated_at: 0,
        };
        persistence::write_atomic(&c.queue_state_path("remote"), &remote).await.unwrap();
        assert!(c.should_attempt_work_stealing(0, 0).await);
        c.unregister().await;
    }

    #[tokio::test]
    async fn safe_steal_work_moves_oldest_entry() {
        let dir = tempdir().unwrap();
        let c = coordinator(dir.path());
        c.register("s1".into(), "/tmp".into(), 0).await.unwrap();
        let remote = QueueStateSnapshot {
            instance_id: "remote".into(),
            pending_task_count: 2,
            active_orchestrations: 0,
            avg_latency_ms: 0.0,
            stealable_entries: vec![
                StealableEntry { task_id: "old".into(), priority: "normal".into(), enqueued_at: 10 },
                StealableEntry { task_id: "new".into(), priority: "normal".into(), enqueued_at: 20 },
            ],
            updated_at: 0,
        };
        persistence::write_atomic(&c.queue_state_path("remote"), &remote).await.unwrap();

        let my_before = QueueStateSnapshot {
            instance_id: c.instance_id().to_string(),
            pending_task_count: 0,
            active_orchestrations: 0,
            avg_latency_ms: 0.0,
            stealable_entries: vec![],
            updated_at: 0,
        };
        let stolen = c.safe_steal_work(&my_before, 1_000).await.unwrap();
        assert_eq!(stolen.task_id, "old");
        assert_eq!(c.stealing_stats().await.successful_steals, 1);
        c.unregister().await;
    }
}
