//! Checkpoint manager (C10): one atomic file per task's resumable state.

use std::path::PathBuf;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::domain::Checkpoint;

use super::config::CheckpointConfig;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CheckpointStats {
    pub total: usize,
    pub expired: usize,
    pub oldest_created_at: Option<u64>,
}

pub struct CheckpointManager {
    dir: PathBuf,
    config: CheckpointConfig,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>, config: CheckpointConfig) -> Self {
        Self { dir: dir.into(), config }
    }

    fn path_for(&self, checkpoint: &Checkpoint) -> PathBuf {
        self.dir.join(checkpoint.file_name())
    }

    /// Any pre-existing file for this `taskId` (under a different checkpoint
    /// id) is removed first, so a task has at most one live checkpoint.
    pub async fn save(&self, checkpoint: &Checkpoint) -> eyre::Result<()> {
        fs::create_dir_all(&self.dir).await?;
        for stale in self.files_for_task(&checkpoint.task_id).await {
            if stale != self.path_for(checkpoint) {
                let _ = fs::remove_file(&stale).await;
            }
        }

        let path = self.path_for(checkpoint);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(checkpoint)?;
        {
            let mut f = fs::File::create(&tmp).await?;
            f.write_all(json.as_bytes()).await?;
            f.sync_all().await?;
        }
        fs::rename(&tmp, &path).await?;
        info!(task_id = %checkpoint.task_id, checkpoint_id = %checkpoint.id, "CheckpointManager::save: persisted");
        Ok(())
    }

    async fn files_for_task(&self, task_id: &str) -> Vec<PathBuf> {
        let Ok(mut entries) = fs::read_dir(&self.dir).await else { return Vec::new() };
        let prefix = format!("{task_id}__");
        let mut matches = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".json")) {
                matches.push(path);
            }
        }
        matches
    }

    /// Quarantines a corrupt file by moving it to `<file>.corrupt` and
    /// returning `None` rather than propagating the parse error.
    pub async fn load(&self, task_id: &str) -> Option<Checkpoint> {
        let files = self.files_for_task(task_id).await;
        let path = files.into_iter().next()?;
        let content = fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str::<Checkpoint>(&content) {
            Ok(c) => Some(c),
            Err(e) => {
                warn!(?path, error = %e, "CheckpointManager::load: corrupt checkpoint, quarantining");
                let corrupt_path = path.with_extension("json.corrupt");
                let _ = fs::rename(&path, &corrupt_path).await;
                None
            }
        }
    }

    pub async fn delete(&self, task_id: &str) {
        for path in self.files_for_task(task_id).await {
            let _ = fs::remove_file(&path).await;
        }
    }

    async fn all_checkpoints(&self) -> Vec<(PathBuf, Checkpoint)> {
        let Ok(mut entries) = fs::read_dir(&self.dir).await else { return Vec::new() };
        let mut out = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                if let Ok(content) = fs::read_to_string(&path).await {
                    if let Ok(c) = serde_json::from_str::<Checkpoint>(&content) {
                        out.push((path, c));
                    }
                }
            }
        }
        out
    }

    pub async fn list_all(&self) -> Vec<Checkpoint> {
        self.all_checkpoints().await.into_iter().map(|(_, c)| c).collect()
    }

    pub async fn list_expired(&self, now_ms: u64) -> Vec<Checkpoint> {
        self.all_checkpoints()
            .await
            .into_iter()
            .map(|(_, c)| c)
            .filter(|c| c.is_expired(now_ms))
            .collect()
    }

    /// Deletes every expired checkpoint, then drops the oldest surviving
    /// ones until `maxCheckpoints` holds.
    pub async fn cleanup(&self, now_ms: u64) -> usize {
        let mut all = self.all_checkpoints().await;
        let mut removed = 0;

        let mut kept = Vec::with_capacity(all.len());
        for (path, c) in all.drain(..) {
            if c.is_expired(now_ms) {
                let _ = fs::remove_file(&path).await;
                removed += 1;
            } else {
                kept.push((path, c));
            }
        }

        if kept.len() > self.config.max_checkpoints {
            kept.sort_by_key(|(_, c)| c.created_at);
            let overflow = kept.len() - self.config.max_checkpoints;
            for (path, _) in kept.into_iter().take(overflow) {
                let _ = fs::remove_file(&path).await;
                removed += 1;
            }
        }
        removed
    }

    pub async fn get_stats(&self, now_ms: u64) -> CheckpointStats {
        let all = self.all_checkpoints().await;
        CheckpointStats {
            total: all.len(),
            expired: all.iter().filter(|(_, c)| c.is_expired(now_ms)).count(),
            oldest_created_at: all.iter().map(|(_, c)| c.created_at).min(),
        }
    }
}
