//! Directory-tree persistence for the cross-instance coordinator.
//!
//! Four subtrees under the runtime root: `instances/`, `queue-state/`,
//! `locks/`, `checkpoints/` (the last owned by the checkpoint manager, not
//! touched here). Every write is tmp-then-rename; reads treat a missing
//! file as absence rather than an error.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::{Serialize, de::DeserializeOwned};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub struct RuntimeDirs {
    pub root: PathBuf,
}

impl RuntimeDirs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn default_root() -> PathBuf {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".agentrt").join("runtime")
    }

    pub fn instances(&self) -> PathBuf {
        self.root.join("instances")
    }

    pub fn queue_state(&self) -> PathBuf {
        self.root.join("queue-state")
    }

    pub fn locks(&self) -> PathBuf {
        self.root.join("locks")
    }
}

/// Writes `value` as JSON to `path`, tmp-then-rename.
pub async fn write_atomic<T: Serialize>(path: &Path, value: &T) -> eyre::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).await?;
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(value)?;
    {
        let mut f = fs::File::create(&tmp).await?;
        f.write_all(json.as_bytes()).await?;
        f.sync_all().await?;
    }
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Returns `None` if the file is missing or unparseable; corrupt entries in
/// a shared directory tree are another instance's problem, not a crash.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = fs::read_to_string(path).await.ok()?;
    match serde_json::from_str(&content) {
        Ok(v) => Some(v),
        Err(e) => {
            debug!(?path, error = %e, "coordinator::persistence::read_json: skipping unparseable file");
            None
        }
    }
}

/// Returns `None` if the file is missing or unreadable.
pub async fn read_text(path: &Path) -> Option<String> {
    fs::read_to_string(path).await.ok()
}

pub async fn list_json_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(mut entries) = fs::read_dir(dir).await else {
        return Vec::new();
    };
    let mut files = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().is_some_and(|e| e == "json") {
            files.push(path);
        }
    }
    files
}

pub async fn remove_file_if_exists(path: &Path) {
    let _ = fs::remove_file(path).await;
}

/// Stable, non-cryptographic digest used only to turn an arbitrary resource
/// name into a safe lock file name.
pub fn digest(resource: &str) -> String {
    let mut hasher = DefaultHasher::new();
    resource.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Thing {
        n: u32,
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.json");
        write_atomic(&path, &Thing { n: 7 }).await.unwrap();
        let back: Thing = read_json(&path).await.unwrap();
        assert_eq!(back, Thing { n: 7 });
    }

    #[tokio::test]
    async fn read_text_round_trips_plain_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lock");
        std::fs::write(&path, "owner-a:1000:2000").unwrap();
        assert_eq!(read_text(&path).await.unwrap(), "owner-a:1000:2000");
    }

    #[tokio::test]
    async fn read_missing_file_is_none() {
        let dir = tempdir().unwrap();
        let v: Option<Thing> = read_json(&dir.path().join("missing.json")).await;
        assert!(v.is_none());
    }

    #[test]
    fn digest_is_stable_for_same_input() {
        assert_eq!(digest("resource-a"), digest("resource-a"));
        assert_ne!(digest("resource-a"), digest("resource-b"));
    }
}
