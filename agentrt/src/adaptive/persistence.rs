//! Atomic persistence of learned limits to `<configDir>/adaptive-limits.json`.
//!
//! Write-to-temp-then-rename, matching the checkpoint manager's convention
//! for anything that must never leave a half-written file behind.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::LearnedLimit;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LearnedLimitsFile {
    pub limits: HashMap<String, LearnedLimit>,
}

pub fn save(path: &Path, snapshot: &LearnedLimitsFile) -> eyre::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(snapshot)?;
    {
        let mut tmp = fs::File::create(&tmp_path)?;
        tmp.write_all(json.as_bytes())?;
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

pub fn load(path: &Path) -> eyre::Result<LearnedLimitsFile> {
    if !path.exists() {
        return Ok(LearnedLimitsFile::default());
    }
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

pub fn default_path(config_dir: &Path) -> PathBuf {
    config_dir.join("adaptive-limits.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = default_path(dir.path());
        let mut snapshot = LearnedLimitsFile::default();
        snapshot.limits.insert("anthropic:claude".to_string(), LearnedLimit::new(4));
        save(&path, &snapshot).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.limits["anthropic:claude"].original_concurrency, 4);
    }

    #[test]
    fn load_missing_file_returns_empty() {
        let dir = tempdir().unwrap();
        let loaded = load(&default_path(dir.path())).unwrap();
        assert!(loaded.limits.is_empty());
    }

    #[test]
    fn save_leaves_no_tmp_file_behind() {
        let dir = tempdir().unwrap();
        let path = default_path(dir.path());
        save(&path, &LearnedLimitsFile::default()).unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        assert!(path.exists());
    }
}
