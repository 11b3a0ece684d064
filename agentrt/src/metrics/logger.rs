//! Rotating JSONL event log. Logging is best-effort: every I/O error is
//! swallowed by the caller, which only counts it — metrics must never block
//! scheduling.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::types::Sample;

pub struct RotatingLog {
    dir: PathBuf,
    max_file_bytes: u64,
    max_files: usize,
    current: Option<(PathBuf, File, u64)>,
}

impl RotatingLog {
    pub fn new(dir: PathBuf, max_file_bytes: u64, max_files: usize) -> Self {
        Self { dir, max_file_bytes, max_files, current: None }
    }

    pub fn append(&mut self, sample: &Sample) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let mut line = serde_json::to_string(sample).map_err(std::io::Error::other)?;
        line.push('\n');

        if self.current.is_none() {
            self.open_next()?;
        }
        if let Some((_, _, len)) = &self.current {
            if *len + line.len() as u64 > self.max_file_bytes {
                self.open_next()?;
            }
        }

        let (path, file, len) = self.current.as_mut().expect("opened above");
        file.write_all(line.as_bytes())?;
        *len += line.len() as u64;
        debug!(path = %path.display(), bytes = *len, "metrics::RotatingLog::append");
        Ok(())
    }

    fn open_next(&mut self) -> std::io::Result<()> {
        let index = next_index(&self.dir);
        let path = self.dir.join(format!("metrics-{index:05}.jsonl"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let len = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.current = Some((path, file, len));
        self.prune();
        Ok(())
    }

    fn prune(&self) {
        let mut files = list_log_files(&self.dir);
        files.sort();
        while files.len() > self.max_files {
            let oldest = files.remove(0);
            let _ = fs::remove_file(oldest);
        }
    }
}

fn list_log_files(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("jsonl"))
                .collect()
        })
        .unwrap_or_default()
}

fn next_index(dir: &Path) -> usize {
    list_log_files(dir)
        .iter()
        .filter_map(|p| p.file_stem()?.to_str()?.rsplit('-').next()?.parse::<usize>().ok())
        .max()
        .map(|n| n + 1)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::types::EventKind;
    use tempfile::tempdir;

    fn sample() -> Sample {
        Sample {
            ts_ms: 1,
            kind: EventKind::Completion,
            provider: "anthropic".into(),
            model: "claude".into(),
            priority: "normal".into(),
            wait_ms: Some(5),
            execution_ms: Some(10),
        }
    }

    #[test]
    fn append_creates_a_log_file() {
        let dir = tempdir().unwrap();
        let mut log = RotatingLog::new(dir.path().to_path_buf(), 1024 * 1024, 5);
        log.append(&sample()).unwrap();
        assert_eq!(list_log_files(dir.path()).len(), 1);
    }

    #[test]
    fn rotates_once_the_size_cap_is_exceeded() {
        let dir = tempdir().unwrap();
        let mut log = RotatingLog::new(dir.path().to_path_buf(), 10, 5);
        for _ in 0..3 {
            log.append(&sample()).unwrap();
        }
        assert!(list_log_files(dir.path()).len() >= 2);
    }

    #[test]
    fn prunes_files_beyond_the_max_count() {
        let dir = tempdir().unwrap();
        let mut log = RotatingLog::new(dir.path().to_path_buf(), 1, 2);
        for _ in 0..5 {
            log.append(&sample()).unwrap();
        }
        assert!(list_log_files(dir.path()).len() <= 2);
    }
}
