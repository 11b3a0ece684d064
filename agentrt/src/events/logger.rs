//! Rotating JSONL event log: one file per UTC day under `<dir>/events/`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::bus::EventBus;
use super::types::{EventLogEntry, SchedulerEvent};

pub struct EventLogger {
    dir: PathBuf,
}

impl EventLogger {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    fn file_for_today(&self) -> eyre::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let name = format!("{}.jsonl", Utc::now().format("%Y-%m-%d"));
        Ok(self.dir.join(name))
    }

    pub fn write_event(&self, event: &SchedulerEvent) -> eyre::Result<()> {
        let path = self.file_for_today()?;
        let entry = EventLogEntry::new(event.clone(), Utc::now());
        let json = serde_json::to_string(&entry)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{json}")?;
        Ok(())
    }

    /// Consumes events from `bus` until the channel closes. Meant to be
    /// spawned as a background task.
    pub async fn run(self, bus: Arc<EventBus>) {
        let mut rx = bus.subscribe();
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(e) = self.write_event(&event) {
                        error!(error = %e, "EventLogger::run: failed to write event");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "EventLogger::run: lagged behind bus");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventLogger::run: bus closed, shutting down");
                    break;
                }
            }
        }
    }
}

pub fn spawn_event_logger(bus: Arc<EventBus>, dir: impl AsRef<Path>) -> tokio::task::JoinHandle<()> {
    let logger = EventLogger::new(dir);
    tokio::spawn(async move { logger.run(bus).await })
}

/// Reads every entry from the day-file at `dir/<date>.jsonl`, if present.
pub fn read_day(dir: impl AsRef<Path>, date: &str) -> eyre::Result<Vec<EventLogEntry>> {
    let path = dir.as_ref().join(format!("{date}.jsonl"));
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(&path)?;
    let mut entries = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EventLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(error = %e, "read_day: failed to parse line"),
        }
    }
    Ok(entries)
}
