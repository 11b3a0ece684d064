//! Metrics collector tuning knobs.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_metrics_dir() -> PathBuf {
    dirs::data_local_dir().unwrap_or_else(std::env::temp_dir).join("agentrt").join("metrics")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Number of recent dispatch/completion samples kept for percentile math.
    pub window_capacity: usize,
    pub enable_logging: bool,
    pub metrics_dir: PathBuf,
    pub max_file_bytes: u64,
    pub max_files: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_capacity: 2_000,
            enable_logging: false,
            metrics_dir: default_metrics_dir(),
            max_file_bytes: 8 * 1024 * 1024,
            max_files: 5,
        }
    }
}
