//! Priority queue tuning knobs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub starvation_threshold_ms: u64,
    pub max_skip_count: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            starvation_threshold_ms: 60_000,
            max_skip_count: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_defaults() {
        let c = QueueConfig::default();
        assert_eq!(c.starvation_threshold_ms, 60_000);
        assert_eq!(c.max_skip_count, 10);
    }
}
