//! Runtime configuration: load order is explicit path > `./.agentrt.yml` >
//! user config dir > built-in defaults, then environment-variable overrides.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::adaptive::AdaptiveConfig;
use crate::admission::AdmissionConfig;
use crate::circuit::CircuitConfig;
use crate::coordinator::CoordinatorConfig;
use crate::metrics::MetricsConfig;
use crate::parallelism::ParallelismConfig;
use crate::penalty::{PenaltyConfig, PenaltyMode};
use crate::queue::QueueConfig;
use crate::retry::RetryConfig;

/// A named concurrency preset; `stable` trades throughput for headroom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeProfile {
    Stable,
    Default,
}

impl RuntimeProfile {
    fn base_parallelism(self) -> u32 {
        match self {
            RuntimeProfile::Stable => 4,
            RuntimeProfile::Default => 8,
        }
    }
}

impl Default for RuntimeProfile {
    fn default() -> Self {
        RuntimeProfile::Default
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub profile: RuntimeProfile,
    pub default_rpm: f64,
    pub total_max_llm: u32,
    pub total_max_requests: u32,
    pub max_concurrent_orchestrations: u32,
    pub adaptive_enabled: bool,
    pub predictive_enabled: bool,
    pub log_level: String,
    pub config_dir: PathBuf,
    pub queue: QueueConfig,
    pub circuit: CircuitConfig,
    pub parallelism: ParallelismConfig,
    pub penalty: PenaltyConfig,
    pub retry: RetryConfig,
    pub adaptive: AdaptiveConfig,
    pub coordinator: CoordinatorConfig,
    pub admission: AdmissionConfig,
    pub metrics: MetricsConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let profile = RuntimeProfile::default();
        Self {
            profile,
            default_rpm: 600.0,
            total_max_llm: 32,
            total_max_requests: 64,
            max_concurrent_orchestrations: 16,
            adaptive_enabled: true,
            predictive_enabled: true,
            log_level: "info".to_string(),
            config_dir: default_config_dir(),
            queue: QueueConfig::default(),
            circuit: CircuitConfig::default(),
            parallelism: ParallelismConfig::default(),
            penalty: PenaltyConfig::default(),
            retry: RetryConfig::default(),
            adaptive: AdaptiveConfig::default(),
            coordinator: CoordinatorConfig::default(),
            admission: AdmissionConfig { default_model_concurrency: profile.base_parallelism(), ..AdmissionConfig::default() },
            metrics: MetricsConfig::default(),
        }
    }
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir().unwrap_or_else(std::env::temp_dir).join("agentrt")
}

impl RuntimeConfig {
    /// Resolves the file to read from, in priority order, and applies
    /// environment overrides on top of whatever was found (or the defaults,
    /// if no file exists anywhere in the search path).
    pub fn load(explicit_path: Option<&Path>) -> Self {
        let mut config = explicit_path
            .map(PathBuf::from)
            .or_else(|| Some(PathBuf::from("./.agentrt.yml")).filter(|p| p.exists()))
            .or_else(|| Some(default_config_dir().join("config.yml")).filter(|p| p.exists()))
            .and_then(|path| Self::read_file(&path))
            .unwrap_or_default();
        config.apply_env_overrides();
        config
    }

    fn read_file(path: &Path) -> Option<Self> {
        let contents = std::fs::read_to_string(path).ok()?;
        match serde_yaml::from_str(&contents) {
            Ok(config) => {
                debug!(path = %path.display(), "RuntimeConfig::read_file: loaded config");
                Some(config)
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "RuntimeConfig::read_file: failed to parse, falling back to defaults");
                None
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        env_u32("TOTAL_MAX_LLM", &mut self.total_max_llm);
        env_u32("TOTAL_MAX_REQUESTS", &mut self.total_max_requests);
        env_u32("MAX_CONCURRENT_ORCHESTRATIONS", &mut self.max_concurrent_orchestrations);
        env_u32("MAX_CONCURRENT_PER_MODEL", &mut self.admission.default_model_concurrency);
        env_u64("CAPACITY_WAIT_MS", &mut self.admission.max_wait_ms);
        env_u64("CAPACITY_POLL_MS", &mut self.admission.poll_interval_ms);
        env_bool("ADAPTIVE_ENABLED", &mut self.adaptive_enabled);
        env_bool("PREDICTIVE_ENABLED", &mut self.predictive_enabled);
        env_f64("REDUCTION_FACTOR", &mut self.adaptive.reduction_factor);
        env_f64("RECOVERY_FACTOR", &mut self.adaptive.recovery_factor);
        env_u64("RECOVERY_INTERVAL_MS", &mut self.adaptive.recovery_interval_ms);
        env_u64("HEARTBEAT_INTERVAL_MS", &mut self.coordinator.heartbeat_interval_ms);
        env_u64("HEARTBEAT_TIMEOUT_MS", &mut self.coordinator.heartbeat_timeout_ms);
        self.admission.max_concurrent_orchestrations = self.max_concurrent_orchestrations;
        self.admission.max_total_active_llm = self.total_max_llm;
        self.admission.max_total_active_requests = self.total_max_requests;
        self.adaptive.predictive_enabled = self.predictive_enabled;

        if let Ok(mode) = std::env::var("ADAPTIVE_PENALTY_MODE") {
            self.penalty.mode = match mode.to_lowercase().as_str() {
                "legacy" => PenaltyMode::Legacy,
                "enhanced" => PenaltyMode::Enhanced,
                other => {
                    warn!(mode = other, "RuntimeConfig::apply_env_overrides: unknown ADAPTIVE_PENALTY_MODE, keeping default");
                    self.penalty.mode
                }
            };
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.log_level = level;
        }
    }
}

fn env_u32(key: &str, slot: &mut u32) {
    if let Ok(v) = std::env::var(key) {
        match v.parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => warn!(key, value = %v, "RuntimeConfig: ignoring unparseable env override"),
        }
    }
}

fn env_u64(key: &str, slot: &mut u64) {
    if let Ok(v) = std::env::var(key) {
        match v.parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => warn!(key, value = %v, "RuntimeConfig: ignoring unparseable env override"),
        }
    }
}

fn env_f64(key: &str, slot: &mut f64) {
    if let Ok(v) = std::env::var(key) {
        match v.parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => warn!(key, value = %v, "RuntimeConfig: ignoring unparseable env override"),
        }
    }
}

fn env_bool(key: &str, slot: &mut bool) {
    if let Ok(v) = std::env::var(key) {
        match v.to_lowercase().as_str() {
            "1" | "true" | "yes" => *slot = true,
            "0" | "false" | "no" => *slot = false,
            _ => warn!(key, value = %v, "RuntimeConfig: ignoring unparseable bool env override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn env_overrides_take_priority_over_defaults() {
        unsafe {
            std::env::set_var("TOTAL_MAX_LLM", "99");
        }
        let config = RuntimeConfig::load(None);
        assert_eq!(config.total_max_llm, 99);
        assert_eq!(config.admission.max_total_active_llm, 99);
        unsafe {
            std::env::remove_var("TOTAL_MAX_LLM");
        }
    }

    #[test]
    #[serial]
    fn unparseable_env_override_is_ignored() {
        unsafe {
            std::env::set_var("TOTAL_MAX_LLM", "not-a-number");
        }
        let config = RuntimeConfig::load(None);
        assert_eq!(config.total_max_llm, RuntimeConfig::default().total_max_llm);
        unsafe {
            std::env::remove_var("TOTAL_MAX_LLM");
        }
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let config = RuntimeConfig::load(Some(Path::new("/nonexistent/agentrt.yml")));
        assert_eq!(config.profile, RuntimeProfile::Default);
    }
}
