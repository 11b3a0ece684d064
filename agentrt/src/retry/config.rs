//! Retry-with-backoff tuning knobs.
//!
//! Precedence (highest first): explicit per-call overrides, a config file in
//! the working directory, environment overrides, these defaults. The file
//! and environment layers are the ambient [`crate::config::RuntimeConfig`]'s
//! job; this struct is the bottom of that chain.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Jitter {
    #[default]
    Full,
    Partial,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: Jitter,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: Jitter::Full,
        }
    }
}

impl RetryConfig {
    /// `min(maxDelayMs, initialDelayMs * multiplier^attempt)`, jittered.
    /// `rand_unit` must be a uniform sample in `[0, 1)` (injected so this is
    /// deterministic under test).
    pub fn delay_ms(&self, attempt: u32, rand_unit: f64) -> u64 {
        let base = (self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32)).min(self.max_delay_ms as f64);
        let jittered = match self.jitter {
            Jitter::Full => base * rand_unit,
            Jitter::Partial => base / 2.0 + (base / 2.0) * rand_unit,
            Jitter::None => base,
        };
        jittered.round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let c = RetryConfig { jitter: Jitter::None, ..RetryConfig::default() };
        assert_eq!(c.delay_ms(0, 0.0), 1_000);
        assert_eq!(c.delay_ms(1, 0.0), 2_000);
        assert_eq!(c.delay_ms(2, 0.0), 4_000);
        assert_eq!(c.delay_ms(10, 0.0), 30_000);
    }

    #[test]
    fn full_jitter_ranges_between_zero_and_base() {
        let c = RetryConfig { jitter: Jitter::Full, ..RetryConfig::default() };
        assert_eq!(c.delay_ms(0, 0.0), 0);
        assert_eq!(c.delay_ms(0, 1.0), 1_000);
    }

    #[test]
    fn partial_jitter_never_drops_below_half() {
        let c = RetryConfig { jitter: Jitter::Partial, ..RetryConfig::default() };
        assert_eq!(c.delay_ms(0, 0.0), 500);
        assert_eq!(c.delay_ms(0, 1.0), 1_000);
    }
}
