//! Adaptive rate controller (C7): learned per-provider concurrency limits,
//! predictive 429 throttling, and persistence across restarts.

mod config;
mod core;
mod persistence;

pub use config::AdaptiveConfig;
pub use core::AdaptiveRateController;
pub use persistence::{LearnedLimitsFile, default_path, load, save};
