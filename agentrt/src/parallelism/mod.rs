//! Dynamic parallelism adjuster (C4): health-driven concurrency caps.

mod config;
mod core;

pub use config::ParallelismConfig;
pub use core::{ErrorKind429, ParallelismAdjuster, ParallelismHealth};
