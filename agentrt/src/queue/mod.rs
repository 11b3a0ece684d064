//! Priority task queue (C1): WFQ virtual time, starvation prevention.

mod config;
mod core;

pub use config::QueueConfig;
pub use core::{PriorityQueue, QueueStats};
