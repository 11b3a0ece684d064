//! Cross-instance coordinator (C8): a directory-tree-backed registry owned
//! by no single process.

mod config;
mod core;
mod persistence;

pub use config::CoordinatorConfig;
pub use core::{Coordinator, LockToken, QueueStateSnapshot, StealableEntry, StealingStats};
pub use persistence::RuntimeDirs;
