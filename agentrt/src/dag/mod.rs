//! DAG executor (C11): dependency-ordered execution of a task plan through
//! the admission controller.

mod core;
mod types;
mod validate;

pub use core::DagExecutor;
pub use types::{DagOptions, DagResult, DagStatus, DagValidationError, TaskExecutor, TaskOutput, TaskPlan, TaskSpec};
pub use validate::validate;
