//! Event bus and rotating JSONL log for scheduling activity.
//!
//! Components publish [`SchedulerEvent`]s to an [`EventBus`] (a
//! `tokio::sync::broadcast` channel). The metrics collector (C12) and the
//! [`EventLogger`] both subscribe independently.

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, create_event_bus};
pub use logger::{EventLogger, read_day, spawn_event_logger};
pub use types::{EventLogEntry, SchedulerEvent};
