//! agentrt - an agent runtime scheduler
//!
//! Coordinates LLM-backed subagent and team task execution across a
//! priority queue, per-provider rate limiting and circuit breaking, adaptive
//! concurrency control, cross-instance coordination, checkpointing, a DAG
//! executor and a metrics collector.
//!
//! # Modules
//!
//! - [`queue`] - C1 priority task queue (weighted fair queuing)
//! - [`ratelimit`] - C2 token-bucket rate limiter
//! - [`penalty`] - C3 adaptive penalty controller
//! - [`parallelism`] - C4 dynamic parallelism adjuster
//! - [`circuit`] - C5 circuit breaker
//! - [`retry`] - C6 retry-with-backoff and the shared rate-limit gate
//! - [`adaptive`] - C7 adaptive rate controller
//! - [`coordinator`] - C8 cross-instance coordinator
//! - [`admission`] - C9 agent runtime admission controller
//! - [`checkpoint`] - C10 checkpoint manager
//! - [`dag`] - C11 DAG executor
//! - [`metrics`] - C12 metrics collector
//! - [`config`] - runtime configuration loading
//! - [`runtime`] - wires every component into one `Runtime`
//! - [`cli`] - command-line interface

pub mod adaptive;
pub mod admission;
pub mod cancel;
pub mod checkpoint;
pub mod circuit;
pub mod clock;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod dag;
pub mod domain;
pub mod error;
pub mod events;
pub mod metrics;
pub mod parallelism;
pub mod penalty;
pub mod provider;
pub mod queue;
pub mod ratelimit;
pub mod retry;
pub mod runtime;
pub mod transport;

pub use adaptive::{AdaptiveConfig, AdaptiveRateController};
pub use admission::{AdmissionConfig, AdmissionController, DispatchOutcome, DispatchPermitInput};
pub use cancel::{CancelHandle, CancelToken, cancel_pair};
pub use checkpoint::{CheckpointConfig, CheckpointManager, CheckpointStats};
pub use circuit::{CircuitBreaker, CircuitConfig, CircuitDecision};
pub use clock::{Clock, MockClock, SharedClock, SystemClock};
pub use config::{RuntimeConfig, RuntimeProfile};
pub use coordinator::{Coordinator, CoordinatorConfig, LockToken, QueueStateSnapshot, StealableEntry, StealingStats};
pub use dag::{DagExecutor, DagOptions, DagResult, DagStatus, DagValidationError, TaskExecutor, TaskOutput, TaskPlan, TaskSpec};
pub use domain::{Checkpoint, InstanceRecord, Lease, LeaseState, Priority, Task, infer_priority};
pub use error::{Diagnostics, ErrorKind, RuntimeError};
pub use events::{EventBus, EventLogger, SchedulerEvent};
pub use metrics::{MetricsCollector, MetricsConfig, MetricsSnapshot, MetricsSummary};
pub use parallelism::{ParallelismAdjuster, ParallelismConfig};
pub use penalty::{PenaltyConfig, PenaltyController, PenaltyMode};
pub use provider::ProviderStateTable;
pub use queue::{PriorityQueue, QueueConfig};
pub use ratelimit::RateLimiter;
pub use retry::{RateLimitGate, RetryConfig, RetryEngine, RetryOptions};
pub use runtime::Runtime;
pub use transport::{Embedder, Transport, TransportError};
