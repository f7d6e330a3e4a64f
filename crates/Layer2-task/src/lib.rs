//! # insight-task
//!
//! In-process background task engine for Insight.
//! Callers submit work, get a task id back immediately, and poll status,
//! progress and result while a fixed worker pool runs the work.
//!
//! ## Features
//!
//! - Priority queue (urgent first, FIFO within a priority)
//! - Fixed worker pool with panic containment
//! - Progress reporting from inside running work
//! - Cooperative cancellation
//! - Background sweeper for timeouts and eviction of old tasks
//! - Completion / error callbacks
//! - Telemetry hooks (`TaskObserver`)

pub mod observer;
pub mod pool;
pub mod progress;
pub mod queue;
pub mod registry;
pub mod service;
pub mod state;
pub mod task;

// Engine
pub use service::{EngineStats, TaskService};
pub use pool::{PoolState, WorkerPool};
pub use registry::{StatusCounts, SweepReport, TaskOutcome, TaskRegistry};

// Task model
pub use progress::ProgressReporter;
pub use state::TaskStatus;
pub use task::{
    CompleteCallback, ErrorCallback, TaskArgs, TaskFn, TaskId, TaskPriority, TaskRecord,
    TaskRequest, TaskSnapshot,
};

// Telemetry
pub use observer::{MetricsObserver, MetricsSnapshot, NoopObserver, TaskObserver};
