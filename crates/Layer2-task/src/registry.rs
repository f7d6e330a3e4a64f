//! Task Registry - bounded table of every known task plus the sweeper
//!
//! The registry is the single owner of task state. Workers, progress
//! reporters, the sweeper and callers all go through one mutex, which is
//! never held across an `.await`.

use crate::observer::{NoopObserver, TaskObserver};
use crate::state::TaskStatus;
use crate::task::{TaskId, TaskRecord, TaskSnapshot};
use chrono::{DateTime, Utc};
use insight_foundation::{Error, Result};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// How a task function ended
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Success(Value),
    Failure {
        message: String,
        traceback: Option<String>,
    },
}

/// State of a task after a worker reported its outcome
#[derive(Debug)]
pub(crate) struct Finished {
    pub snapshot: TaskSnapshot,
    /// Error for failed / timed out / canceled tasks
    pub error: Option<Error>,
    /// False when the task was already terminal (canceled or timed out)
    /// and the outcome was discarded
    pub applied: bool,
}

/// Result of one sweeper pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub timed_out: usize,
    pub evicted: usize,
    /// Tasks skipped because their bookkeeping could not be evaluated
    pub errors: usize,
    pub remaining: usize,
}

/// Number of tasks per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub canceled: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed + self.timed_out + self.canceled
    }
}

/// Bounded, thread-safe task table
#[derive(Clone)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<HashMap<TaskId, TaskRecord>>>,
    max_tasks: usize,
    retention: Duration,
    observer: Arc<dyn TaskObserver>,
}

impl TaskRegistry {
    /// Create a registry holding at most `max_tasks` entries, keeping
    /// terminal tasks for `retention`
    pub fn new(max_tasks: usize, retention: Duration) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            max_tasks,
            retention,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Report lifecycle events to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn TaskObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn max_tasks(&self) -> usize {
        self.max_tasks
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    // ========== Insert / Lookup ==========

    /// Insert a new task, rejecting it when the registry is full
    pub fn create(&self, record: TaskRecord) -> Result<TaskSnapshot> {
        let snapshot = {
            let mut tasks = self.tasks.lock();

            if tasks.len() >= self.max_tasks {
                warn!(
                    "Rejecting task {}: registry full ({} tasks)",
                    record.id(),
                    self.max_tasks
                );
                return Err(Error::CapacityExceeded {
                    max: self.max_tasks,
                });
            }
            if tasks.contains_key(&record.id()) {
                return Err(Error::InvalidInput(format!(
                    "Task {} already exists",
                    record.id()
                )));
            }

            let snapshot = record.snapshot();
            tasks.insert(record.id(), record);
            snapshot
        };

        self.observer.on_submitted(&snapshot);
        Ok(snapshot)
    }

    /// Snapshot of a task
    pub fn get(&self, task_id: TaskId) -> Option<TaskSnapshot> {
        self.tasks.lock().get(&task_id).map(TaskRecord::snapshot)
    }

    /// Current status of a task
    pub fn status(&self, task_id: TaskId) -> Option<TaskStatus> {
        self.tasks.lock().get(&task_id).map(TaskRecord::status)
    }

    /// Result of a finished task, or the error it ended with
    pub fn result(&self, task_id: TaskId) -> Result<Value> {
        let tasks = self.tasks.lock();
        let record = tasks
            .get(&task_id)
            .ok_or_else(|| Error::task_not_found(task_id))?;
        record.outcome()
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.tasks.lock().contains_key(&task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Every task, oldest first
    pub fn list_all(&self) -> Vec<TaskSnapshot> {
        self.list_where(|_| true)
    }

    /// Pending and running tasks, oldest first
    pub fn list_active(&self) -> Vec<TaskSnapshot> {
        self.list_where(|record| record.status().is_active())
    }

    fn list_where(&self, filter: impl Fn(&TaskRecord) -> bool) -> Vec<TaskSnapshot> {
        let mut snapshots: Vec<TaskSnapshot> = {
            let tasks = self.tasks.lock();
            tasks
                .values()
                .filter(|record| filter(record))
                .map(TaskRecord::snapshot)
                .collect()
        };
        snapshots.sort_by_key(|s| s.created_at);
        snapshots
    }

    /// Count tasks by status
    pub fn counts(&self) -> StatusCounts {
        let tasks = self.tasks.lock();
        let mut counts = StatusCounts::default();

        for record in tasks.values() {
            match record.status() {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Timeout => counts.timed_out += 1,
                TaskStatus::Canceled => counts.canceled += 1,
            }
        }

        counts
    }

    // ========== Transitions ==========

    /// PENDING -> RUNNING. False if the task is gone or no longer pending.
    pub fn mark_running(&self, task_id: TaskId) -> bool {
        let snapshot = {
            let mut tasks = self.tasks.lock();
            let Some(record) = tasks.get_mut(&task_id) else {
                return false;
            };
            if !record.start() {
                return false;
            }
            record.snapshot()
        };

        debug!(
            "Task {} started after waiting {:.3}s",
            task_id.short(),
            snapshot.wait_time
        );
        self.observer.on_started(&snapshot);
        true
    }

    /// Record progress for a non-terminal task
    pub fn update_progress(&self, task_id: TaskId, progress: f64, message: String) -> bool {
        let stored = {
            let mut tasks = self.tasks.lock();
            let Some(record) = tasks.get_mut(&task_id) else {
                return false;
            };
            if !record.set_progress(progress, message) {
                return false;
            }
            (record.progress(), record.message().to_string())
        };

        debug!("Task {} progress: {}%, {}", task_id.short(), stored.0, stored.1);
        self.observer.on_progress(task_id, stored.0, &stored.1);
        true
    }

    /// Apply a worker's outcome and release the task for eviction. A task
    /// canceled or timed out in the meantime keeps its terminal state and
    /// the outcome is dropped.
    pub(crate) fn finish(&self, task_id: TaskId, outcome: TaskOutcome) -> Option<Finished> {
        let finished = {
            let mut tasks = self.tasks.lock();
            let record = tasks.get_mut(&task_id)?;
            record.release();

            let applied = match outcome {
                TaskOutcome::Success(value) => record.complete(value),
                TaskOutcome::Failure { message, traceback } => record.fail(message, traceback),
            };

            Finished {
                snapshot: record.snapshot(),
                error: record.failure(),
                applied,
            }
        };

        if !finished.applied {
            debug!(
                "Discarding outcome of task {}: already {}",
                task_id.short(),
                finished.snapshot.status
            );
            return Some(finished);
        }

        match finished.snapshot.status {
            TaskStatus::Completed => info!(
                "Task {} completed in {:.3}s",
                task_id.short(),
                finished.snapshot.execution_time.unwrap_or_default()
            ),
            _ => error!(
                "Task {} failed: {}",
                task_id.short(),
                finished.snapshot.error.as_deref().unwrap_or("unknown error")
            ),
        }
        self.observer.on_finished(&finished.snapshot);

        Some(finished)
    }

    /// Cancel a pending or running task. Running work is not interrupted;
    /// its eventual outcome is discarded.
    pub fn cancel(&self, task_id: TaskId) -> bool {
        let (snapshot, was_running) = {
            let mut tasks = self.tasks.lock();
            let Some(record) = tasks.get_mut(&task_id) else {
                return false;
            };
            let was_running = record.status().is_running();
            if !record.cancel() {
                return false;
            }
            (record.snapshot(), was_running)
        };

        if was_running {
            info!(
                "Flagged running task {} as canceled; its result will be discarded",
                task_id.short()
            );
        } else {
            info!("Canceled task {}", task_id.short());
        }
        self.observer.on_finished(&snapshot);
        true
    }

    // ========== Sweeper ==========

    /// Run one timeout + eviction pass now
    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now())
    }

    /// Run one timeout + eviction pass as if the clock read `now`
    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let mut timed_out = Vec::new();

        {
            let mut tasks = self.tasks.lock();

            // 1. Overrunning tasks
            for record in tasks.values_mut().filter(|record| record.is_overdue(now)) {
                let error = format!("execution exceeded timeout ({:?})", record.timeout());
                if record.time_out(error, now) {
                    warn!(
                        "Task {} timed out after {:?}",
                        record.id().short(),
                        record.timeout()
                    );
                    timed_out.push(record.snapshot());
                }
            }

            // 2. Old terminal tasks and stuck pending entries. Tasks a worker
            // still holds stay until it reports back.
            let retention = self.retention;
            tasks.retain(|task_id, record| match record.is_expired(now, retention) {
                Ok(true) => {
                    debug!("Evicting task {} ({})", task_id.short(), record.status());
                    report.evicted += 1;
                    false
                }
                Ok(false) => true,
                Err(e) => {
                    report.errors += 1;
                    warn!("Skipping task {} in eviction scan: {}", task_id, e);
                    true
                }
            });

            report.remaining = tasks.len();
        }

        report.timed_out = timed_out.len();
        for snapshot in &timed_out {
            self.observer.on_finished(snapshot);
        }

        report
    }

    /// Spawn the background sweeper. Stops when `shutdown` flips to true
    /// or its sender is dropped.
    pub fn start_sweeper(
        &self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let registry = self.clone();

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick fires immediately
            timer.tick().await;

            debug!("Task sweeper started (interval: {:?})", interval);
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let report = registry.sweep();
                        if report.timed_out > 0 || report.evicted > 0 {
                            info!(
                                "Sweep: {} timed out, {} evicted, {} remaining",
                                report.timed_out, report.evicted, report.remaining
                            );
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Task sweeper stopped");
        })
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.len())
            .field("max_tasks", &self.max_tasks)
            .field("retention", &self.retention)
            .finish()
    }
}
