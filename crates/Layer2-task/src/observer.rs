//! Telemetry hooks
//!
//! The engine reports lifecycle events to a [`TaskObserver`] instead of
//! talking to a metrics registry directly. Observers are called without any
//! engine lock held.

use crate::state::TaskStatus;
use crate::task::{TaskId, TaskSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Receives task lifecycle events
pub trait TaskObserver: Send + Sync {
    /// Task accepted into the registry
    fn on_submitted(&self, _task: &TaskSnapshot) {}

    /// Worker picked the task up
    fn on_started(&self, _task: &TaskSnapshot) {}

    /// Progress reported from inside the task
    fn on_progress(&self, _task_id: TaskId, _progress: u8, _message: &str) {}

    /// Task reached a terminal state
    fn on_finished(&self, _task: &TaskSnapshot) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TaskObserver for NoopObserver {}

/// Counter-based observer an external metrics registry can scrape
#[derive(Debug, Default)]
pub struct MetricsObserver {
    submitted: AtomicU64,
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    canceled: AtomicU64,
    /// Sum of execution times in microseconds
    execution_micros: AtomicU64,
    /// Number of tasks contributing to `execution_micros`
    timed_runs: AtomicU64,
}

/// Point-in-time copy of [`MetricsObserver`] counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub canceled: u64,
    /// Mean execution time in seconds
    pub avg_execution_time: Option<f64>,
}

impl MetricsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let runs = self.timed_runs.load(Ordering::Relaxed);
        let micros = self.execution_micros.load(Ordering::Relaxed);

        MetricsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            canceled: self.canceled.load(Ordering::Relaxed),
            avg_execution_time: (runs > 0).then(|| micros as f64 / runs as f64 / 1_000_000.0),
        }
    }
}

impl TaskObserver for MetricsObserver {
    fn on_submitted(&self, _task: &TaskSnapshot) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    fn on_started(&self, _task: &TaskSnapshot) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    fn on_finished(&self, task: &TaskSnapshot) {
        let counter = match task.status {
            TaskStatus::Completed => &self.completed,
            TaskStatus::Failed => &self.failed,
            TaskStatus::Timeout => &self.timed_out,
            TaskStatus::Canceled => &self.canceled,
            TaskStatus::Pending | TaskStatus::Running => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if let Some(duration) = task.duration() {
            self.execution_micros
                .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
            self.timed_runs.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskPriority, TaskRecord};
    use serde_json::{json, Map};
    use std::time::Duration;

    fn record() -> TaskRecord {
        TaskRecord::new(
            TaskId::new(),
            TaskPriority::Normal,
            Duration::from_secs(5),
            Map::new(),
        )
    }

    #[test]
    fn test_metrics_counts() {
        let metrics = MetricsObserver::new();

        let mut ok = record();
        metrics.on_submitted(&ok.snapshot());
        ok.start();
        metrics.on_started(&ok.snapshot());
        ok.complete(json!(1));
        metrics.on_finished(&ok.snapshot());

        let mut bad = record();
        metrics.on_submitted(&bad.snapshot());
        bad.start();
        bad.fail("boom", None);
        metrics.on_finished(&bad.snapshot());

        let mut skipped = record();
        skipped.cancel();
        metrics.on_finished(&skipped.snapshot());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.submitted, 2);
        assert_eq!(snapshot.started, 1);
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.canceled, 1);
        assert_eq!(snapshot.timed_out, 0);
        assert!(snapshot.avg_execution_time.is_some());
    }

    #[test]
    fn test_active_snapshot_ignored() {
        let metrics = MetricsObserver::new();
        metrics.on_finished(&record().snapshot());
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }
}
